// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Loading, saving, and dotted-path mutation of [`Config`].

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::types::Config;
use crate::error::ConfigError;

impl Config {
    /// Load a config from a JSON file, accepting either the nested
    /// `{strummer, midi, server}` shape or the flat shape where everything
    /// except `midi`/`server` folds into `strummer`. Missing file returns a
    /// default configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw)?;
        let nested = normalize_shape(value);
        Ok(serde_json::from_value(nested)?)
    }

    /// Persist to `path` in canonical nested camelCase shape.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Canonical nested camelCase JSON, as served to browser clients.
    pub fn to_canonical_json(&self) -> Value {
        serde_json::to_value(self).expect("Config always serializes")
    }

    /// Read a dotted path (e.g. `"strummer.strumming.upperNoteSpread"`),
    /// tolerating camelCase/snake_case at every segment.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let root = self.to_canonical_json();
        navigate_get(&root, &path.split('.').collect::<Vec<_>>())
    }

    /// Mutate a dotted path with a new value, then re-validate by
    /// round-tripping through the typed struct. On success, `self` reflects
    /// the change; on failure `self` is left untouched and the caller can
    /// log-and-ignore per the WebSocket handler's error policy.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let mut root = self.to_canonical_json();
        let segments: Vec<&str> = path.split('.').collect();
        navigate_set(&mut root, &segments, value)?;
        let updated: Config = serde_json::from_value(root)?;
        *self = updated;
        Ok(())
    }
}

fn navigate_get(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    let obj = value.as_object()?;
    let key = resolve_key(obj, head)?;
    navigate_get(obj.get(&key)?, rest)
}

fn navigate_set(value: &mut Value, segments: &[&str], new_value: Value) -> Result<(), ConfigError> {
    let Some((head, rest)) = segments.split_first() else {
        *value = new_value;
        return Ok(());
    };
    let obj = value.as_object_mut().ok_or_else(|| ConfigError::WrongType {
        path: head.to_string(),
        reason: "expected an object".to_string(),
    })?;
    let key = resolve_key(obj, head).unwrap_or_else(|| head.to_string());
    if rest.is_empty() {
        obj.insert(key, new_value);
        return Ok(());
    }
    let entry = obj
        .entry(key.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    navigate_set(entry, rest, new_value)
}

/// Resolve a path segment against an object's actual keys, tolerating
/// camelCase vs snake_case spelling (e.g. `upper_note_spread` matches
/// `upperNoteSpread`).
fn resolve_key(obj: &Map<String, Value>, segment: &str) -> Option<String> {
    if obj.contains_key(segment) {
        return Some(segment.to_string());
    }
    let camel = snake_to_camel(segment);
    if obj.contains_key(&camel) {
        return Some(camel);
    }
    let snake = camel_to_snake(segment);
    if obj.contains_key(&snake) {
        return Some(snake);
    }
    None
}

fn snake_to_camel(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Accepts either the nested `{strummer, midi, server}` shape or the flat
/// shape (everything but `midi`/`server` folds into `strummer`).
fn normalize_shape(value: Value) -> Value {
    let Value::Object(mut obj) = value else {
        return value;
    };
    if obj.contains_key("strummer") {
        return Value::Object(obj);
    }

    let midi = obj.remove("midi");
    let server = obj.remove("server");
    let mut nested = Map::new();
    nested.insert("strummer".to_string(), Value::Object(obj));
    if let Some(midi) = midi {
        nested.insert("midi".to_string(), midi);
    }
    if let Some(server) = server {
        nested.insert("server".to_string(), server);
    }
    Value::Object(nested)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sketchatone")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_config_default() {
        let c = Config::default();
        let json = serde_json::to_string(&c).unwrap();
        let back = Config::from_json_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn round_trip_config_mutated() {
        let mut c = Config::default();
        c.strummer.strumming.upper_note_spread = 7;
        c.midi.jack_auto_connect = super::super::types::JackAutoConnect::Chain0;
        let json = serde_json::to_string(&c).unwrap();
        let back = Config::from_json_str(&json).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn flat_shape_folds_into_strummer() {
        let raw = r#"{
            "noteDuration": {"min": 0.2, "max": 2.0, "multiplier": 1.0, "curve": 1.0, "spread": "inverse", "control": "tiltXY", "default": 1.0},
            "midi": {"midiOutputBackend": "jack"},
            "server": {"httpPort": 9090}
        }"#;
        let cfg = Config::from_json_str(raw).unwrap();
        assert!((cfg.strummer.note_duration.max - 2.0).abs() < 1e-9);
        assert_eq!(
            cfg.midi.midi_output_backend,
            super::super::types::MidiOutputBackend::Jack
        );
        assert_eq!(cfg.server.http_port, 9090);
    }

    #[test]
    fn dotted_get_set_tolerates_camel_case() {
        let mut c = Config::default();
        c.set_path("strummer.strumming.upperNoteSpread", serde_json::json!(5))
            .unwrap();
        assert_eq!(c.strummer.strumming.upper_note_spread, 5);
        assert_eq!(
            c.get_path("strummer.strumming.upper_note_spread"),
            Some(serde_json::json!(5))
        );
    }

    #[test]
    fn unknown_path_segment_is_harmless_insert_but_reparse_rejects_bad_types() {
        let mut c = Config::default();
        let result = c.set_path("strummer.strumming.pressureThreshold", serde_json::json!("not-a-number"));
        assert!(result.is_err());
    }

    #[test]
    fn update_config_reseeds_strum_note_count() {
        let mut c = Config::default();
        c.set_path("strummer.strumming.upperNoteSpread", serde_json::json!(5))
            .unwrap();
        let base = crate::note::parse_chord("C", 4).unwrap();
        let expanded = crate::note::fill_note_spread(
            &base,
            c.strummer.strumming.lower_note_spread,
            c.strummer.strumming.upper_note_spread,
        );
        assert_eq!(expanded.len(), base.len() + c.strummer.strumming.lower_note_spread + 5);
    }
}
