// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Parameter-mapping engine: a small DSL mapping a normalized control
//! axis through curve/spread/range to an output value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlSource {
    Pressure,
    TiltX,
    TiltY,
    TiltXY,
    Xaxis,
    Yaxis,
    Velocity,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spread {
    Direct,
    Inverse,
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterMapping {
    pub min: f64,
    pub max: f64,
    pub multiplier: f64,
    pub curve: f64,
    pub spread: Spread,
    pub control: ControlSource,
    pub default: f64,
}

impl ParameterMapping {
    /// Apply the mapping to a control input already normalized to `[0, 1]`.
    pub fn map_value(&self, input: f64) -> f64 {
        if self.control == ControlSource::None {
            return self.default * self.multiplier;
        }

        let mut value = input.clamp(0.0, 1.0);

        value = match self.spread {
            Spread::Direct => value,
            Spread::Inverse => 1.0 - value,
            Spread::Central => (value - 0.5) * 2.0,
        };

        if self.curve != 1.0 {
            value = if self.spread == Spread::Central {
                value.signum() * value.abs().powf(self.curve)
            } else {
                value.powf(self.curve)
            };
        }

        let output = match self.spread {
            Spread::Central => {
                let center = (self.min + self.max) / 2.0;
                let half_range = (self.max - self.min) / 2.0;
                center + value * half_range
            }
            _ => self.min + value * (self.max - self.min),
        };

        output * self.multiplier
    }

    pub fn default_note_duration() -> Self {
        Self {
            min: 0.15,
            max: 1.5,
            multiplier: 1.0,
            curve: 1.0,
            spread: Spread::Inverse,
            control: ControlSource::TiltXY,
            default: 1.0,
        }
    }

    pub fn default_pitch_bend() -> Self {
        Self {
            min: -1.0,
            max: 1.0,
            multiplier: 1.0,
            curve: 4.0,
            spread: Spread::Central,
            control: ControlSource::Yaxis,
            default: 0.0,
        }
    }

    pub fn default_note_velocity() -> Self {
        Self {
            min: 0.0,
            max: 127.0,
            multiplier: 1.0,
            curve: 4.0,
            spread: Spread::Direct,
            control: ControlSource::Pressure,
            default: 64.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ParameterMapping {
        ParameterMapping {
            min: 0.0,
            max: 1.0,
            multiplier: 1.0,
            curve: 1.0,
            spread: Spread::Direct,
            control: ControlSource::Pressure,
            default: 0.5,
        }
    }

    #[test]
    fn direct_identity_mapping() {
        let m = identity();
        for v in [0.0, 0.25, 0.5, 0.75, 1.0] {
            assert!((m.map_value(v) - v).abs() < 1e-9);
        }
    }

    #[test]
    fn central_midpoint_is_average_of_min_max() {
        let mut m = identity();
        m.spread = Spread::Central;
        m.min = -2.0;
        m.max = 4.0;
        assert!((m.map_value(0.5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn none_control_returns_default_times_multiplier() {
        let mut m = identity();
        m.control = ControlSource::None;
        m.default = 0.3;
        m.multiplier = 2.0;
        assert!((m.map_value(0.9) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn input_is_clamped() {
        let m = identity();
        assert!((m.map_value(-5.0) - 0.0).abs() < 1e-9);
        assert!((m.map_value(5.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn inverse_spread_flips_range() {
        let mut m = identity();
        m.spread = Spread::Inverse;
        assert!((m.map_value(0.0) - 1.0).abs() < 1e-9);
        assert!((m.map_value(1.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn central_preserves_sign_under_curve() {
        let mut m = identity();
        m.spread = Spread::Central;
        m.curve = 2.0;
        m.min = -1.0;
        m.max = 1.0;
        // input 0.0 -> central value -1.0 -> curved stays negative
        assert!(m.map_value(0.0) < 0.0);
        assert!(m.map_value(1.0) > 0.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn spread_strategy() -> impl Strategy<Value = Spread> {
            prop_oneof![
                Just(Spread::Direct),
                Just(Spread::Inverse),
                Just(Spread::Central),
            ]
        }

        proptest! {
            /// For any bounds, positive curve, and positive multiplier, the
            /// mapped output always lands within [min, max] * multiplier,
            /// regardless of spread or how far out of [0, 1] the raw input is.
            #[test]
            fn mapped_output_stays_within_scaled_range(
                raw in -10.0f64..10.0,
                lo in -100.0f64..100.0,
                span in 0.0f64..200.0,
                curve in 0.1f64..8.0,
                multiplier in 0.1f64..4.0,
                spread in spread_strategy(),
            ) {
                let m = ParameterMapping {
                    min: lo,
                    max: lo + span,
                    multiplier,
                    curve,
                    spread,
                    control: ControlSource::Pressure,
                    default: 0.0,
                };
                let out = m.map_value(raw) / multiplier;
                prop_assert!(out >= m.min - 1e-6 && out <= m.max + 1e-6);
            }
        }
    }

    #[test]
    fn default_factories_match_source_constants() {
        let d = ParameterMapping::default_note_duration();
        assert_eq!(d.control, ControlSource::TiltXY);
        assert_eq!(d.spread, Spread::Inverse);
        assert!((d.min - 0.15).abs() < 1e-9);
        assert!((d.max - 1.5).abs() < 1e-9);

        let pb = ParameterMapping::default_pitch_bend();
        assert_eq!(pb.control, ControlSource::Yaxis);
        assert_eq!(pb.spread, Spread::Central);
        assert!((pb.curve - 4.0).abs() < 1e-9);

        let v = ParameterMapping::default_note_velocity();
        assert_eq!(v.control, ControlSource::Pressure);
        assert!((v.max - 127.0).abs() < 1e-9);
    }
}
