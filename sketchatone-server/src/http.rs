// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Hand-rolled GET-only static file server.
//!
//! A single-method, single-directory contract doesn't warrant pulling in a
//! general HTTP framework, so this reads the request line directly off a
//! `tokio::net::TcpStream`.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::ServerError;

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("js", "application/javascript"),
    ("css", "text/css"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("eot", "application/vnd.ms-fontobject"),
];

fn mime_for(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MIME_TYPES
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
        })
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

/// Accept loop; runs until the process shuts down. Each connection is
/// handled on its own task so one slow client can't stall others.
pub async fn run(addr: std::net::SocketAddr, public_dir: PathBuf) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, public_dir = %public_dir.display(), "HTTP static server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "HTTP accept failed");
                continue;
            }
        };
        let public_dir = public_dir.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &public_dir).await {
                warn!(%peer, error = %err, "HTTP request failed");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, public_dir: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }

    // Consume headers up to the blank line; this server has no use for them.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let mut stream = reader.into_inner();
    let mut parts = request_line.trim().split(' ');
    let (Some(method), Some(raw_path)) = (parts.next(), parts.next()) else {
        return Ok(());
    };

    if method != "GET" {
        return respond(&mut stream, 405, "Method Not Allowed", "text/plain", b"").await;
    }

    let url_path = raw_path.split('?').next().unwrap_or(raw_path);
    if url_path.contains("..") {
        return respond(&mut stream, 403, "Forbidden", "text/plain", b"").await;
    }

    let relative = if url_path == "/" { "index.html" } else { url_path.trim_start_matches('/') };
    let file_path = public_dir.join(relative);

    let is_file = tokio::fs::metadata(&file_path).await.map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return respond(&mut stream, 404, "Not Found", "text/plain", b"Not Found").await;
    }

    match tokio::fs::read(&file_path).await {
        Ok(content) => {
            let mime = mime_for(&file_path);
            respond(&mut stream, 200, "OK", mime, &content).await
        }
        Err(err) => {
            warn!(path = %file_path.display(), error = %err, "failed to read static file");
            respond(&mut stream, 500, "Internal Server Error", "text/plain", b"").await
        }
    }
}

async fn respond(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mime_table {
        use super::*;
        use rstest::rstest;

        #[rstest]
        #[case("index.html", "text/html")]
        #[case("app.js", "application/javascript")]
        #[case("style.CSS", "text/css")]
        #[case("data.json", "application/json")]
        #[case("logo.png", "image/png")]
        #[case("photo.JPG", "image/jpeg")]
        #[case("photo.jpeg", "image/jpeg")]
        #[case("anim.gif", "image/gif")]
        #[case("icon.svg", "image/svg+xml")]
        #[case("favicon.ico", "image/x-icon")]
        #[case("font.woff", "font/woff")]
        #[case("font.woff2", "font/woff2")]
        #[case("font.ttf", "font/ttf")]
        #[case("font.eot", "application/vnd.ms-fontobject")]
        #[case("data.bin", "application/octet-stream")]
        #[case("noext", "application/octet-stream")]
        fn mime_lookup_matches_known_extensions(#[case] name: &str, #[case] expected: &str) {
            assert_eq!(mime_for(Path::new(name)), expected);
        }
    }

    #[test]
    fn root_path_serves_index() {
        let relative = "/";
        let resolved = if relative == "/" { "index.html" } else { relative.trim_start_matches('/') };
        assert_eq!(resolved, "index.html");
    }

    #[test]
    fn traversal_attempt_is_detected() {
        assert!("/../../etc/passwd".contains(".."));
        assert!(!"/assets/app.js".contains(".."));
    }
}
