//! Command payload encoding for size-limited exec transports.
//!
//! Every command is base64-encoded so quoting, heredocs and special characters survive the
//! transport untouched; the sandbox side runs `base64 -d | bash`. When that wrapper would reach
//! the configured threshold the raw bytes are gzip-compressed first and the sandbox side
//! adds `gunzip` to the pipeline.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::errors::SessionError;

/// Wrapper length at which the encoder switches to gzip+base64.
///
/// The exec transport this crate was built against rejects command payloads above 2048 bytes;
/// the remainder is headroom for the argv framing around the payload.
pub const DEFAULT_GZIP_THRESHOLD: usize = 1900;

const PLAIN_SUFFIX: &str = " | base64 -d | bash";
const GZIP_SUFFIX: &str = " | base64 -d | gunzip | bash";

/// A command payload ready to be handed to `bash -lc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub payload: String,
    pub compressed: bool,
}

/// Pure encoder over an explicit size threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEncoder {
    gzip_threshold: usize,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_GZIP_THRESHOLD)
    }
}

impl CommandEncoder {
    pub fn new(gzip_threshold: usize) -> Self {
        Self { gzip_threshold }
    }

    pub fn gzip_threshold(&self) -> usize {
        self.gzip_threshold
    }

    pub fn encode(&self, command: &str) -> Result<EncodedCommand, SessionError> {
        if command.trim().is_empty() {
            return Err(SessionError::input("command is required"));
        }

        let plain = format!("echo {}{}", B64.encode(command.as_bytes()), PLAIN_SUFFIX);
        if plain.len() < self.gzip_threshold {
            return Ok(EncodedCommand {
                payload: plain,
                compressed: false,
            });
        }

        let compressed = gzip(command.as_bytes())?;
        let payload = format!("echo {}{}", B64.encode(compressed), GZIP_SUFFIX);
        if payload.len() >= self.gzip_threshold {
            tracing::warn!(
                plain_len = plain.len(),
                compressed_len = payload.len(),
                threshold = self.gzip_threshold,
                "compressed command payload still exceeds the transport threshold"
            );
        }
        Ok(EncodedCommand {
            payload,
            compressed: true,
        })
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, SessionError> {
    // GzEncoder writes a zero mtime header, so the output is deterministic for a given input.
    let mut enc = GzEncoder::new(Vec::new(), Compression::best());
    enc.write_all(bytes)?;
    Ok(enc.finish()?)
}

/// Reverse a payload produced by [`CommandEncoder::encode`] into the script it runs.
pub fn decode_payload(payload: &str) -> Result<String, SessionError> {
    let (body, compressed) = if let Some(b) = payload.strip_suffix(GZIP_SUFFIX) {
        (b, true)
    } else if let Some(b) = payload.strip_suffix(PLAIN_SUFFIX) {
        (b, false)
    } else {
        return Err(SessionError::Protocol(
            "payload does not end in a base64 decode pipeline".to_string(),
        ));
    };
    let b64 = body
        .strip_prefix("echo ")
        .ok_or_else(|| SessionError::Protocol("payload does not start with echo".to_string()))?;
    let raw = B64
        .decode(b64.trim())
        .map_err(|e| SessionError::Protocol(format!("invalid base64 payload: {e}")))?;
    let bytes = if compressed {
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        out
    } else {
        raw
    };
    String::from_utf8(bytes)
        .map_err(|e| SessionError::Protocol(format!("payload is not UTF-8: {e}")))
}
