//! Decoding of the `release` payload Helm stores in its release Secrets.
//!
//! The Secret's `data.release` is base64 (Kubernetes encoding) of base64
//! (Helm encoding) of a gzip stream holding the release document. Some
//! tooling hands over the already-unwrapped Helm layer, so decoding tries
//! one base64 layer first and a second one only when gzip fails.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid base64 in release payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Release payload is not gzip data: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("Failed to parse release document: {0}")]
    Document(String),

    #[error("Release document is not a mapping")]
    NotAMapping,

    #[error("Secret '{0}' has no release payload")]
    MissingPayload(String),
}

/// Decodes a release payload into its structured document.
pub fn decode_release(payload: &str) -> Result<Value, DecodeError> {
    let first = STANDARD.decode(payload.trim())?;

    let raw = match gunzip(&first) {
        Ok(raw) => raw,
        Err(_) => {
            log::debug!("First gzip decompression failed, trying second base64 layer");
            let trimmed = trim_ascii(&first);
            let second = STANDARD.decode(trimmed)?;
            gunzip(&second).map_err(DecodeError::Gzip)?
        }
    };

    let document: Value =
        serde_yaml::from_slice(&raw).map_err(|e| DecodeError::Document(e.to_string()))?;

    if !document.is_object() {
        return Err(DecodeError::NotAMapping);
    }
    Ok(document)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &data[start..end]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    /// Encodes a release document the way it appears in a Secret's `data.release`.
    pub(crate) fn encode_release(document: &Value) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_string(document).unwrap().as_bytes())
            .unwrap();
        let gz = encoder.finish().unwrap();
        let helm_layer = STANDARD.encode(gz);
        STANDARD.encode(helm_layer)
    }

    #[test]
    fn test_double_base64() {
        let doc = json!({"name": "web", "config": {"replicas": 2}});
        let decoded = decode_release(&encode_release(&doc)).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_single_base64() {
        let doc = json!({"name": "web"});
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"name: web\n").unwrap();
        let payload = STANDARD.encode(encoder.finish().unwrap());

        assert_eq!(decode_release(&payload).unwrap(), doc);
    }

    #[test]
    fn test_invalid_base64() {
        assert!(matches!(
            decode_release("not base64 at all!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_not_gzip() {
        let payload = STANDARD.encode(STANDARD.encode("plain text"));
        assert!(matches!(decode_release(&payload), Err(DecodeError::Gzip(_))));
    }
}
