use std::time::Duration;

use reqwest::{multipart, Client};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::AppConfig;

/// Lowercase hex SHA-256 of the uploaded bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Hands an uploaded document to the external indexer and returns how many
/// chunks it stored. Callers treat every error as non-fatal.
pub async fn index_document(
    http_client: &Client,
    config: &AppConfig,
    document_id: &str,
    filename: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<i32, String> {
    let base_url = config
        .document_indexer_url
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "Document indexer is not configured".to_string())?;

    let part = multipart::Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(content_type)
        .map_err(|e| format!("Invalid content type {content_type}: {e}"))?;
    let form = multipart::Form::new()
        .text("document_id", document_id.to_string())
        .part("file", part);

    let mut request = http_client
        .post(base_url)
        .multipart(form)
        .timeout(Duration::from_secs(60));
    if let Some(api_key) = config
        .document_indexer_api_key
        .as_deref()
        .filter(|value| !value.is_empty())
    {
        request = request.header("Authorization", format!("Bearer {api_key}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("Indexer request failed: {e}"))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse indexer response: {e}"))?;

    if !status.is_success() {
        let message = body
            .get("detail")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(format!("Indexer error ({status}): {message}"));
    }

    parse_chunk_count(&body)
}

fn parse_chunk_count(body: &Value) -> Result<i32, String> {
    body.get("chunk_count")
        .or_else(|| body.get("chunks_indexed"))
        .and_then(Value::as_i64)
        .and_then(|count| i32::try_from(count).ok())
        .filter(|count| *count >= 0)
        .ok_or_else(|| "Missing chunk_count in indexer response".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_chunk_count, sha256_hex};

    #[test]
    fn hashes_bytes_as_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_hex(b"").len(), 64);
    }

    #[test]
    fn reads_chunk_count_from_either_key() {
        assert_eq!(parse_chunk_count(&json!({"chunk_count": 12})), Ok(12));
        assert_eq!(parse_chunk_count(&json!({"chunks_indexed": 3})), Ok(3));
        assert!(parse_chunk_count(&json!({"chunk_count": -1})).is_err());
        assert!(parse_chunk_count(&json!({})).is_err());
    }
}
