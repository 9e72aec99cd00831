//! Wire-level request parsing.
//!
//! Bodies arrive as raw bytes so that malformed JSON is reported through the
//! standard error envelope instead of the framework's default rejection.

use crate::service::IngestionError;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_FILENAME: &str = "data.bin";

/// A parsed `POST /ingest` body
#[derive(Debug, Clone, PartialEq)]
pub enum IngestRequest {
    /// `{"key": ...}`: fetch the object from the origin store
    FromStore { key: String },
    /// `{"data": ..., "filename": ...}`: publish the payload itself
    Inline { data: Value, filename: String },
}

impl IngestRequest {
    pub fn parse(body: &[u8]) -> Result<Self, IngestionError> {
        let fields = parse_object(body)?;

        // `key` wins when both are present
        if let Some(key) = fields.get("key") {
            let key = key
                .as_str()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| invalid("Field 'key' must be a non-empty string"))?;
            return Ok(Self::FromStore {
                key: key.to_string(),
            });
        }

        if let Some(data) = fields.get("data") {
            let filename = match fields.get("filename") {
                None | Some(Value::Null) => DEFAULT_FILENAME.to_string(),
                Some(Value::String(name)) if !name.is_empty() => name.clone(),
                Some(_) => return Err(invalid("Field 'filename' must be a non-empty string")),
            };
            return Ok(Self::Inline {
                data: data.clone(),
                filename,
            });
        }

        Err(invalid("Request body must contain 'key' or 'data' field"))
    }
}

/// Bytes an inline payload is stored as: strings as UTF-8, anything else
/// as compact JSON.
pub fn inline_bytes(data: &Value) -> Result<Vec<u8>, IngestionError> {
    match data {
        Value::String(text) => Ok(text.as_bytes().to_vec()),
        other => serde_json::to_vec(other)
            .map_err(|e| invalid(format!("Field 'data' could not be serialized: {e}"))),
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, IngestionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(invalid("Request body is required"));
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|_| invalid("Request body must be valid JSON"))?;

    match value {
        Value::Object(fields) if !fields.is_empty() => Ok(fields),
        Value::Object(_) | Value::Null => Err(invalid("Request body is required")),
        _ => Err(invalid("Request body must be a JSON object")),
    }
}

fn invalid(message: impl Into<String>) -> IngestionError {
    IngestionError::InvalidRequest(message.into())
}

/// Object-created notification reduced to what ingestion needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    pub bucket: String,
    /// URL-decoded object key
    pub key: String,
    /// Size reported by the notification
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    #[serde(default)]
    size: u64,
}

impl ObjectCreated {
    /// Parse an S3 event notification. Only the first record is used.
    pub fn parse(body: &[u8]) -> Result<Self, IngestionError> {
        let event: S3Event = serde_json::from_slice(body)
            .map_err(|e| invalid(format!("Malformed object notification: {e}")))?;

        let record = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| invalid("Notification contains no records"))?;

        Ok(Self {
            bucket: record.s3.bucket.name,
            key: decode_key(&record.s3.object.key)?,
            size: record.s3.object.size,
        })
    }
}

/// Notification keys are form-encoded: `+` is a space, `%XX` an escaped byte
fn decode_key(raw: &str) -> Result<String, IngestionError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|key| key.into_owned())
        .map_err(|_| invalid(format!("Object key {raw:?} is not valid UTF-8 once decoded")))
}
