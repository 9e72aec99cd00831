use crate::service::ProcessingError;
use serde_json::{Map, Value};

/// A parsed `POST /predict` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictRequest {
    /// Logical key or identifier of a published artifact
    pub file_id: String,
    /// Transform label; metadata only
    pub model: String,
}

impl PredictRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProcessingError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("Request body is required"));
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|_| invalid("Request body must be valid JSON"))?;

        let fields = match value {
            Value::Object(fields) if !fields.is_empty() => fields,
            Value::Object(_) | Value::Null => return Err(invalid("Request body is required")),
            _ => return Err(invalid("Request body must be a JSON object")),
        };

        Ok(Self {
            file_id: required(&fields, "fileId")?,
            model: required(&fields, "model")?,
        })
    }
}

fn required(fields: &Map<String, Value>, name: &str) -> Result<String, ProcessingError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(invalid(format!("Missing required field: {name}"))),
        Some(Value::String(value)) if value.is_empty() => {
            Err(invalid(format!("Missing required field: {name}")))
        }
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(invalid(format!("Field '{name}' must be a string"))),
    }
}

fn invalid(message: impl Into<String>) -> ProcessingError {
    ProcessingError::InvalidRequest(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(result: Result<PredictRequest, ProcessingError>) -> String {
        match result {
            Err(ProcessingError::InvalidRequest(message)) => message,
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_valid_request() {
        let request = PredictRequest::parse(br#"{"fileId": "data.bin", "model": "resnet"}"#).unwrap();
        assert_eq!(request.file_id, "data.bin");
        assert_eq!(request.model, "resnet");
    }

    #[test]
    fn test_both_fields_are_required() {
        assert_eq!(
            message(PredictRequest::parse(br#"{"model": "resnet"}"#)),
            "Missing required field: fileId"
        );
        assert_eq!(
            message(PredictRequest::parse(br#"{"fileId": "data.bin"}"#)),
            "Missing required field: model"
        );
        assert_eq!(
            message(PredictRequest::parse(br#"{"fileId": "", "model": "m"}"#)),
            "Missing required field: fileId"
        );
        assert_eq!(
            message(PredictRequest::parse(br#"{"fileId": 7, "model": "m"}"#)),
            "Field 'fileId' must be a string"
        );
    }

    #[test]
    fn test_malformed_bodies() {
        assert_eq!(message(PredictRequest::parse(b"")), "Request body is required");
        assert_eq!(message(PredictRequest::parse(b"{}")), "Request body is required");
        assert_eq!(
            message(PredictRequest::parse(b"{fileId")),
            "Request body must be valid JSON"
        );
    }
}
