use common_kafka::kafka_messages::InboundEvent;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("failed to parse payload: {0}")]
    Parse(String),
    #[error("missing required field {0}")]
    MissingField(&'static str),
}

/// Projects a raw payload onto a typed event. Either every required field is
/// there as a non-empty string, or the whole message is rejected.
pub fn decode<E: InboundEvent>(raw: &[u8]) -> Result<E, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Parse(e.to_string()))?;

    let Value::Object(fields) = &value else {
        return Err(DecodeError::Parse("payload is not a JSON object".to_owned()));
    };

    for &field in E::REQUIRED_FIELDS {
        match fields.get(field) {
            Some(Value::String(s)) if !s.is_empty() => {}
            _ => return Err(DecodeError::MissingField(field)),
        }
    }

    serde_json::from_value(value).map_err(|e| DecodeError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use common_kafka::kafka_messages::image_uploaded::ImageUploadedEvent;
    use common_kafka::kafka_messages::notification::NotificationEvent;

    use super::*;

    #[test]
    fn decodes_image_events() {
        let event: ImageUploadedEvent =
            decode(br#"{"new_file": "cat.png", "size": 1024}"#).expect("failed to decode");
        assert_eq!(event.new_file_name, "cat.png");
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases: [&[u8]; 5] = [
            b"",
            b"not json",
            b"[\"new_file\"]",
            b"\"cat.png\"",
            &[0xff, 0xfe, 0x00],
        ];
        for raw in cases {
            assert!(
                matches!(decode::<ImageUploadedEvent>(raw), Err(DecodeError::Parse(_))),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn rejects_missing_or_empty_required_fields() {
        let cases = [
            r#"{}"#,
            r#"{"new_file": null}"#,
            r#"{"new_file": ""}"#,
            r#"{"new_file": 42}"#,
            r#"{"newFile": "cat.png"}"#,
        ];
        for raw in cases {
            assert_eq!(
                decode::<ImageUploadedEvent>(raw.as_bytes()),
                Err(DecodeError::MissingField("new_file")),
                "{raw}"
            );
        }
    }

    #[test]
    fn notification_only_requires_a_body() {
        let event: NotificationEvent =
            decode(br#"{"body": "hello"}"#).expect("failed to decode");
        assert_eq!(event.body, "hello");
        assert_eq!(event.original_filename, "");

        assert_eq!(
            decode::<NotificationEvent>(br#"{"body": "", "original_filename": "cat.png"}"#),
            Err(DecodeError::MissingField("body"))
        );
    }

    #[test]
    fn notification_context_does_not_reject_a_valid_body() {
        let cases: [&[u8]; 3] = [
            br#"{"body": "hello", "original_filename": null}"#,
            br#"{"body": "hello", "operation": 7}"#,
            br#"{"body": "hello", "original_filename": ["cat.png"], "operation": null}"#,
        ];
        for raw in cases {
            let event: NotificationEvent = decode(raw).expect("failed to decode");
            assert_eq!(event.body, "hello");
            assert_eq!(event.original_filename, "");
        }
    }
}
