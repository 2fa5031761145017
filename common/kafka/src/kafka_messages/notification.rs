use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{InboundEvent, OutboundEvent};

/// Emitted by a processing worker after it completed an operation on a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub original_filename: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub operation: String,
    pub body: String,
}

/// Context fields are informational only: null or non-string values read as empty.
fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Ok(s),
        _ => Ok(String::new()),
    }
}

impl NotificationEvent {
    pub fn for_operation(original_filename: &str, operation: &str) -> Self {
        Self {
            original_filename: original_filename.to_owned(),
            operation: operation.to_owned(),
            body: format!("O arquivo {original_filename} recebeu a operação de {operation}."),
        }
    }
}

impl InboundEvent for NotificationEvent {
    const REQUIRED_FIELDS: &'static [&'static str] = &["body"];
}

impl OutboundEvent for NotificationEvent {
    fn partition_key(&self) -> String {
        self.original_filename.clone()
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        let event = NotificationEvent::for_operation("cat.png", "adição de texto");

        assert_json_eq!(
            serde_json::to_value(&event).expect("failed to serialize"),
            json!({
                "original_filename": "cat.png",
                "operation": "adição de texto",
                "body": "O arquivo cat.png recebeu a operação de adição de texto."
            })
        );
    }

    #[test]
    fn keyed_by_original_filename() {
        let first = NotificationEvent::for_operation("cat.png", "adição de texto");
        let second = NotificationEvent::for_operation("cat.png", "redimensionamento");

        assert_eq!(first.partition_key(), "cat.png");
        assert_eq!(first.partition_key(), second.partition_key());
    }

    #[test]
    fn context_fields_are_lenient() {
        let cases = [
            json!({"body": "hello"}),
            json!({"body": "hello", "original_filename": null, "operation": null}),
            json!({"body": "hello", "original_filename": 42, "operation": ["text"]}),
            json!({"body": "hello", "original_filename": {"name": "cat.png"}, "operation": false}),
        ];
        for case in cases {
            let event: NotificationEvent =
                serde_json::from_value(case.clone()).expect("failed to deserialize");
            assert_eq!(event.body, "hello", "{case}");
            assert_eq!(event.original_filename, "", "{case}");
            assert_eq!(event.operation, "", "{case}");
        }

        let event: NotificationEvent = serde_json::from_value(
            json!({"body": "hello", "original_filename": "cat.png", "operation": null}),
        )
        .expect("failed to deserialize");
        assert_eq!(event.original_filename, "cat.png");
        assert_eq!(event.partition_key(), "cat.png");
    }
}
