use serde::{Deserialize, Serialize};

use super::InboundEvent;

/// Emitted by the upload service once a file landed in the upload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUploadedEvent {
    #[serde(rename = "new_file")]
    pub new_file_name: String,
}

impl InboundEvent for ImageUploadedEvent {
    const REQUIRED_FIELDS: &'static [&'static str] = &["new_file"];
}
