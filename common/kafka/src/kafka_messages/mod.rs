use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod image_uploaded;
pub mod notification;

/// A message type that can be read off a topic.
pub trait InboundEvent: DeserializeOwned {
    /// Fields that must be present as non-empty strings for the message to be valid.
    const REQUIRED_FIELDS: &'static [&'static str];
}

/// A message type that can be written to a topic.
pub trait OutboundEvent: Serialize {
    /// Messages sharing a key land on the same partition, in publish order.
    fn partition_key(&self) -> String;
}
