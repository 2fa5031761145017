pub mod config;
pub mod kafka_consumer;
pub mod kafka_messages;
pub mod kafka_producer;
pub mod test;

pub const IMAGE_TOPIC: &str = "image";
pub const NOTIFICATION_TOPIC: &str = "notification";
