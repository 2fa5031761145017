use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_messages::OutboundEvent;
use common_kafka::kafka_producer::{DeliveryOutcome, EventProducer, ProduceError};
use thiserror::Error;
use tracing::{error, info, warn};

/// When the loop waits for the broker to confirm a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Wait for each confirmation before moving on. Slower, but nothing is
    /// left in flight when the inbound offset gets stored.
    EachPublish,
    /// Report confirmations in the background, flush once at shutdown.
    OnShutdown,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseFlushPolicyError(String);

impl std::fmt::Display for ParseFlushPolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown flush policy {}, expected each_publish or on_shutdown", self.0)
    }
}

impl FromStr for FlushPolicy {
    type Err = ParseFlushPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "each_publish" => Ok(FlushPolicy::EachPublish),
            "on_shutdown" => Ok(FlushPolicy::OnShutdown),
            _ => Err(ParseFlushPolicyError(s.to_owned())),
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Produce(#[from] ProduceError),
}

/// Writes events to a single topic through a producer shared for the whole
/// process lifetime.
pub struct Publisher {
    producer: Arc<dyn EventProducer>,
    topic: String,
    policy: FlushPolicy,
    flush_timeout: Duration,
}

impl Publisher {
    pub fn new(
        producer: Arc<dyn EventProducer>,
        topic: &str,
        policy: FlushPolicy,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
            policy,
            flush_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serializes and enqueues the event, keyed by its partition key.
    /// Delivery failures are only reported, never retried nor returned.
    pub async fn publish<E: OutboundEvent>(&self, event: &E) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;
        let key = event.partition_key();

        let pending = self.producer.produce(&self.topic, &key, &payload)?;
        info!(topic = %self.topic, key = %key, "published event: {}", payload);

        match self.policy {
            FlushPolicy::EachPublish => report_delivery(&pending.await),
            FlushPolicy::OnShutdown => {
                tokio::spawn(async move { report_delivery(&pending.await) });
            }
        }
        Ok(())
    }

    /// Gives in-flight messages up to the flush timeout to go out. Whatever is
    /// still pending afterwards is abandoned.
    pub fn flush(&self) {
        match self.producer.flush(self.flush_timeout) {
            Ok(()) => info!("flushed producer for topic {}", self.topic),
            Err(e) => {
                warn!(
                    "abandoning pending deliveries to {} after {:?}: {}",
                    self.topic, self.flush_timeout, e
                );
                metrics::counter!("pipeline_producer_flush_errors_total").increment(1);
            }
        }
    }
}

/// Delivery callback: logs and counts, nothing else.
pub fn report_delivery(outcome: &DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Delivered {
            topic,
            key,
            partition,
            offset,
        } => {
            info!(
                "record {} successfully produced to {} [{}] at offset {}",
                key, topic, partition, offset
            );
            metrics::counter!("pipeline_deliveries_total", "outcome" => "delivered").increment(1);
        }
        DeliveryOutcome::Failed { topic, key, error } => {
            error!("delivery failed for record {} to {}: {}", key, topic, error);
            metrics::counter!("pipeline_deliveries_total", "outcome" => "failed").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use common_kafka::kafka_messages::notification::NotificationEvent;
    use serde_json::json;

    use super::*;
    use crate::test_utils::RecordingProducer;

    fn publisher(producer: &Arc<RecordingProducer>, policy: FlushPolicy) -> Publisher {
        Publisher::new(
            producer.clone(),
            "notification",
            policy,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn parse_flush_policy() {
        assert_eq!("each_publish".parse(), Ok(FlushPolicy::EachPublish));
        assert_eq!(" ON_SHUTDOWN".parse(), Ok(FlushPolicy::OnShutdown));
        assert!("sometimes".parse::<FlushPolicy>().is_err());
    }

    #[tokio::test]
    async fn publish_keys_by_original_filename() {
        let producer = Arc::new(RecordingProducer::default());
        let publisher = publisher(&producer, FlushPolicy::EachPublish);

        for operation in ["adição de texto", "redimensionamento"] {
            publisher
                .publish(&NotificationEvent::for_operation("cat.png", operation))
                .await
                .expect("failed to publish");
        }

        let records = producer.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.topic == "notification"));
        assert_eq!(records[0].key, "cat.png");
        assert_eq!(records[0].key, records[1].key);
        assert_json_eq!(
            records[0].json(),
            json!({
                "original_filename": "cat.png",
                "operation": "adição de texto",
                "body": "O arquivo cat.png recebeu a operação de adição de texto."
            })
        );
    }

    #[tokio::test]
    async fn delivery_failures_are_not_publish_errors() {
        let producer = Arc::new(RecordingProducer::failing_deliveries());
        let publisher = publisher(&producer, FlushPolicy::EachPublish);

        publisher
            .publish(&NotificationEvent::for_operation("cat.png", "adição de texto"))
            .await
            .expect("delivery failures are only reported");
        assert_eq!(producer.records().len(), 1);
    }

    #[tokio::test]
    async fn enqueue_failures_are_returned() {
        let producer = Arc::new(RecordingProducer::rejecting());
        let publisher = publisher(&producer, FlushPolicy::OnShutdown);

        let result = publisher
            .publish(&NotificationEvent::for_operation("cat.png", "adição de texto"))
            .await;
        assert!(matches!(result, Err(PublishError::Produce(_))));
    }

    #[tokio::test]
    async fn flush_goes_through_the_producer() {
        let producer = Arc::new(RecordingProducer::default());
        let publisher = publisher(&producer, FlushPolicy::OnShutdown);

        publisher.flush();
        assert_eq!(producer.flushes(), 1);
    }
}
