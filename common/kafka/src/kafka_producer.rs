use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use health::HealthHandle;
use metrics::gauge;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();

        gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("kafka_producer_queue_bytes").set(stats.msg_size as f64);
        for (_, broker) in stats.brokers {
            gauge!("kafka_producer_broker_requests_pending", "broker" => broker.nodeid.to_string())
                .set(broker.outbuf_cnt as f64);
        }
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> = client_config.create_with_context(liveness.into())?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, Timeout::After(Duration::from_secs(15)))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

/// What the broker said about one produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        topic: String,
        key: String,
        partition: i32,
        offset: i64,
    },
    Failed {
        topic: String,
        key: String,
        error: String,
    },
}

/// Resolves exactly once, when the broker acknowledges or rejects the message
/// or the producer gives up on it.
pub type PendingDelivery = BoxFuture<'static, DeliveryOutcome>;

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("failed to enqueue message for kafka: {0}")]
    Enqueue(KafkaError),
    #[error("failed to flush the kafka producer: {0}")]
    Flush(KafkaError),
}

/// The producing half of the broker adapter.
pub trait EventProducer: Send + Sync {
    /// Enqueues the message without waiting for the network round-trip.
    fn produce(&self, topic: &str, key: &str, payload: &str)
        -> Result<PendingDelivery, ProduceError>;

    /// Waits until every enqueued message was attempted, up to `timeout`.
    fn flush(&self, timeout: Duration) -> Result<(), ProduceError>;
}

pub struct KafkaEventProducer {
    producer: FutureProducer<KafkaContext>,
}

impl KafkaEventProducer {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }
}

impl EventProducer for KafkaEventProducer {
    fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<PendingDelivery, ProduceError> {
        let record = FutureRecord {
            topic,
            key: Some(key),
            payload: Some(payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| ProduceError::Enqueue(e))?;

        let topic = topic.to_owned();
        let key = key.to_owned();
        Ok(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => DeliveryOutcome::Delivered {
                    topic,
                    key,
                    partition,
                    offset,
                },
                Ok(Err((e, _))) => DeliveryOutcome::Failed {
                    topic,
                    key,
                    error: e.to_string(),
                },
                // The producer was dropped before the message went out
                Err(_) => DeliveryOutcome::Failed {
                    topic,
                    key,
                    error: "delivery canceled".to_owned(),
                },
            }
        }
        .boxed())
    }

    fn flush(&self, timeout: Duration) -> Result<(), ProduceError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(ProduceError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    use super::*;
    use crate::test::create_mock_kafka;

    #[tokio::test]
    async fn produce_reports_delivery_outcomes() {
        let (cluster, producer) = create_mock_kafka().await;
        let producer = KafkaEventProducer::new(producer);

        // The mock cluster can take a moment to accept the first message
        let mut delivered = None;
        for _ in 0..20 {
            let pending = producer
                .produce("notification", "cat.png", r#"{"body":"hello"}"#)
                .expect("failed to enqueue");
            if let outcome @ DeliveryOutcome::Delivered { .. } = pending.await {
                delivered = Some(outcome);
                break;
            }
        }
        match delivered {
            Some(DeliveryOutcome::Delivered { topic, key, .. }) => {
                assert_eq!(topic, "notification");
                assert_eq!(key, "cat.png");
            }
            other => panic!("expected a delivery, got {other:?}"),
        }

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        let pending = producer
            .produce("notification", "cat.png", r#"{"body":"hello"}"#)
            .expect("failed to enqueue");
        match pending.await {
            DeliveryOutcome::Failed { key, .. } => assert_eq!(key, "cat.png"),
            other => panic!("expected a failure, got {other:?}"),
        }

        producer
            .flush(Duration::from_secs(5))
            .expect("failed to flush");
    }
}
