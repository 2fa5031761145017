use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::{ClientConfig, ClientContext, Message, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig};

/// A message with a payload, detached from the consumer that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum PolledMessage {
    Payload(InboundMessage),
    /// No more messages on this partition for now. Informational only.
    PartitionEnd { partition: i32 },
    Error(KafkaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The client recovers by itself, keep polling.
    Transient,
    /// The consumer cannot make progress, the loop must stop.
    Fatal,
}

/// The consuming half of the broker adapter, as seen by the pipeline loop.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits up to `timeout` for the next message. `None` means nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Option<PolledMessage>;

    /// Marks the message as handled, its offset goes out with the next auto-commit.
    fn acknowledge(&mut self, message: &InboundMessage) -> Result<(), KafkaError>;

    /// Commits what was acknowledged and leaves the group. Safe to call twice.
    fn close(&mut self);
}

pub fn classify(error: &KafkaError) -> ErrorSeverity {
    match error {
        KafkaError::PartitionEOF(_) => ErrorSeverity::Transient,
        KafkaError::MessageConsumptionFatal(_)
        | KafkaError::Canceled
        | KafkaError::ClientCreation(_)
        | KafkaError::Subscription(_) => ErrorSeverity::Fatal,
        other => match other.rdkafka_error_code() {
            Some(code) if is_fatal_code(code) => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Transient,
        },
    }
}

fn is_fatal_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::Fatal
            | RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownTopicOrPartition
    )
}

pub struct WorkerConsumerContext;

impl ClientContext for WorkerConsumerContext {}

impl ConsumerContext for WorkerConsumerContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!("assigned {} partitions", partitions.count());
                metrics::counter!("kafka_consumer_rebalances_total", "event" => "assign")
                    .increment(1);
            }
            Rebalance::Revoke(partitions) => {
                info!("revoked {} partitions", partitions.count());
                metrics::counter!("kafka_consumer_rebalances_total", "event" => "revoke")
                    .increment(1);
            }
            Rebalance::Error(e) => {
                error!("rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("committed consumer offsets"),
            // Nothing was stored since the previous commit
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => {
                warn!("failed to commit consumer offsets: {}", e);
                metrics::counter!("kafka_consumer_commit_errors_total").increment(1);
            }
        }
    }
}

pub struct KafkaConsumer {
    consumer: StreamConsumer<WorkerConsumerContext>,
    subscription: BTreeSet<String>,
    closed: bool,
}

impl KafkaConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set("client.id", &consumer_config.kafka_client_id)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "enable.auto.commit",
                consumer_config.kafka_consumer_auto_commit.to_string(),
            )
            .set(
                "auto.commit.interval.ms",
                consumer_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set(
                "session.timeout.ms",
                consumer_config.kafka_consumer_session_timeout_ms.to_string(),
            )
            .set("enable.partition.eof", "true");

        // Offsets are stored once a message is handled, never on receipt
        client_config.set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<WorkerConsumerContext> =
            client_config.create_with_context(WorkerConsumerContext)?;

        Ok(Self {
            consumer,
            subscription: BTreeSet::new(),
            closed: false,
        })
    }

    /// Joins the consumer group on `topics`. Subscribing again to the same
    /// set is a no-op, a different set replaces the current subscription.
    pub fn subscribe<I, S>(&mut self, topics: I) -> Result<(), KafkaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(KafkaError::Subscription("no topic to subscribe to".to_owned()));
        }
        if topics == self.subscription {
            debug!("already subscribed to {:?}", topics);
            return Ok(());
        }

        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names)?;
        info!("subscribed to {:?}", names);

        self.subscription = topics;
        self.closed = false;
        Ok(())
    }

    pub fn subscription(&self) -> &BTreeSet<String> {
        &self.subscription
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Option<PolledMessage> {
        let received = tokio::time::timeout(timeout, self.consumer.recv()).await.ok()?;

        let polled = match received {
            Ok(message) => PolledMessage::Payload(InboundMessage {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec),
            }),
            Err(KafkaError::PartitionEOF(partition)) => PolledMessage::PartitionEnd { partition },
            Err(e) => PolledMessage::Error(e),
        };
        Some(polled)
    }

    fn acknowledge(&mut self, message: &InboundMessage) -> Result<(), KafkaError> {
        // The committed offset is the next one to read
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => info!("committed final consumer offsets"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {
                debug!("no offset to commit on close")
            }
            Err(e) => warn!("failed to commit final consumer offsets: {}", e),
        }
        self.consumer.unsubscribe();
        self.subscription.clear();
        info!("kafka consumer closed");
    }
}

impl Drop for KafkaConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka_producer::{DeliveryOutcome, EventProducer, KafkaEventProducer};
    use crate::test::{create_mock_kafka, mock_consumer_config, mock_kafka_config};

    #[tokio::test]
    async fn consumes_and_acknowledges_produced_messages() {
        let (cluster, producer) = create_mock_kafka().await;
        cluster
            .create_topic("image", 1, 1)
            .expect("failed to create topic");
        let producer = KafkaEventProducer::new(producer);

        let payload = r#"{"new_file":"cat.png"}"#;
        let mut delivered = false;
        for _ in 0..20 {
            let pending = producer
                .produce("image", "cat.png", payload)
                .expect("failed to enqueue");
            if let DeliveryOutcome::Delivered { .. } = pending.await {
                delivered = true;
                break;
            }
        }
        assert!(delivered);

        let mut consumer = KafkaConsumer::new(
            &mock_kafka_config(&cluster),
            &mock_consumer_config("text-group", "image"),
        )
        .expect("failed to create consumer");
        consumer.subscribe(["image"]).expect("failed to subscribe");
        // Same set again is a no-op
        consumer.subscribe(["image"]).expect("failed to resubscribe");
        assert_eq!(consumer.subscription().len(), 1);

        let mut received = None;
        for _ in 0..100 {
            if let Some(PolledMessage::Payload(message)) =
                consumer.poll(Duration::from_millis(200)).await
            {
                received = Some(message);
                break;
            }
        }
        let message = received.expect("no message consumed");
        assert_eq!(message.topic, "image");
        assert_eq!(message.key.as_deref(), Some("cat.png".as_bytes()));
        assert_eq!(message.payload.as_deref(), Some(payload.as_bytes()));

        consumer
            .acknowledge(&message)
            .expect("failed to store offset");
        consumer.close();
        consumer.close();
        assert!(consumer.subscription().is_empty());
    }

    #[test]
    fn fatal_errors_stop_the_loop() {
        let fatal = [
            KafkaError::MessageConsumptionFatal(RDKafkaErrorCode::Fatal),
            KafkaError::Global(RDKafkaErrorCode::Authentication),
            KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition),
            KafkaError::MessageConsumption(RDKafkaErrorCode::TopicAuthorizationFailed),
            KafkaError::Canceled,
        ];
        for error in fatal {
            assert_eq!(classify(&error), ErrorSeverity::Fatal, "{error:?}");
        }
    }

    #[test]
    fn transient_errors_keep_polling() {
        let transient = [
            KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut),
            KafkaError::MessageConsumption(RDKafkaErrorCode::OffsetOutOfRange),
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure),
            KafkaError::PartitionEOF(3),
        ];
        for error in transient {
            assert_eq!(classify(&error), ErrorSeverity::Transient, "{error:?}");
        }
    }
}
