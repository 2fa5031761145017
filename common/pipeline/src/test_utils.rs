//! In-memory stand-ins for the broker, to drive a `Pipeline` without Kafka.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::kafka_consumer::{InboundMessage, MessageSource, PolledMessage};
use common_kafka::kafka_producer::{DeliveryOutcome, EventProducer, PendingDelivery, ProduceError};
use futures::FutureExt;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio_util::sync::CancellationToken;

pub fn payload(topic: &str, offset: i64, raw: &str) -> PolledMessage {
    PolledMessage::Payload(InboundMessage {
        topic: topic.to_owned(),
        partition: 0,
        offset,
        key: None,
        payload: Some(raw.as_bytes().to_vec()),
    })
}

/// Hands out a fixed script of poll results, then requests shutdown once it
/// runs dry, so `Pipeline::run` returns.
pub struct ScriptedSource {
    script: VecDeque<Option<PolledMessage>>,
    shutdown: CancellationToken,
    polls: usize,
    acknowledged: Vec<(i32, i64)>,
    closes: usize,
}

impl ScriptedSource {
    pub fn new<I>(script: I, shutdown: CancellationToken) -> Self
    where
        I: IntoIterator<Item = Option<PolledMessage>>,
    {
        Self {
            script: script.into_iter().collect(),
            shutdown,
            polls: 0,
            acknowledged: Vec::new(),
            closes: 0,
        }
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    /// (partition, offset) of every acknowledged message, in order.
    pub fn acknowledged(&self) -> &[(i32, i64)] {
        &self.acknowledged
    }

    pub fn closes(&self) -> usize {
        self.closes
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll(&mut self, _timeout: Duration) -> Option<PolledMessage> {
        self.polls += 1;
        match self.script.pop_front() {
            Some(next) => next,
            None => {
                self.shutdown.cancel();
                None
            }
        }
    }

    fn acknowledge(&mut self, message: &InboundMessage) -> Result<(), KafkaError> {
        self.acknowledged.push((message.partition, message.offset));
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedRecord {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

impl ProducedRecord {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).expect("produced payload is not json")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ProducerBehavior {
    #[default]
    Deliver,
    FailDelivery,
    RejectEnqueue,
}

/// Records every produce call and resolves deliveries immediately.
#[derive(Default)]
pub struct RecordingProducer {
    behavior: ProducerBehavior,
    records: Mutex<Vec<ProducedRecord>>,
    flushes: Mutex<usize>,
}

impl RecordingProducer {
    /// Enqueues fine, but the broker rejects every message.
    pub fn failing_deliveries() -> Self {
        Self {
            behavior: ProducerBehavior::FailDelivery,
            ..Default::default()
        }
    }

    /// Fails at enqueue time, like a full local queue.
    pub fn rejecting() -> Self {
        Self {
            behavior: ProducerBehavior::RejectEnqueue,
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<ProducedRecord> {
        self.records.lock().expect("poisoned records").clone()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().expect("poisoned flushes")
    }
}

impl EventProducer for RecordingProducer {
    fn produce(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<PendingDelivery, ProduceError> {
        if self.behavior == ProducerBehavior::RejectEnqueue {
            return Err(ProduceError::Enqueue(KafkaError::MessageProduction(
                RDKafkaErrorCode::QueueFull,
            )));
        }

        let mut records = self.records.lock().expect("poisoned records");
        records.push(ProducedRecord {
            topic: topic.to_owned(),
            key: key.to_owned(),
            payload: payload.to_owned(),
        });

        let outcome = match self.behavior {
            ProducerBehavior::FailDelivery => DeliveryOutcome::Failed {
                topic: topic.to_owned(),
                key: key.to_owned(),
                error: "Message production error: MessageSizeTooLarge".to_owned(),
            },
            _ => DeliveryOutcome::Delivered {
                topic: topic.to_owned(),
                key: key.to_owned(),
                partition: 0,
                offset: records.len() as i64 - 1,
            },
        };
        Ok(futures::future::ready(outcome).boxed())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), ProduceError> {
        *self.flushes.lock().expect("poisoned flushes") += 1;
        Ok(())
    }
}
