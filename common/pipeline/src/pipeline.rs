use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_kafka::kafka_consumer::{
    classify, ErrorSeverity, InboundMessage, MessageSource, PolledMessage,
};
use common_kafka::kafka_messages::{InboundEvent, OutboundEvent};
use health::HealthHandle;
use rdkafka::error::KafkaError;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decode::decode;
use crate::publisher::Publisher;

/// The domain operation a worker runs for each decoded message.
///
/// Messages are delivered at least once: the same input can be processed
/// more than once after a crash or a rebalance, and nothing here filters
/// duplicates out.
#[async_trait]
pub trait Processor: Send + Sync {
    type Input: InboundEvent + Send + 'static;
    type Output: OutboundEvent + Send + Sync;
    type Error: std::error::Error + Send;

    /// `Ok(Some(event))` asks the pipeline to publish `event`.
    async fn process(&self, input: Self::Input) -> Result<Option<Self::Output>, Self::Error>;
}

/// Output type for processors that never publish.
#[derive(Debug, Serialize)]
pub enum NoOutput {}

impl OutboundEvent for NoOutput {
    fn partition_key(&self) -> String {
        match *self {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    ShuttingDown,
    Stopped,
}

/// What happened to one message with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Could not be decoded, dropped.
    Discarded,
    /// The processor returned an error, dropped.
    Failed,
    /// Processed, nothing to publish.
    Processed,
    /// Processed and the resulting event was enqueued.
    Published,
    /// Processed, but the resulting event could not be enqueued.
    PublishFailed,
}

impl MessageOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            MessageOutcome::Discarded => "discarded",
            MessageOutcome::Failed => "failed",
            MessageOutcome::Processed => "processed",
            MessageOutcome::Published => "published",
            MessageOutcome::PublishFailed => "publish_failed",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fatal broker error: {0}")]
    Broker(#[from] KafkaError),
}

const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Pipeline<S, P> {
    name: String,
    source: S,
    processor: P,
    publisher: Option<Publisher>,
    poll_timeout: Duration,
    liveness: Option<HealthHandle>,
    state: PipelineState,
}

impl<S, P> Pipeline<S, P>
where
    S: MessageSource,
    P: Processor,
{
    /// `source` must already be subscribed: the pipeline starts out running.
    pub fn new(name: &str, source: S, processor: P, poll_timeout: Duration) -> Self {
        Self {
            name: name.to_owned(),
            source,
            processor,
            publisher: None,
            poll_timeout,
            liveness: None,
            state: PipelineState::Running,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Polls and handles messages until `shutdown` fires or the broker fails
    /// for good. The consumer is closed and the producer flushed either way.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!("{} pipeline running", self.name);
        let result = self.consume(&shutdown).await;

        self.state = PipelineState::ShuttingDown;
        info!("{} pipeline shutting down", self.name);
        if let Some(publisher) = &self.publisher {
            publisher.flush();
        }
        self.source.close();

        self.state = PipelineState::Stopped;
        info!("{} pipeline stopped", self.name);
        result
    }

    async fn consume(&mut self, shutdown: &CancellationToken) -> Result<(), PipelineError> {
        let mut consecutive_errors: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested");
                return Ok(());
            }
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy().await;
            }

            let Some(polled) = self.source.poll(self.poll_timeout).await else {
                continue;
            };

            match polled {
                PolledMessage::PartitionEnd { partition } => {
                    info!("reached end of partition {}", partition);
                }
                PolledMessage::Error(e) => match classify(&e) {
                    ErrorSeverity::Fatal => {
                        error!("fatal kafka consumer error: {}", e);
                        metrics::counter!("pipeline_consumer_errors_total", "level" => "fatal")
                            .increment(1);
                        return Err(PipelineError::Broker(e));
                    }
                    ErrorSeverity::Transient => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        warn!("kafka consumer error: {}", e);
                        metrics::counter!("pipeline_consumer_errors_total", "level" => "warn")
                            .increment(1);
                        let backoff = (Duration::from_millis(100) * consecutive_errors)
                            .min(MAX_ERROR_BACKOFF);
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                },
                PolledMessage::Payload(message) => {
                    consecutive_errors = 0;
                    let outcome = self.handle_message(&message).await;
                    metrics::counter!("pipeline_messages_total", "outcome" => outcome.as_label())
                        .increment(1);

                    // Dropped messages are acknowledged too, there is no dead-letter topic
                    if let Err(e) = self.source.acknowledge(&message) {
                        warn!(
                            "failed to store offset {} for {}/{}: {}",
                            message.offset, message.topic, message.partition, e
                        );
                    }
                }
            }
        }
    }

    /// Decode, process, publish. Never fails: every error is logged here and
    /// turned into an outcome.
    pub async fn handle_message(&self, message: &InboundMessage) -> MessageOutcome {
        let raw = message.payload.as_deref().unwrap_or_default();
        debug!(
            "received message from {}: {}",
            message.topic,
            String::from_utf8_lossy(raw)
        );

        let event: P::Input = match decode(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "discarding message: {}", e
                );
                return MessageOutcome::Discarded;
            }
        };

        let started = Instant::now();
        let result = self.processor.process(event).await;
        metrics::histogram!("pipeline_process_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "failed to process message: {}", e
                );
                return MessageOutcome::Failed;
            }
        };

        let Some(output) = output else {
            return MessageOutcome::Processed;
        };

        let Some(publisher) = &self.publisher else {
            error!("{} pipeline has no publisher, dropping processed event", self.name);
            return MessageOutcome::PublishFailed;
        };

        match publisher.publish(&output).await {
            Ok(()) => MessageOutcome::Published,
            Err(e) => {
                error!(
                    topic = %publisher.topic(),
                    key = %output.partition_key(),
                    "failed to publish event: {}", e
                );
                MessageOutcome::PublishFailed
            }
        }
    }
}
