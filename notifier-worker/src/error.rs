use pipeline::PipelineError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::mail::MailError;

/// Errors that stop the worker, and make it exit non-zero.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to set up the kafka client: {0}")]
    Kafka(#[from] KafkaError),
    #[error("invalid mail settings: {0}")]
    Mail(#[from] MailError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
