use pipeline::PipelineError;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::annotate::AnnotateError;

/// Errors that stop the worker, and make it exit non-zero.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to set up the kafka client: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to load the annotation font: {0}")]
    Font(#[from] AnnotateError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
