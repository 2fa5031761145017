use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::kafka_messages::image_uploaded::ImageUploadedEvent;
use common_kafka::kafka_messages::notification::NotificationEvent;
use pipeline::Processor;
use tracing::info;

use crate::annotate::{source_path, AnnotateError, ImageAnnotator};

/// Name of the operation, as shown to users in notifications.
pub const TEXT_OPERATION: &str = "adição de texto";

/// Annotates every uploaded image and reports it with a notification.
pub struct AnnotationProcessor<A> {
    annotator: Arc<A>,
    upload_dir: PathBuf,
}

impl<A: ImageAnnotator + 'static> AnnotationProcessor<A> {
    pub fn new(annotator: A, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            annotator: Arc::new(annotator),
            upload_dir: upload_dir.into(),
        }
    }
}

#[async_trait]
impl<A: ImageAnnotator + 'static> Processor for AnnotationProcessor<A> {
    type Input = ImageUploadedEvent;
    type Output = NotificationEvent;
    type Error = AnnotateError;

    async fn process(
        &self,
        input: ImageUploadedEvent,
    ) -> Result<Option<NotificationEvent>, AnnotateError> {
        let source = source_path(&self.upload_dir, &input.new_file_name)?;

        // Decoding and encoding are CPU bound, keep them off the runtime threads
        let annotator = self.annotator.clone();
        let output = tokio::task::spawn_blocking(move || annotator.annotate(&source)).await??;
        info!(
            "annotated {} into {}",
            input.new_file_name,
            output.display()
        );
        metrics::counter!("text_annotations_total").increment(1);

        Ok(Some(NotificationEvent::for_operation(
            &input.new_file_name,
            TEXT_OPERATION,
        )))
    }
}
