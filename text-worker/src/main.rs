//! Consume image upload events, write an annotated copy of each image and
//! publish a notification once it is done.
use std::sync::Arc;
use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::KafkaConsumer;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaEventProducer};
use common_kafka::IMAGE_TOPIC;
use common_metrics::{serve, setup_worker_router};
use envconfig::Envconfig;
use health::HealthRegistry;
use pipeline::signals::cancel_on_shutdown_signal;
use pipeline::{Pipeline, Publisher};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use text_worker::annotate::TextAnnotator;
use text_worker::config::Config;
use text_worker::error::WorkerError;
use text_worker::processor::AnnotationProcessor;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    ConsumerConfig::set_defaults("text-group", IMAGE_TOPIC, "text-client");
    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let router = setup_worker_router(liveness.clone()).expect("failed to install metrics recorder");
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let annotator = TextAnnotator::from_font_file(&config.text_font_path, config.text_font_size)?
        .with_output(&config.text_output_subdir, &config.text_output_suffix);
    let processor = AnnotationProcessor::new(annotator, &config.text_upload_dir);

    let producer_liveness = liveness
        .register("kafka-producer", Duration::from_secs(30))
        .await;
    let producer = create_kafka_producer(&config.kafka, producer_liveness).await?;
    let publisher = Publisher::new(
        Arc::new(KafkaEventProducer::new(producer)),
        &config.notification_topic,
        config.flush_policy,
        config.shutdown_flush_timeout.0,
    );

    let mut consumer = KafkaConsumer::new(&config.kafka, &config.consumer)?;
    consumer.subscribe(config.consumer.topics())?;

    let pipeline_liveness = liveness
        .register("pipeline", Duration::from_secs(30))
        .await;

    let shutdown = CancellationToken::new();
    tokio::task::spawn(cancel_on_shutdown_signal(shutdown.clone()));

    let mut pipeline = Pipeline::new("text", consumer, processor, config.poll_timeout.0)
        .with_publisher(publisher)
        .with_liveness(pipeline_liveness);

    if let Err(e) = pipeline.run(shutdown).await {
        error!("text worker stopped: {}", e);
        return Err(e.into());
    }

    info!("text worker exited cleanly");
    Ok(())
}
