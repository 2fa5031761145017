//! Consume notification events and forward each of them by email.
use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::KafkaConsumer;
use common_kafka::NOTIFICATION_TOPIC;
use common_metrics::{serve, setup_worker_router};
use envconfig::Envconfig;
use health::HealthRegistry;
use pipeline::signals::cancel_on_shutdown_signal;
use pipeline::Pipeline;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notifier_worker::config::Config;
use notifier_worker::error::WorkerError;
use notifier_worker::mail::{SmtpMailer, SmtpSettings};
use notifier_worker::processor::DispatchProcessor;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    ConsumerConfig::set_defaults("notifier-group", NOTIFICATION_TOPIC, "notifier-client");
    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let router = setup_worker_router(liveness.clone()).expect("failed to install metrics recorder");
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let settings = SmtpSettings {
        host: config.smtp_host.clone(),
        port: config.smtp_port,
        username: config.smtp_username().to_owned(),
        password: config.smtp_password.clone(),
        timeout: config.smtp_timeout.0,
    };
    let mailer = SmtpMailer::new(settings, &config.mail_from)?;
    let processor = DispatchProcessor::new(mailer, &config.mail_to, &config.mail_subject)?;

    let mut consumer = KafkaConsumer::new(&config.kafka, &config.consumer)?;
    consumer.subscribe(config.consumer.topics())?;

    // Each iteration can wait on a full SMTP session
    let pipeline_liveness = liveness
        .register("pipeline", Duration::from_secs(60))
        .await;

    let shutdown = CancellationToken::new();
    tokio::task::spawn(cancel_on_shutdown_signal(shutdown.clone()));

    let mut pipeline = Pipeline::new("notifier", consumer, processor, config.poll_timeout.0)
        .with_liveness(pipeline_liveness);

    if let Err(e) = pipeline.run(shutdown).await {
        error!("notifier worker stopped: {}", e);
        return Err(e.into());
    }

    info!("notifier worker exited cleanly");
    Ok(())
}
