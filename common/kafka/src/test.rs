use std::time::Duration;

use health::HealthRegistry;
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::{create_kafka_producer, KafkaContext};

pub fn mock_kafka_config(cluster: &MockCluster<'static, DefaultProducerContext>) -> KafkaConfig {
    KafkaConfig {
        kafka_producer_linger_ms: 0,
        kafka_producer_queue_mib: 50,
        kafka_producer_queue_messages: 1000,
        kafka_message_timeout_ms: 5000,
        kafka_compression_codec: "none".to_string(),
        kafka_tls: false,
        kafka_hosts: cluster.bootstrap_servers(),
    }
}

pub fn mock_consumer_config(group: &str, topic: &str) -> ConsumerConfig {
    ConsumerConfig {
        kafka_consumer_group: group.to_string(),
        kafka_consumer_topic: topic.to_string(),
        kafka_client_id: format!("{group}-client"),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_consumer_auto_commit: true,
        kafka_consumer_auto_commit_interval_ms: 1000,
        kafka_consumer_session_timeout_ms: 6000,
    }
}

pub async fn create_mock_kafka() -> (
    MockCluster<'static, DefaultProducerContext>,
    FutureProducer<KafkaContext>,
) {
    let registry = HealthRegistry::new("liveness");
    let handle = registry
        .register("kafka-producer", Duration::from_secs(30))
        .await;
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    let config = mock_kafka_config(&cluster);

    let producer = create_kafka_producer(&config, handle)
        .await
        .expect("failed to create mocked kafka producer");
    (cluster, producer)
}
