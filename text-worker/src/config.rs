use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;
use pipeline::config::EnvMsDuration;
use pipeline::FlushPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    // Where the upload service stores incoming files
    #[envconfig(default = "/appdata/static/uploads/")]
    pub text_upload_dir: String,

    // Relative to the directory of each source image
    #[envconfig(default = "processed/text")]
    pub text_output_subdir: String,

    #[envconfig(default = "_text")]
    pub text_output_suffix: String,

    #[envconfig(default = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")]
    pub text_font_path: String,

    #[envconfig(default = "35")]
    pub text_font_size: f32,

    #[envconfig(default = "100")]
    pub poll_timeout: EnvMsDuration,

    #[envconfig(default = "notification")]
    pub notification_topic: String,

    #[envconfig(default = "each_publish")]
    pub flush_policy: FlushPolicy,

    #[envconfig(default = "10000")]
    pub shutdown_flush_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
