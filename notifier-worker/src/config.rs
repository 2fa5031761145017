use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;
use pipeline::config::EnvMsDuration;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3303")]
    pub port: u16,

    #[envconfig(default = "smtp.gmail.com")]
    pub smtp_host: String,

    // Implicit TLS
    #[envconfig(default = "465")]
    pub smtp_port: u16,

    // Defaults to the sender address
    pub smtp_username: Option<String>,

    pub smtp_password: String,

    #[envconfig(default = "30000")]
    pub smtp_timeout: EnvMsDuration,

    pub mail_from: String,

    // Every notification goes to this single address
    pub mail_to: String,

    #[envconfig(default = "Alerta de Processamento de Imagem")]
    pub mail_subject: String,

    #[envconfig(default = "1000")]
    pub poll_timeout: EnvMsDuration,

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

    pub fn smtp_username(&self) -> &str {
        self.smtp_username.as_deref().unwrap_or(&self.mail_from)
    }
}
