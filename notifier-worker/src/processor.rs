use async_trait::async_trait;
use common_kafka::kafka_messages::notification::NotificationEvent;
use lettre::message::Mailbox;
use pipeline::{NoOutput, Processor};

use crate::mail::{MailError, Mailer};

/// Forwards the body of every notification by email.
pub struct DispatchProcessor<M> {
    mailer: M,
    recipient: Mailbox,
    subject: String,
}

impl<M: Mailer> DispatchProcessor<M> {
    /// Fails on an invalid recipient, so a bad address stops the worker at startup.
    pub fn new(mailer: M, recipient: &str, subject: &str) -> Result<Self, MailError> {
        Ok(Self {
            mailer,
            recipient: recipient.parse()?,
            subject: subject.to_owned(),
        })
    }
}

#[async_trait]
impl<M: Mailer> Processor for DispatchProcessor<M> {
    type Input = NotificationEvent;
    type Output = NoOutput;
    type Error = MailError;

    async fn process(&self, input: NotificationEvent) -> Result<Option<NoOutput>, MailError> {
        let result = self
            .mailer
            .send(&self.recipient, &self.subject, &input.body)
            .await;

        let outcome = if result.is_ok() { "sent" } else { "failed" };
        metrics::counter!("notifier_mails_total", "outcome" => outcome).increment(1);

        result.map(|()| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _: &Mailbox, _: &str, _: &str) -> Result<(), MailError> {
            Ok(())
        }
    }

    #[test]
    fn recipient_is_validated_upfront() {
        assert!(DispatchProcessor::new(NullMailer, "ops@example.com", "subject").is_ok());
        for recipient in ["", "nobody", "ops@"] {
            assert!(
                matches!(
                    DispatchProcessor::new(NullMailer, recipient, "subject"),
                    Err(MailError::Address(_))
                ),
                "{recipient}"
            );
        }
    }
}
