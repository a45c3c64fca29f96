//! SMTP failure notification, grounded on `original_source/smtp_functions.py`.
//!
//! The daemon sends one email per engine failure during a loop cycle, then
//! suppresses further sends for `minimal_email_interval` hours so a
//! misbehaving connection doesn't produce a mail storm. `--test-notification-
//! email` (the CLI flag) bypasses the throttle by calling [`send_now`]
//! directly instead of going through [`NotificationThrottle::notify`].

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};

use crate::config::NotificationConfig;
use crate::error::EngineError;

/// Tracks the last time a notification was sent, mirroring the source's
/// `should_send_another_email` check against a module-level timestamp.
pub struct NotificationThrottle {
    last_sent: Option<std::time::Instant>,
    min_interval: std::time::Duration,
}

impl NotificationThrottle {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            last_sent: None,
            min_interval: std::time::Duration::from_secs_f64(config.minimal_email_interval * 3600.0),
        }
    }

    /// Sends `body` as a failure notification unless the throttle window
    /// hasn't elapsed since the last send. Returns whether a send was
    /// attempted at all (for logging), independent of whether it succeeded.
    pub fn notify(&mut self, config: &NotificationConfig, subject: &str, body: &str) -> bool {
        if let Some(last) = self.last_sent {
            if last.elapsed() < self.min_interval {
                tracing::debug!("suppressing notification email, within minimal_email_interval");
                return false;
            }
        }
        match send_now(config, subject, body) {
            Ok(()) => {
                self.last_sent = Some(std::time::Instant::now());
            }
            Err(e) => {
                tracing::error!("failed to send notification email: {e}");
            }
        }
        true
    }
}

/// Sends immediately, ignoring the throttle. Used both by
/// `NotificationThrottle::notify` after the window check passes, and
/// directly by `--test-notification-email`.
pub fn send_now(config: &NotificationConfig, subject: &str, body: &str) -> Result<(), EngineError> {
    let from: Mailbox = config
        .email_sender
        .parse()
        .map_err(|e| EngineError::config(format!("invalid notification.email_sender: {e}")))?;

    let mut builder = Message::builder().from(from).subject(subject);
    for recipient in &config.email_recipients {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| EngineError::config(format!("invalid notification recipient '{recipient}': {e}")))?;
        builder = builder.to(to);
    }
    let message = builder
        .body(body.to_string())
        .map_err(|e| EngineError::config(format!("cannot build notification email: {e}")))?;

    let port = config.smtp_port.unwrap_or(if config.use_ssl { 465 } else { 587 });
    let tls = if config.use_ssl {
        TlsParameters::new(config.smtp_server.clone())
            .map(Tls::Wrapper)
            .map_err(|e| EngineError::config(format!("invalid SMTP TLS config: {e}")))?
    } else if config.use_tls {
        Tls::Required(
            TlsParameters::new(config.smtp_server.clone())
                .map_err(|e| EngineError::config(format!("invalid SMTP TLS config: {e}")))?,
        )
    } else {
        Tls::None
    };

    let mut transport_builder = SmtpTransport::builder_dangerous(&config.smtp_server)
        .port(port)
        .tls(tls);

    if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
        transport_builder = transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    let transport = transport_builder.build();
    transport
        .send(&message)
        .map_err(|e| EngineError::config(format!("failed to send notification email: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> NotificationConfig {
        NotificationConfig {
            smtp_server: "smtp.example.com".into(),
            smtp_port: None,
            use_ssl: false,
            use_tls: true,
            smtp_username: None,
            smtp_password: None,
            email_sender: "dbsync@example.com".into(),
            email_subject: "dbsync failure".into(),
            email_recipients: vec!["ops@example.com".into()],
            minimal_email_interval: 4.0,
        }
    }

    #[test]
    fn throttle_suppresses_within_window() {
        let config = sample_config();
        let mut throttle = NotificationThrottle::new(&config);
        throttle.last_sent = Some(std::time::Instant::now());
        // min_interval is 4 hours; immediately re-notifying must be suppressed
        // without attempting a send (no real SMTP server is reachable here).
        assert!(!throttle.notify(&config, "subject", "body"));
    }

    #[test]
    fn throttle_attempts_send_when_never_sent() {
        let config = sample_config();
        let mut throttle = NotificationThrottle::new(&config);
        // No prior send recorded, so the throttle allows an attempt (it will
        // fail because there's no real SMTP server, but that's a send
        // attempt, not a suppression).
        assert!(throttle.notify(&config, "subject", "body"));
    }
}
