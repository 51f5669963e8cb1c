use std::sync::Arc;

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{error, info};

use crate::config::AppConfig;
use crate::error::AppError;

/// Email transport collaborator. Dispatch is synchronous and unretried;
/// a failure surfaces to the caller immediately.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let to: Mailbox = to.parse().map_err(|_| AppError::Transport)?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| {
                error!("failed to build email: {}", e);
                AppError::Transport
            })?;
        self.transport.send(&message).map_err(|e| {
            error!("smtp send failed: {}", e);
            AppError::Transport
        })?;
        Ok(())
    }
}

/// Fallback when no SMTP host is configured: the message goes to the log
/// instead of the wire.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        info!("email to {} [{}]: {}", to, subject, body);
        Ok(())
    }
}

pub fn from_config(config: &AppConfig) -> Arc<dyn Mailer> {
    let host = match &config.smtp_host {
        Some(host) => host.clone(),
        None => return Arc::new(LogMailer),
    };

    let from: Mailbox = config
        .mail_from
        .parse()
        .unwrap_or_else(|e| panic!("invalid MAIL_FROM address: {}", e));

    let mut builder = SmtpTransport::relay(&host)
        .unwrap_or_else(|e| panic!("smtp relay setup failed: {}", e))
        .port(config.smtp_port);
    if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    Arc::new(SmtpMailer {
        transport: builder.build(),
        from,
    })
}
