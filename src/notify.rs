//! Deployment outcome notifications.
//!
//! The deployer only knows the [`Notifier`] trait; the default
//! implementation composes an email per deployment and submits it over
//! SMTP. Notification failures are reported back to the deployer, which
//! logs and swallows them.

use std::sync::Arc;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::ProjectConfig;
use crate::config_manager::ConfigManager;
use crate::deploy::DeployResult;
use crate::error::{Result, SdeployError};

/// Everything a notifier needs to describe one finished deployment.
#[derive(Debug, Clone)]
pub struct DeployNotification {
    pub project_name: String,
    pub recipients: Vec<String>,
    pub trigger_source: String,
    pub success: bool,
    pub duration_secs: f64,
    pub error: String,
    pub output: String,
}

impl DeployNotification {
    pub fn new(project: &ProjectConfig, result: &DeployResult, trigger_source: &str) -> Self {
        DeployNotification {
            project_name: project.name.clone(),
            recipients: project.email_recipients.clone(),
            trigger_source: trigger_source.to_string(),
            success: result.success,
            duration_secs: result.duration().num_milliseconds() as f64 / 1000.0,
            error: result.error.clone(),
            output: result.output.clone(),
        }
    }

    fn subject(&self) -> String {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        format!("[sdeploy] {} - deployment {}", self.project_name, status)
    }

    fn body(&self) -> String {
        let mut body = format!(
            "Project: {}\nTrigger: {}\nStatus: {}\nDuration: {:.2}s\n",
            self.project_name,
            self.trigger_source,
            if self.success { "success" } else { "failure" },
            self.duration_secs,
        );
        if !self.error.is_empty() {
            body.push_str(&format!("\nError:\n{}\n", self.error));
        }
        if !self.output.is_empty() {
            body.push_str(&format!("\nOutput:\n{}\n", self.output));
        }
        body
    }
}

/// Outbound notification channel for deployment outcomes.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: DeployNotification) -> Result<()>;
}

/// SMTP-backed notifier. Email settings are read from the current config
/// snapshot at send time so that a reload can change (or disable) them.
pub struct EmailNotifier {
    config_manager: Arc<ConfigManager>,
}

impl EmailNotifier {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        EmailNotifier { config_manager }
    }
}

impl Notifier for EmailNotifier {
    fn notify(&self, notification: DeployNotification) -> Result<()> {
        if notification.recipients.is_empty() {
            return Ok(());
        }

        let snapshot = self.config_manager.current();
        let Some(email) = snapshot.email_config.as_ref().filter(|e| e.is_complete()) else {
            // Email is globally disabled.
            return Ok(());
        };

        let sender: lettre::message::Mailbox = email
            .email_sender
            .parse()
            .map_err(|e| SdeployError::Notify(format!("invalid sender address: {}", e)))?;

        let subject = notification.subject();
        let body = notification.body();

        let transport = SmtpTransport::builder_dangerous(&email.smtp_host)
            .port(email.smtp_port)
            .credentials(Credentials::new(
                email.smtp_user.clone(),
                email.smtp_pass.clone(),
            ))
            .build();

        for recipient in &notification.recipients {
            let to: lettre::message::Mailbox = recipient
                .parse()
                .map_err(|e| SdeployError::Notify(format!("invalid recipient '{}': {}", recipient, e)))?;

            let message = Message::builder()
                .from(sender.clone())
                .to(to)
                .subject(subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())
                .map_err(|e| SdeployError::Notify(format!("failed to build message: {}", e)))?;

            transport
                .send(&message)
                .map_err(|e| SdeployError::Notify(format!("SMTP send failed: {}", e)))?;
        }

        Ok(())
    }
}
