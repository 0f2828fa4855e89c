//! Rotation Side Effects
//!
//! External collaborators driven after a rotation: the dependent-service
//! restart hook and the notification sink. Both are best-effort from the
//! orchestrator's point of view: their failures are logged, never fatal.

use std::io;
use std::process::Command;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

/// Runs the configured restart command with `{service}` substituted.
pub struct RestartHook {
    command: Option<String>,
}

impl RestartHook {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    pub fn is_configured(&self) -> bool {
        self.command.is_some()
    }

    /// Returns `Ok(true)` when a configured hook ran successfully,
    /// `Ok(false)` when no hook is configured.
    pub fn restart(&self, service: &str) -> io::Result<bool> {
        let Some(template) = &self.command else {
            return Ok(false);
        };
        let command = template.replace("{service}", service);
        info!(service, %command, "running restart hook");
        let status = Command::new("sh").arg("-c").arg(&command).status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("restart hook exited with {}", status),
            ));
        }
        Ok(true)
    }
}

/// Best-effort JSON webhook for rotation events.
pub struct Notifier {
    url: Option<String>,
}

impl Notifier {
    pub fn new(url: Option<String>) -> Self {
        Self { url }
    }

    /// Post a rotation event. Failures are logged and swallowed.
    pub fn notify(&self, service: &str, event: &str, message: &str) {
        let Some(url) = &self.url else {
            return;
        };
        let payload = serde_json::json!({
            "source": "certops",
            "service": service,
            "event": event,
            "message": message,
            "at": Utc::now().to_rfc3339(),
        });
        let outcome = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .and_then(|client| client.post(url).json(&payload).send());
        match outcome {
            Ok(response) if response.status().is_success() => {
                info!(service, event, "notification delivered");
            }
            Ok(response) => {
                warn!(service, event, status = %response.status(), "notification sink rejected event");
            }
            Err(e) => {
                warn!(service, event, error = %e, "notification failed");
            }
        }
    }
}
