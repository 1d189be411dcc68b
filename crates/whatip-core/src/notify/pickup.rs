//! Pickup-directory mail transport
//!
//! Writes one RFC 5322 message file per recipient into a directory watched
//! by a local MTA. Files are written under a temporary name and renamed so the
//! MTA never picks up a half-written message.
//!
//! The directory comes from the running mail settings when they name one, so
//! a reload that moves `mail_pickup_dir` takes effect on the next send. The
//! directory given at construction is the fallback.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::MailError;
use crate::traits::{MailRequest, Mailer};

/// Mailer that drops `.eml` files into a pickup directory
#[derive(Debug)]
pub struct PickupDirectoryMailer {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl PickupDirectoryMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Fallback directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target_dir<'a>(&'a self, request: &'a MailRequest<'_>) -> &'a Path {
        request.settings.pickup_dir.as_deref().unwrap_or(&self.dir)
    }

    fn next_file_name(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "whatip-{}-{}-{}.eml",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            std::process::id(),
            seq
        )
    }
}

/// Render the message in wire format (CRLF line endings)
pub fn render_message(request: &MailRequest<'_>) -> Result<String, MailError> {
    for (name, value) in [
        ("recipient", request.recipient),
        ("sender", request.sender),
        ("subject", request.subject),
    ] {
        if value.contains(['\r', '\n']) {
            return Err(MailError::InvalidMessage(format!(
                "{} contains a line break",
                name
            )));
        }
    }

    let content_type = if request.is_html {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };

    let mut out = String::new();
    out.push_str(&format!("From: {}\r\n", request.sender));
    out.push_str(&format!("To: {}\r\n", request.recipient));
    out.push_str(&format!("Subject: {}\r\n", request.subject));
    out.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!("Content-Type: {}\r\n", content_type));
    out.push_str("Content-Transfer-Encoding: 8bit\r\n");
    out.push_str("\r\n");
    for line in request.body.lines() {
        out.push_str(line);
        out.push_str("\r\n");
    }
    Ok(out)
}

#[async_trait]
impl Mailer for PickupDirectoryMailer {
    async fn send(&self, request: MailRequest<'_>) -> Result<(), MailError> {
        request.validate()?;
        let content = render_message(&request)?;

        let dir = self.target_dir(&request);
        let name = self.next_file_name();
        let final_path = dir.join(&name);
        let temp_path = dir.join(format!(".{}.tmp", name));

        let transport = |e: std::io::Error| MailError::Transport(format!("{}: {}", dir.display(), e));

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(transport)?;
        file.write_all(content.as_bytes()).await.map_err(transport)?;
        file.sync_all().await.map_err(transport)?;
        drop(file);

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(transport)?;

        debug!(
            "Dropped message for {} into {}",
            request.recipient,
            final_path.display()
        );
        Ok(())
    }

    fn mailer_name(&self) -> &'static str {
        "pickup"
    }
}
