//! Failure screenshots.

use crate::driver::AutomationDriver;
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Turn a label into a safe file-name stem
#[must_use]
pub fn sanitize_label(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "failure".to_string()
    } else {
        stem.chars().take(64).collect()
    }
}

/// Capture a PNG into `dir`. Never fails; problems are logged.
pub async fn capture_failure<D>(driver: &D, dir: Option<&Path>, label: &str) -> Option<PathBuf>
where
    D: AutomationDriver + ?Sized,
{
    let dir = dir?;
    let png = match driver.screenshot().await {
        Ok(png) => png,
        Err(err) => {
            tracing::debug!(label, error = %err, "failure screenshot unavailable");
            return None;
        }
    };

    let file = format!(
        "{}-{}-{}.png",
        sanitize_label(label),
        Utc::now().format("%Y%m%dT%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8]
    );
    let path = dir.join(file);

    if let Err(err) = tokio::fs::create_dir_all(dir).await {
        tracing::debug!(dir = %dir.display(), error = %err, "cannot create screenshot dir");
        return None;
    }
    match tokio::fs::write(&path, png).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), label, "captured failure screenshot");
            Some(path)
        }
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "cannot write screenshot");
            None
        }
    }
}
