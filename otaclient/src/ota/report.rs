// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ota::transport::Transport;

/// Session status as it appears on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    device_id: &'a str,
    release_id: &'a str,
    status: UpdateStatus,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

/// Posts session lifecycle events to the control plane. Reports are best
/// effort: failures are logged and returned, never raised.
pub struct StatusReporter<'a, T: Transport> {
    transport: &'a T,
    url: String,
}

impl<'a, T: Transport> StatusReporter<'a, T> {
    pub fn new(transport: &'a T, server_url: &str) -> Self {
        Self {
            transport,
            url: format!(
                "{}/api/v1/ota/updates/status",
                server_url.trim_end_matches('/'),
            ),
        }
    }

    /// Returns whether the control plane acknowledged the report.
    pub fn report(
        &self,
        device_id: &str,
        release_id: &str,
        status: UpdateStatus,
        progress: u8,
        error_message: Option<&str>,
    ) -> bool {
        let body = StatusReport {
            device_id,
            release_id,
            status,
            progress: progress.min(100),
            error_message,
        };

        let data = match serde_json::to_vec(&body) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to serialize status report: {e}");
                return false;
            }
        };

        match self.transport.post_json(&self.url, &data) {
            Ok(200) => {
                debug!("Reported status {status} ({progress}%) for release {release_id:?}");
                true
            }
            Ok(code) => {
                warn!("Status report {status} was rejected with HTTP status {code}");
                false
            }
            Err(e) => {
                warn!("Failed to send status report {status}: {e}");
                false
            }
        }
    }
}
