//! Liveness probe against the instance's own activity endpoint.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

/// Path every deployed image serves its last-activity report on.
pub const LAST_ACTIVITY_PATH: &str = "api/last-user-activity";

/// Body of `GET {url}/api/last-user-activity`. Only `timestamp` is acted on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

impl ActivityReport {
    /// Parsed last-activity time. An absent or empty timestamp means no user
    /// activity has been seen yet.
    pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        match self.timestamp.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|e| ProviderError::InvalidResponse(format!("timestamp {raw:?}: {e}"))),
        }
    }
}

/// Reports when a user last interacted with an instance.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    async fn last_user_activity(&self, base_url: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Builds the activity endpoint for an instance base url.
pub fn activity_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), LAST_ACTIVITY_PATH)
}

/// [`ActivityProbe`] over plain HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpActivityProbe {
    client: reqwest::Client,
}

impl HttpActivityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActivityProbe for HttpActivityProbe {
    async fn last_user_activity(&self, base_url: &str) -> Result<Option<DateTime<Utc>>> {
        let url = activity_url(base_url);
        debug!("Querying user activity @ {}", url);

        let report: ActivityReport = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        report.last_activity()
    }
}
