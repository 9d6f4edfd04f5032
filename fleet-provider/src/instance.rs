//! Instance data model shared by every provider backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state reported by the provider. A deleted instance is simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Pending,
    Ready,
    Deploying,
    Running,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Deploying => "deploying",
            Self::Running => "running",
        };
        f.write_str(label)
    }
}

/// Key/value marker attached to an instance. Marker tags use an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn marker(key: impl Into<String>) -> Self {
        Self::new(key, "")
    }
}

/// Snapshot of one provider-hosted instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub state: InstanceState,
    /// Public endpoint, only set once the deployment is running.
    pub url: Option<String>,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    /// Identity the provider pulls images with, once assigned.
    pub pull_principal: Option<String>,
}

impl Instance {
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// Health check the provider runs against the public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub success_codes: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval_secs: 5,
            timeout_secs: 2,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
            success_codes: "200-499".to_string(),
        }
    }
}

/// What to run on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub health_check: HealthCheck,
}
