//! Pull permissions on the image registry.
//!
//! The registry keeps a single policy document per repository. Every change
//! is a read-modify-write of the whole document: fetch, parse, drop
//! statements whose principal is not a well-formed identity, apply the edit,
//! write it back. Fields this module does not know about are carried through
//! untouched.

use crate::error::{OrchestratorError, Result};
use fleet_provider::{Instance, RegistryAccess};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub const PULL_ACTIONS: [&str; 2] = ["ecr:BatchGetImage", "ecr:GetDownloadUrlForLayer"];

/// Statement id owned by one instance.
pub fn statement_id(instance_name: &str) -> String {
    format!("AllowPull-{instance_name}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect", default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,
    #[serde(rename = "Action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PolicyStatement {
    pub fn allow_pull(instance_name: &str, principal: &str) -> Self {
        Self {
            sid: Some(statement_id(instance_name)),
            effect: Some("Allow".to_string()),
            principal: Some(serde_json::json!({ "AWS": principal })),
            action: Some(Value::from(PULL_ACTIONS.to_vec())),
            extra: Map::new(),
        }
    }

    /// `Principal.AWS` must be an identity (or a non-empty list of identities)
    /// starting with `prefix`.
    pub fn has_valid_principal(&self, prefix: &str) -> bool {
        let aws = self.principal.as_ref().and_then(|p| p.get("AWS"));
        match aws {
            Some(Value::String(arn)) => arn.starts_with(prefix),
            Some(Value::Array(arns)) => {
                !arns.is_empty()
                    && arns
                        .iter()
                        .all(|arn| arn.as_str().is_some_and(|s| s.starts_with(prefix)))
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "Statement", default)]
    pub statements: Vec<PolicyStatement>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PolicyDocument {
    /// An empty registry policy parses as an empty document.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self {
                version: Some("2012-10-17".to_string()),
                statements: Vec::new(),
                extra: Map::new(),
            });
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Drop statements whose principal is malformed. Returns how many were dropped.
    pub fn sanitize(&mut self, principal_prefix: &str) -> usize {
        let before = self.statements.len();
        self.statements
            .retain(|statement| statement.has_valid_principal(principal_prefix));
        before - self.statements.len()
    }

    /// Add the pull statement for an instance, replacing any earlier one.
    pub fn grant(&mut self, instance_name: &str, principal: &str) {
        self.revoke(instance_name);
        self.statements
            .push(PolicyStatement::allow_pull(instance_name, principal));
    }

    /// Remove the pull statement for an instance. Returns whether one existed.
    pub fn revoke(&mut self, instance_name: &str) -> bool {
        let sid = statement_id(instance_name);
        let before = self.statements.len();
        self.statements
            .retain(|statement| statement.sid.as_deref() != Some(sid.as_str()));
        self.statements.len() != before
    }
}

/// Applies grants and revocations to the shared repository policy.
pub struct RegistryAccessManager {
    registry: Arc<dyn RegistryAccess>,
    repository: String,
    principal_prefix: String,
    // One read-modify-write at a time within this process.
    write_lock: Mutex<()>,
}

impl RegistryAccessManager {
    pub fn new(
        registry: Arc<dyn RegistryAccess>,
        repository: impl Into<String>,
        principal_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            repository: repository.into(),
            principal_prefix: principal_prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Allow `instance` to pull the deployment image.
    #[instrument(skip_all, fields(instance = %instance.name))]
    pub async fn grant(&self, instance: &Instance) -> Result<()> {
        let principal = instance.pull_principal.as_deref().ok_or_else(|| {
            OrchestratorError::Policy(format!("{} has no pull principal yet", instance.name))
        })?;

        self.update(|policy| {
            policy.grant(&instance.name, principal);
        })
        .await?;
        info!("Granted registry pull to {}", instance.name);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke(&self, instance_name: &str) -> Result<()> {
        self.update(|policy| {
            if !policy.revoke(instance_name) {
                debug!("No pull statement for {}", instance_name);
            }
        })
        .await?;
        info!("Revoked registry pull from {}", instance_name);
        Ok(())
    }

    async fn update<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PolicyDocument),
    {
        let _guard = self.write_lock.lock().await;

        let record = self.registry.get_policy(&self.repository).await?;
        let mut policy = PolicyDocument::parse(&record.policy_text)?;
        let dropped = policy.sanitize(&self.principal_prefix);
        if dropped > 0 {
            debug!("Dropped {} statement(s) with malformed principals", dropped);
        }

        edit(&mut policy);

        self.registry
            .set_policy(&self.repository, &record.registry_id, &policy.to_json()?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "arn:aws:iam";

    fn document() -> PolicyDocument {
        PolicyDocument::parse(
            r#"{
                "Version": "2012-10-17",
                "Statement": [
                    {"Sid": "Broken", "Effect": "Allow", "Principal": {"AWS": "AROAXXXXXXXX"}, "Action": "ecr:*"},
                    {"Sid": "AllowPull-app-u0", "Effect": "Allow",
                     "Principal": {"AWS": "arn:aws:iam::1:role/app-u0"},
                     "Action": ["ecr:BatchGetImage"], "Condition": {"Bool": {"aws:SecureTransport": "true"}}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize_then_grant_keeps_valid_and_appended() {
        let mut policy = document();

        assert_eq!(policy.sanitize(PREFIX), 1);
        policy.grant("app-u1", "arn:aws:iam::1:role/app-u1");

        let sids: Vec<_> = policy
            .statements
            .iter()
            .map(|s| s.sid.clone().unwrap())
            .collect();
        assert_eq!(sids, vec!["AllowPull-app-u0", "AllowPull-app-u1"]);

        let appended = &policy.statements[1];
        assert_eq!(appended.effect.as_deref(), Some("Allow"));
        assert_eq!(
            appended.action,
            Some(serde_json::json!(["ecr:BatchGetImage", "ecr:GetDownloadUrlForLayer"]))
        );
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let mut policy = document();
        policy.sanitize(PREFIX);

        let json: Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
        assert_eq!(
            json["Statement"][0]["Condition"]["Bool"]["aws:SecureTransport"],
            "true"
        );
        assert_eq!(json["Version"], "2012-10-17");
    }

    #[test]
    fn test_grant_replaces_existing_statement() {
        let mut policy = document();
        policy.sanitize(PREFIX);
        policy.grant("app-u0", "arn:aws:iam::1:role/app-u0-new");

        assert_eq!(policy.statements.len(), 1);
        assert_eq!(
            policy.statements[0].principal,
            Some(serde_json::json!({"AWS": "arn:aws:iam::1:role/app-u0-new"}))
        );
    }

    #[test]
    fn test_revoke_matches_exact_statement_id() {
        let mut policy = document();
        policy.sanitize(PREFIX);
        policy.grant("app-u10", "arn:aws:iam::1:role/app-u10");

        assert!(policy.revoke("app-u0"));
        assert!(!policy.revoke("app-u0"));
        assert_eq!(
            policy.statements[0].sid.as_deref(),
            Some("AllowPull-app-u10")
        );
    }

    #[test]
    fn test_principal_lists_must_be_fully_valid() {
        let mut statement = PolicyStatement::allow_pull("app-u1", "arn:aws:iam::1:role/x");
        statement.principal = Some(serde_json::json!({"AWS": ["arn:aws:iam::1:role/x", "AROA1"]}));
        assert!(!statement.has_valid_principal(PREFIX));

        statement.principal = Some(serde_json::json!({"AWS": ["arn:aws:iam::1:role/x"]}));
        assert!(statement.has_valid_principal(PREFIX));

        statement.principal = Some(serde_json::json!("*"));
        assert!(!statement.has_valid_principal(PREFIX));
    }

    #[test]
    fn test_empty_policy_text_is_an_empty_document() {
        let policy = PolicyDocument::parse("  ").unwrap();
        assert!(policy.statements.is_empty());
    }
}
