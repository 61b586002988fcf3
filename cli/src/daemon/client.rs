// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use warden_core::application::mount_options::MountOptionsUpdate;
use warden_core::domain::firewall::FirewallState;
use warden_core::domain::operation::OperationRequest;
use warden_core::domain::plan::{Plan, RiskClass};
use warden_core::domain::transaction::TransactionId;
use warden_core::presentation::api::{
    ApplyRequest, LogResponse, MountOptionsResponse, PlanResponse, TransactionSummary,
};

use super::{base_url, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    transaction_id: Option<TransactionId>,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
struct FirewallActionResponse {
    transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
struct PruneResponse {
    removed: usize,
}

impl DaemonClient {
    pub fn new(host: Option<&str>, port: Option<u16>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url(host.unwrap_or(DEFAULT_HOST), port.unwrap_or(DEFAULT_PORT)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn plan(&self, request: &OperationRequest) -> Result<PlanResponse> {
        let response = self
            .client
            .post(format!("{}/api/plans", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Planning failed").await
    }

    pub async fn apply(&self, plan: Plan, risk_class: RiskClass, confirmation: &str) -> Result<TransactionId> {
        let response = self
            .client
            .post(format!("{}/api/transactions", self.base_url))
            .json(&ApplyRequest {
                plan,
                risk_class,
                confirmation: confirmation.to_string(),
            })
            .send()
            .await
            .context("Failed to reach daemon")?;
        let applied: ApplyResponse = parse(response, "Apply rejected").await?;
        Ok(applied.transaction_id)
    }

    pub async fn transaction(&self, id: &TransactionId) -> Result<TransactionSummary> {
        let response = self
            .client
            .get(format!("{}/api/transactions/{}", self.base_url, id))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Failed to get transaction").await
    }

    pub async fn poll_log(&self, id: &TransactionId, cursor: usize, max_lines: usize) -> Result<LogResponse> {
        let response = self
            .client
            .get(format!(
                "{}/api/transactions/{}/log?cursor={}&max_lines={}",
                self.base_url, id, cursor, max_lines
            ))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Failed to read transaction log").await
    }

    pub async fn list_transactions(&self, resource: Option<&str>, limit: usize) -> Result<Vec<TransactionSummary>> {
        let mut url = format!("{}/api/transactions?limit={}", self.base_url, limit);
        if let Some(resource) = resource {
            url.push_str(&format!("&resource={}", resource));
        }
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Failed to list transactions").await
    }

    pub async fn prune(&self, older_than_days: i64) -> Result<usize> {
        let response = self
            .client
            .delete(format!(
                "{}/api/transactions?older_than_days={}",
                self.base_url, older_than_days
            ))
            .send()
            .await
            .context("Failed to reach daemon")?;
        let pruned: PruneResponse = parse(response, "Failed to prune transactions").await?;
        Ok(pruned.removed)
    }

    pub async fn mount_options(&self, pool: &str) -> Result<MountOptionsResponse> {
        let response = self
            .client
            .get(format!("{}/api/pools/{}/mount-options", self.base_url, pool))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Failed to read mount options").await
    }

    pub async fn set_mount_options(&self, pool: &str, options: &str) -> Result<MountOptionsUpdate> {
        let response = self
            .client
            .put(format!("{}/api/pools/{}/mount-options", self.base_url, pool))
            .json(&serde_json::json!({ "options": options }))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Mount options rejected").await
    }

    pub async fn firewall_state(&self) -> Result<FirewallState> {
        let response = self
            .client
            .get(format!("{}/api/firewall", self.base_url))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Failed to read firewall state").await
    }

    pub async fn confirm_firewall(&self) -> Result<TransactionId> {
        let response = self
            .client
            .post(format!("{}/api/firewall/confirm", self.base_url))
            .send()
            .await
            .context("Failed to reach daemon")?;
        let confirmed: FirewallActionResponse = parse(response, "Confirm failed").await?;
        Ok(confirmed.transaction_id)
    }

    pub async fn rollback_firewall(&self) -> Result<TransactionId> {
        let response = self
            .client
            .post(format!("{}/api/firewall/rollback", self.base_url))
            .send()
            .await
            .context("Failed to reach daemon")?;
        let rolled_back: FirewallActionResponse = parse(response, "Rollback failed").await?;
        Ok(rolled_back.transaction_id)
    }
}

/// Decode a success body, or turn the daemon's `{"error": ...}` body into an error
async fn parse<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody {
                error,
                transaction_id: Some(id),
            }) => format!("{} (transaction {})", error, id),
            Ok(ErrorBody { error, .. }) => error,
            Err(_) => text,
        };
        anyhow::bail!("{}: {} ({})", action, message, status);
    }

    response
        .json()
        .await
        .with_context(|| format!("{}: unexpected response body", action))
}
