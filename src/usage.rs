//! Token usage log and monthly budget tracking.
//!
//! Every language-model call that reports token usage appends one entry to
//! a JSON array on disk. After each append the current calendar month's
//! cost is compared with the configured budget and logged.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::BudgetConfig;
use crate::json_file;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub tokens: u64,
    pub cost_estimate: f64,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BudgetStatus {
    NoUsage {
        monthly_cost: u32,
        status: &'static str,
    },
    Tracked {
        monthly_cost: f64,
        max_budget: f64,
        remaining: f64,
        usage_percent: f64,
    },
}

pub struct UsageLedger {
    path: PathBuf,
    budget: BudgetConfig,
    lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new(path: PathBuf, budget: BudgetConfig) -> Self {
        Self {
            path,
            budget,
            lock: Mutex::new(()),
        }
    }

    pub fn cost_for(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.budget.cost_per_1k_tokens
    }

    /// Append one usage entry and log the resulting budget state.
    pub async fn record(&self, endpoint: &str, tokens: u64) -> Result<UsageEntry> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();
        let entry = UsageEntry {
            timestamp: now,
            endpoint: endpoint.to_string(),
            tokens,
            cost_estimate: self.cost_for(tokens),
            date: now.format("%Y-%m-%d").to_string(),
        };

        let mut log: Vec<UsageEntry> = json_file::load(&self.path)?.unwrap_or_default();
        log.push(entry.clone());
        json_file::save(&self.path, &log)?;

        let monthly = monthly_cost(&log, now);
        if monthly >= self.budget.max_monthly {
            tracing::error!(
                monthly_cost = monthly,
                max_budget = self.budget.max_monthly,
                "monthly budget exceeded"
            );
        } else if monthly >= self.budget.warn_at {
            tracing::warn!(
                monthly_cost = monthly,
                max_budget = self.budget.max_monthly,
                "monthly budget warning threshold reached"
            );
        } else {
            tracing::info!(
                monthly_cost = monthly,
                max_budget = self.budget.max_monthly,
                "budget ok"
            );
        }
        Ok(entry)
    }

    /// Record usage, logging instead of failing. Used on analysis paths
    /// that must not error.
    pub async fn record_or_warn(&self, endpoint: &str, tokens: Option<u64>) {
        let Some(tokens) = tokens else {
            return;
        };
        if let Err(e) = self.record(endpoint, tokens).await {
            tracing::warn!(endpoint, error = %e, "usage logging failed");
        }
    }

    pub async fn status(&self) -> Result<BudgetStatus> {
        let _guard = self.lock.lock().await;
        let log: Option<Vec<UsageEntry>> = json_file::load(&self.path)?;
        let Some(log) = log.filter(|l| !l.is_empty()) else {
            return Ok(BudgetStatus::NoUsage {
                monthly_cost: 0,
                status: "no_usage",
            });
        };
        let monthly = monthly_cost(&log, Utc::now());
        let max = self.budget.max_monthly;
        Ok(BudgetStatus::Tracked {
            monthly_cost: round_to(monthly, 2),
            max_budget: max,
            remaining: round_to(max - monthly, 2),
            usage_percent: round_to(monthly / max * 100.0, 1),
        })
    }
}

/// Sum of `cost_estimate` over entries in the calendar month of `now`.
fn monthly_cost(log: &[UsageEntry], now: DateTime<Utc>) -> f64 {
    let month = now.format("%Y-%m").to_string();
    log.iter()
        .filter(|e| e.date.starts_with(&month))
        .map(|e| e.cost_estimate)
        .sum()
}

/// Rounds half away from zero to `decimals` places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
