use super::balance::{BalanceAggregator, BalanceMap};
use super::task::SessionKey;
use crate::error::PipelineError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Success fields of a run's result.
#[derive(Debug, Serialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    pub address_balances: BalanceMap,
    pub max_account_address: Option<String>,
    pub max_account_balance_change: Option<f64>,
    pub amount_of_transactions: u64,
    /// Seconds.
    pub loading_time: f64,
    /// Seconds.
    pub process_time: f64,
}

impl BalanceReport {
    pub fn from_aggregator(
        aggregator: &BalanceAggregator,
        loading_time: Duration,
        process_time: Duration,
    ) -> Self {
        let max_account = aggregator.max_account();
        Self {
            address_balances: aggregator.balances().clone(),
            max_account_address: max_account.map(|m| m.address.clone()),
            max_account_balance_change: max_account.map(|m| m.delta),
            amount_of_transactions: aggregator.amount_of_transactions(),
            loading_time: loading_time.as_secs_f64(),
            process_time: process_time.as_secs_f64(),
        }
    }
}

/// The result handed back to callers: the report, or an error message.
/// Never both.
#[derive(Debug, Serialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum Data {
    Success(BalanceReport),
    Failure { error: String },
}

impl Data {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded(BalanceReport),
    /// Whatever had been aggregated when the deadline fired.
    TimedOut {
        partial: BalanceReport,
        budget: Duration,
    },
    Failed(PipelineError),
}

impl PipelineOutcome {
    /// The terminal state this outcome leaves the orchestrator in.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Succeeded(_) => PipelineState::Succeeded,
            Self::TimedOut { .. } => PipelineState::TimedOut,
            Self::Failed(_) => PipelineState::Failed,
        }
    }

    /// Collapses the outcome into what callers see. A timeout drops its
    /// partial report.
    pub fn into_data(self) -> Data {
        match self {
            Self::Succeeded(report) => Data::Success(report),
            Self::TimedOut { budget, .. } => Data::Failure {
                error: PipelineError::DeadlineExceeded { budget }.to_string(),
            },
            Self::Failed(e) => Data::Failure {
                error: e.to_string(),
            },
        }
    }
}

/// Where an orchestrator is in its run. States only move forward within a
/// run; a new run starts again from `Connecting`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PipelineState {
    Idle,
    Connecting,
    Downloading,
    Processing,
    Succeeded,
    TimedOut,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed out",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A fatal error, as published on the process-wide error channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub session_key: SessionKey,
    pub message: String,
}
