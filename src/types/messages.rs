//! HTTP response bodies for the cron endpoint

use serde::{Deserialize, Serialize};

/// Summary of one scheduler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationSummary {
    pub success: bool,
    pub message: String,
    pub processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

impl InvocationSummary {
    /// Nothing was claimable on this tick
    pub fn idle(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            processed: 0,
            elapsed_time_ms: Some(elapsed_ms),
            job_id: None,
            completed: false,
        }
    }
}

/// Error body returned with HTTP 500
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
