//! Cron caller authentication
//!
//! The check is soft: a missing or wrong bearer token is logged but the
//! call still goes through. Callers decide what to do with the verdict.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tracing::warn;

/// Outcome of checking a cron call's credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronAuth {
    /// Bearer token matched the configured secret
    Verified,
    /// No secret configured, nothing to check against
    Unconfigured,
    /// No `Authorization: Bearer` header
    Missing,
    /// Header present but token did not match
    Mismatch,
}

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Check a cron call against `secret`, logging anything other than a match
pub fn check_cron_auth(headers: &HeaderMap, secret: Option<&str>) -> CronAuth {
    let Some(secret) = secret else {
        warn!("CRON_SECRET is not configured, accepting cron call without verification");
        return CronAuth::Unconfigured;
    };

    match bearer_token(headers) {
        None => {
            warn!("Cron call without bearer token, processing anyway");
            CronAuth::Missing
        }
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => CronAuth::Verified,
        Some(_) => {
            warn!("Cron call with wrong bearer token, processing anyway");
            CronAuth::Mismatch
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
