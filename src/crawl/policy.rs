// src/crawl/policy.rs
// =============================================================================
// Pluggable decisions the scheduler asks about.
//
// - RetryPolicy: should a failed result be run again?
// - DomainFilter: may a target be crawled at all?
//
// Neither holds any scheduling state. They are consulted with the scheduler
// lock held and must answer immediately.
// =============================================================================

use url::Url;

use super::executor::ExecutionResult;
use crate::error::EngineError;

/// Decides whether a failed execution gets another attempt.
///
/// The engine only asks when the request still has retries left, so a
/// policy only has to judge the failure itself.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, result: &ExecutionResult) -> bool;
}

/// Never retries. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _result: &ExecutionResult) -> bool {
        false
    }
}

/// Retries every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryFailures;

impl RetryPolicy for RetryFailures {
    fn should_retry(&self, result: &ExecutionResult) -> bool {
        !result.is_success()
    }
}

/// Retries timeouts only.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryTimeouts;

impl RetryPolicy for RetryTimeouts {
    fn should_retry(&self, result: &ExecutionResult) -> bool {
        result.is_timeout()
    }
}

/// Host allow and deny lists.
///
/// A pattern is either an exact host (`example.com`) or a wildcard suffix
/// (`*.example.com`, which also matches `example.com` itself). Deny always
/// wins. With an empty allow list every host not denied is allowed.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    allowed: Vec<String>,
    denied: Vec<String>,
}

impl DomainFilter {
    pub fn new(allowed: &[String], denied: &[String]) -> Result<Self, EngineError> {
        Ok(Self {
            allowed: normalise(allowed)?,
            denied: normalise(denied)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.denied.is_empty()
    }

    pub fn allows(&self, target: &str) -> bool {
        let host = Url::parse(target.trim())
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));

        // Targets without a host (plain text, data: URLs) can only be
        // checked against an allow list, and never match one.
        let Some(host) = host else {
            return self.allowed.is_empty();
        };

        if self.denied.iter().any(|pattern| matches(pattern, &host)) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.iter().any(|pattern| matches(pattern, &host))
    }
}

fn normalise(patterns: &[String]) -> Result<Vec<String>, EngineError> {
    patterns
        .iter()
        .map(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            if pattern.is_empty() || pattern == "*." {
                Err(EngineError::Configuration(
                    "domain patterns must not be empty".to_string(),
                ))
            } else {
                Ok(pattern)
            }
        })
        .collect()
}

fn matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            host == suffix
                || host
                    .strip_suffix(suffix)
                    .is_some_and(|rest| rest.ends_with('.'))
        }
        None => host == pattern,
    }
}
