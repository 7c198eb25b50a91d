// src/jobs/check.rs
// =============================================================================
// Link status check: one job per URL.
//
// The job loads the URL and sorts the outcome into a LinkStatus:
// - 2xx                     -> Ok (or Redirect when we ended up elsewhere)
// - 404 / 410               -> Broken
// - other statuses          -> Error
// - transport failures      -> Timeout, SslError, DnsError, TooManyRedirects
//                              or Error, from the session's error
//
// A broken link is still a successful job: the check ran and the report
// says what it found. The job only fails when the hook itself cannot run
// (for example, an unparseable URL).
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crawl::{Hook, JobContext};
use crate::error::SessionError;
use crate::session::{PageInfo, Session};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkStatus {
    /// The link works (2xx)
    Ok,
    /// The link works, but lands somewhere else
    Redirect { to: String },
    /// 404 Not Found or 410 Gone
    Broken,
    Timeout,
    SslError,
    TooManyRedirects,
    DnsError,
    /// Anything else (5xx, connection refused, ...)
    Error,
}

impl LinkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LinkStatus::Ok => "✅ OK",
            LinkStatus::Redirect { .. } => "🔀 REDIRECT",
            LinkStatus::Broken => "❌ BROKEN",
            LinkStatus::Timeout => "⏱️  TIMEOUT",
            LinkStatus::SslError => "🔒 SSL ERROR",
            LinkStatus::TooManyRedirects => "🔁 TOO MANY REDIRECTS",
            LinkStatus::DnsError => "🌐 DNS ERROR",
            LinkStatus::Error => "⚠️  ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub url: String,
    #[serde(flatten)]
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LinkReport {
    /// Ok and Redirect count as working links.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, LinkStatus::Ok | LinkStatus::Redirect { .. })
    }

    fn from_page(url: &str, page: &PageInfo) -> Self {
        let status = match page.status {
            200..=299 if page.redirected => LinkStatus::Redirect {
                to: page.url.clone(),
            },
            200..=299 => LinkStatus::Ok,
            404 | 410 => LinkStatus::Broken,
            _ => LinkStatus::Error,
        };
        let message = if page.redirected {
            format!("HTTP {} -> {}", page.status, page.url)
        } else {
            format!("HTTP {}", page.status)
        };
        Self {
            url: url.to_string(),
            status,
            message: Some(message),
        }
    }

    fn from_error(url: &str, error: &SessionError) -> Self {
        let status = match error {
            SessionError::Timeout => LinkStatus::Timeout,
            SessionError::Tls => LinkStatus::SslError,
            SessionError::Dns => LinkStatus::DnsError,
            SessionError::TooManyRedirects => LinkStatus::TooManyRedirects,
            _ => LinkStatus::Error,
        };
        Self {
            url: url.to_string(),
            status,
            message: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkCheck;

pub fn link_check() -> Arc<dyn Hook> {
    Arc::new(LinkCheck)
}

#[async_trait]
impl Hook for LinkCheck {
    async fn run(&self, session: &mut dyn Session, ctx: JobContext) -> anyhow::Result<Value> {
        let report = match session.navigate(ctx.url()).await {
            Ok(page) => LinkReport::from_page(ctx.url(), &page),
            Err(e @ SessionError::InvalidUrl { .. }) => return Err(e.into()),
            Err(e) => LinkReport::from_error(ctx.url(), &e),
        };
        Ok(serde_json::to_value(report)?)
    }
}
