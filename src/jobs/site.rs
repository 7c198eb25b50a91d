// src/jobs/site.rs
// =============================================================================
// A self-feeding site crawl.
//
// Each job:
// 1. Navigates to its URL
// 2. Fails if the page answered with an error status
// 3. Collects the links on the page and enqueues each one as another
//    SiteCrawl job, one level deeper
//
// The hook itself never decides what is in scope. Off-site links, repeats
// and pages past the depth limit are turned away by the engine's admission
// filters (allowed_domains, dedupe, max_depth), so the crawl stops on its
// own once no new admissible links turn up.
// =============================================================================

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crawl::{Hook, Job, JobContext};
use crate::session::Session;

/// What a crawled page reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// Where the page ended up after redirects.
    pub final_url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub redirected: bool,
    /// Links found on the page.
    pub links: usize,
    /// How many of them were admitted as new jobs.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SiteCrawl;

pub fn site_crawl() -> Arc<dyn Hook> {
    Arc::new(SiteCrawl)
}

#[async_trait]
impl Hook for SiteCrawl {
    async fn run(&self, session: &mut dyn Session, ctx: JobContext) -> anyhow::Result<Value> {
        let page = session.navigate(ctx.url()).await?;
        if !page.is_success() {
            bail!("HTTP {}", page.status);
        }

        let links = session.links().await?;
        let queued = links
            .iter()
            .filter(|link| ctx.enqueue(Job::new(link.as_str(), site_crawl())).is_queued())
            .count();
        debug!(url = ctx.url(), links = links.len(), queued, "page crawled");

        let report = PageReport {
            final_url: page.url,
            status: page.status,
            title: page.title,
            redirected: page.redirected,
            links: links.len(),
            queued,
        };
        Ok(serde_json::to_value(report)?)
    }
}
