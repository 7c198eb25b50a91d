// src/jobs/mod.rs
// =============================================================================
// Ready-made job hooks.
//
// - site: crawl a site by following links, one job per page
// - check: report the status of one link per job
//
// These are ordinary Hook implementations; the engine knows nothing about
// them. The CLI is built on top of these two.
// =============================================================================

mod check;
mod site;

pub use check::{link_check, LinkCheck, LinkReport, LinkStatus};
pub use site::{site_crawl, PageReport, SiteCrawl};
