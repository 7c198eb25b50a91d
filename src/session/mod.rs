// src/session/mod.rs
// =============================================================================
// The session driver capability.
//
// A session is the expensive remote handle a worker owns: something that can
// navigate to a page, click, type and evaluate expressions against whatever is
// loaded. The engine never looks inside a session. It only opens one per
// worker at launch, lends it to job hooks, and closes it at shutdown.
//
// Submodules:
// - document: HTML querying helpers shared by the drivers
// - markdown: link extraction for markdown documents
// - http: a driver backed by reqwest (real network)
// - mock: an in-memory driver (tests and dry runs)
// =============================================================================

mod document;
mod http;
mod markdown;
mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

pub use document::Element;
pub use http::{HttpSession, HttpSessionConfig, HttpSessionFactory};
pub use markdown::extract_markdown_links;
pub use mock::{MockSession, MockSessionFactory};

/// What a session reports after loading a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Final URL after any redirects.
    pub url: String,
    /// Status code (200 for drivers without a notion of status).
    pub status: u16,
    /// Title of the document, if it has one.
    pub title: Option<String>,
    /// True when the final URL differs from the requested one.
    pub redirected: bool,
}

impl PageInfo {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One interactive session against a remote target.
///
/// All calls may suspend. Implementations must be `Send` because a session
/// moves between worker tasks over its lifetime.
#[async_trait]
pub trait Session: Send {
    /// Loads `url`, resolved against the current page when relative.
    async fn navigate(&mut self, url: &str) -> Result<PageInfo, SessionError>;

    /// Activates the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<(), SessionError>;

    /// Types `text` into the first element matching `selector`.
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SessionError>;

    /// Evaluates an expression against the loaded page.
    async fn evaluate(&mut self, expression: &str) -> Result<Value, SessionError>;

    /// Absolute links found on the loaded page.
    async fn links(&mut self) -> Result<Vec<String>, SessionError> {
        let found = self.evaluate("a[href]").await?;
        Ok(found
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["attrs"]["href"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// URL of the loaded page, if any.
    fn current_url(&self) -> Option<&str>;
}

/// Produces and disposes of sessions. One session is opened per worker.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Session>, SessionError>;

    async fn close_session(&self, session: Box<dyn Session>) -> Result<(), SessionError>;
}
