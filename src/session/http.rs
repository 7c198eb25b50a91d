// src/session/http.rs
// =============================================================================
// A session driver that talks plain HTTP.
//
// There is no script engine behind it, so interaction is modelled the way a
// text browser would do it:
// - navigate: GET the page (relative URLs resolve against the current page)
// - click: follow the element's href, or submit its form
// - type_text: remember a value for a named form field
// - evaluate: run a CSS selector, return the matched elements as JSON
// - links: anchors for HTML pages, link destinations for markdown documents
//
// All sessions from one factory share a single reqwest Client, so they share
// its connection pool.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::document::{self, ClickAction};
use super::markdown::extract_markdown_links;
use super::{PageInfo, Session, SessionFactory};
use crate::error::SessionError;

/// HTTP client settings, the `[http]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSessionConfig {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    pub user_agent: String,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_redirects: 5,
            user_agent: concat!("crawl-pool/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpSessionFactory {
    client: Client,
}

impl HttpSessionFactory {
    pub fn new(config: &HttpSessionConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SessionError::Open(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open_session(&self) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(HttpSession::new(self.client.clone())))
    }

    async fn close_session(&self, session: Box<dyn Session>) -> Result<(), SessionError> {
        drop(session);
        Ok(())
    }
}

struct LoadedPage {
    url: Url,
    content_type: String,
    body: String,
}

impl LoadedPage {
    fn is_markdown(&self) -> bool {
        self.content_type.contains("markdown") || self.url.path().ends_with(".md")
    }
}

pub struct HttpSession {
    client: Client,
    page: Option<LoadedPage>,
    // Form field values typed since the last navigation, keyed by field name.
    typed: HashMap<String, String>,
}

impl HttpSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            page: None,
            typed: HashMap::new(),
        }
    }

    fn page(&self) -> Result<&LoadedPage, SessionError> {
        self.page.as_ref().ok_or(SessionError::NoPage)
    }

    fn resolve(&self, target: &str) -> Result<Url, SessionError> {
        let parsed = match &self.page {
            Some(page) => page.url.join(target),
            None => Url::parse(target),
        };
        parsed.map_err(|e| SessionError::InvalidUrl {
            url: target.to_string(),
            reason: e.to_string(),
        })
    }

    async fn load(&mut self, requested: Url, response: Response) -> Result<PageInfo, SessionError> {
        let status = response.status().as_u16();
        let url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        let body = response.text().await.map_err(categorize_error)?;

        let page = LoadedPage {
            url,
            content_type,
            body,
        };
        let title = if page.is_markdown() {
            None
        } else {
            document::title(&page.body)
        };
        let info = PageInfo {
            url: page.url.to_string(),
            status,
            title,
            redirected: page.url != requested,
        };

        self.page = Some(page);
        self.typed.clear();
        Ok(info)
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<PageInfo, SessionError> {
        let target = self.resolve(url)?;
        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(categorize_error)?;
        self.load(target, response).await
    }

    async fn click(&mut self, selector: &str) -> Result<(), SessionError> {
        let action = {
            let page = self.page()?;
            document::click_action(&page.body, &page.url, selector, &self.typed)?
        };

        match action {
            ClickAction::Follow(url) => {
                self.navigate(&url).await?;
            }
            ClickAction::Submit(form) => {
                let mut target = self.resolve(&form.action)?;
                let request = if form.method == "post" {
                    self.client.post(target.clone()).form(&form.fields)
                } else {
                    target.query_pairs_mut().clear().extend_pairs(&form.fields);
                    self.client.get(target.clone())
                };
                let response = request.send().await.map_err(categorize_error)?;
                self.load(target, response).await?;
            }
        }
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SessionError> {
        let name = document::fillable_field(&self.page()?.body, selector)?;
        self.typed.entry(name).or_default().push_str(text);
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> Result<Value, SessionError> {
        let found = document::query(&self.page()?.body, expression)?;
        Ok(Value::Array(
            found
                .into_iter()
                .map(|element| json!({ "tag": element.tag, "text": element.text, "attrs": element.attrs }))
                .collect(),
        ))
    }

    async fn links(&mut self) -> Result<Vec<String>, SessionError> {
        let page = self.page()?;
        if page.is_markdown() {
            Ok(extract_markdown_links(&page.body, &page.url))
        } else {
            Ok(document::extract_links(&page.body, &page.url))
        }
    }

    fn current_url(&self) -> Option<&str> {
        self.page.as_ref().map(|page| page.url.as_str())
    }
}

// Maps reqwest failures onto session errors
//
// reqwest errors can happen for many reasons:
// - Network timeout
// - DNS resolution failure
// - TLS certificate issues
// - Too many redirects
fn categorize_error(error: reqwest::Error) -> SessionError {
    // The Debug form includes the source chain, where the useful detail lives
    let detail = format!("{error:?}").to_ascii_lowercase();

    if error.is_timeout() {
        SessionError::Timeout
    } else if error.is_redirect() {
        SessionError::TooManyRedirects
    } else if error.is_connect() {
        if detail.contains("dns") {
            SessionError::Dns
        } else {
            SessionError::Connect(error.to_string())
        }
    } else if detail.contains("certificate") || detail.contains("ssl") || detail.contains("tls") {
        SessionError::Tls
    } else {
        SessionError::Http(error.to_string())
    }
}
