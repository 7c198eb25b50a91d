// src/session/mock.rs
// =============================================================================
// An in-memory session driver.
//
// Pages are HTML strings registered up front under their URL. Sessions
// navigate between them without touching the network, which makes this the
// driver of choice for tests and for dry runs of a hook.
//
// The factory also counts opened and closed sessions and can be told to fail
// its first N opens, so pool start-up and shutdown can be checked.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use url::Url;

use super::document::{self, ClickAction};
use super::{PageInfo, Session, SessionFactory};
use crate::error::SessionError;

#[derive(Default)]
struct MockState {
    pages: RwLock<HashMap<String, String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    failures_left: AtomicUsize,
}

/// Factory for [`MockSession`]s. Clones share pages and counters.
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    state: Arc<MockState>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `html` as the body served for `url`.
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.add_page(url, html);
        self
    }

    pub fn add_page(&self, url: &str, html: &str) {
        self.state.pages.write().insert(page_key(url), html.to_string());
    }

    /// Makes the next `count` calls to `open_session` fail.
    pub fn fail_first_opens(self, count: usize) -> Self {
        self.state.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

fn page_key(url: &str) -> String {
    Url::parse(url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open_session(&self) -> Result<Box<dyn Session>, SessionError> {
        let injected = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SessionError::Open("injected failure".to_string()));
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            current: None,
            typed: HashMap::new(),
        }))
    }

    async fn close_session(&self, session: Box<dyn Session>) -> Result<(), SessionError> {
        drop(session);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSession {
    state: Arc<MockState>,
    current: Option<(Url, String)>,
    typed: HashMap<String, String>,
}

impl MockSession {
    fn page(&self) -> Result<&(Url, String), SessionError> {
        self.current.as_ref().ok_or(SessionError::NoPage)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn navigate(&mut self, url: &str) -> Result<PageInfo, SessionError> {
        let parsed = match &self.current {
            Some((base, _)) => base.join(url),
            None => Url::parse(url),
        }
        .map_err(|e| SessionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let body = self.state.pages.read().get(parsed.as_str()).cloned();
        let status = if body.is_some() { 200 } else { 404 };
        let body = body.unwrap_or_default();

        let info = PageInfo {
            url: parsed.to_string(),
            status,
            title: document::title(&body),
            redirected: false,
        };
        self.current = Some((parsed, body));
        self.typed.clear();
        Ok(info)
    }

    async fn click(&mut self, selector: &str) -> Result<(), SessionError> {
        let action = {
            let (base, body) = self.page()?;
            document::click_action(body, base, selector, &self.typed)?
        };

        let target = match action {
            ClickAction::Follow(url) => url,
            ClickAction::Submit(form) => {
                let mut action = Url::parse(&form.action).map_err(|e| SessionError::InvalidUrl {
                    url: form.action.clone(),
                    reason: e.to_string(),
                })?;
                action.set_query(None);
                action.to_string()
            }
        };
        self.navigate(&target).await?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SessionError> {
        let name = document::fillable_field(&self.page()?.1, selector)?;
        self.typed.entry(name).or_default().push_str(text);
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> Result<Value, SessionError> {
        let found = document::query(&self.page()?.1, expression)?;
        Ok(Value::Array(
            found
                .into_iter()
                .map(|element| json!({ "tag": element.tag, "text": element.text, "attrs": element.attrs }))
                .collect(),
        ))
    }

    async fn links(&mut self) -> Result<Vec<String>, SessionError> {
        let (base, body) = self.page()?;
        Ok(document::extract_links(body, base))
    }

    fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|(url, _)| url.as_str())
    }
}
