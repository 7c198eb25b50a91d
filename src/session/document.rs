// src/session/document.rs
// =============================================================================
// HTML helpers shared by the session drivers.
//
// Everything here is synchronous on purpose: scraper's `Html` is not `Send`,
// so a driver parses the stored page body, pulls out owned data, and drops the
// document before its next `.await`.
//
// We use the `scraper` crate to query elements with CSS selectors, and the
// `url` crate to resolve relative links against the page they appear on.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SessionError;

/// A matched element as returned by `Session::evaluate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub text: String,
    pub attrs: BTreeMap<String, String>,
}

/// What clicking an element amounts to for a driver without a script engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClickAction {
    /// The element carries an href: load it.
    Follow(String),
    /// The element submits its form.
    Submit(FormSubmission),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormSubmission {
    pub method: String,
    pub action: String,
    pub fields: Vec<(String, String)>,
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|_| SessionError::InvalidSelector(selector.to_string()))
}

pub(crate) fn title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Returns every element matching `selector`.
pub(crate) fn query(html: &str, selector: &str) -> Result<Vec<Element>, SessionError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    Ok(document.select(&selector).map(to_element).collect())
}

fn to_element(element: ElementRef<'_>) -> Element {
    Element {
        tag: element.value().name().to_string(),
        text: element.text().collect::<String>().trim().to_string(),
        attrs: element
            .value()
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
    }
}

/// Extracts all HTTP/HTTPS links from HTML, resolved against `base`.
pub(crate) fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_url(base, href))
        .filter(|url| is_checkable_link(url))
        .collect()
}

// Resolves a possibly-relative href to an absolute URL
//
// Examples (base = "https://example.com/page"):
//   "/docs"              -> Some("https://example.com/docs")
//   "https://other.com"  -> Some("https://other.com/")
//   "#section"           -> None
//   "mailto:x@y.z"       -> None
pub(crate) fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("javascript:")
    {
        return None;
    }

    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.join(href).ok().map(|url| url.to_string()),
    }
}

fn is_checkable_link(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Works out what clicking the first match of `selector` does.
pub(crate) fn click_action(
    html: &str,
    base: &Url,
    selector: &str,
    typed: &HashMap<String, String>,
) -> Result<ClickAction, SessionError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| SessionError::ElementNotFound(selector.to_string()))?;

    if let Some(href) = element.value().attr("href") {
        return resolve_url(base, href)
            .map(ClickAction::Follow)
            .ok_or_else(|| SessionError::Unsupported {
                action: "follow",
                selector: selector.to_string(),
            });
    }

    if !is_submit_control(element) {
        return Err(SessionError::Unsupported {
            action: "click",
            selector: selector.to_string(),
        });
    }

    let form = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
        .ok_or_else(|| SessionError::Unsupported {
            action: "submit",
            selector: selector.to_string(),
        })?;

    let action = form
        .value()
        .attr("action")
        .and_then(|action| resolve_url(base, action))
        .unwrap_or_else(|| base.to_string());
    let method = form
        .value()
        .attr("method")
        .unwrap_or("get")
        .to_ascii_lowercase();

    let mut fields = form_fields(form, typed);
    if let Some(name) = element.value().attr("name") {
        let value = element.value().attr("value").unwrap_or_default();
        fields.push((name.to_string(), value.to_string()));
    }

    Ok(ClickAction::Submit(FormSubmission {
        method,
        action,
        fields,
    }))
}

fn is_submit_control(element: ElementRef<'_>) -> bool {
    let value = element.value();
    match value.name() {
        "button" => value.attr("type").map_or(true, |kind| kind.eq_ignore_ascii_case("submit")),
        "input" => value
            .attr("type")
            .is_some_and(|kind| kind.eq_ignore_ascii_case("submit")),
        _ => false,
    }
}

// Named inputs of a form with their current values. Typed values win over the
// value attribute; unchecked checkboxes and radios are left out.
fn form_fields(form: ElementRef<'_>, typed: &HashMap<String, String>) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("input[name], textarea[name], select[name]") else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    for input in form.select(&selector) {
        let value = input.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
        if kind == "submit" || kind == "button" {
            continue;
        }
        if (kind == "checkbox" || kind == "radio") && value.attr("checked").is_none() {
            continue;
        }

        let current = match typed.get(name) {
            Some(text) => text.clone(),
            None if value.name() == "textarea" => input.text().collect(),
            None => value.attr("value").unwrap_or_default().to_string(),
        };
        fields.push((name.to_string(), current));
    }
    fields
}

/// Name of the form field matched by `selector`, if it accepts text.
pub(crate) fn fillable_field(html: &str, selector: &str) -> Result<String, SessionError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let element = document
        .select(&parsed)
        .next()
        .ok_or_else(|| SessionError::ElementNotFound(selector.to_string()))?;

    let accepts_text = matches!(element.value().name(), "input" | "textarea");
    match element.value().attr("name") {
        Some(name) if accepts_text => Ok(name.to_string()),
        _ => Err(SessionError::Unsupported {
            action: "type into",
            selector: selector.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/page/").unwrap()
    }

    #[test]
    fn test_resolve_relative_link() {
        let url = Url::parse("https://example.com/page").unwrap();
        assert_eq!(resolve_url(&url, "/docs"), Some("https://example.com/docs".to_string()));
    }

    #[test]
    fn test_skip_anchor_and_mailto() {
        assert_eq!(resolve_url(&base(), "#section"), None);
        assert_eq!(resolve_url(&base(), "mailto:test@example.com"), None);
    }

    #[test]
    fn test_extract_multiple_links() {
        let html = r#"
            <a href="https://rust-lang.org">Rust</a>
            <a href="/docs">Docs</a>
            <a href="../about">About</a>
            <a href="mailto:test@example.com">Email</a>
        "#;
        let links = extract_links(html, &base());
        assert_eq!(
            links,
            vec![
                "https://rust-lang.org/",
                "https://example.com/docs",
                "https://example.com/about",
            ]
        );
    }

    #[test]
    fn test_title_and_query() {
        let html = r#"<html><head><title> Home </title></head>
            <body><p class="x" id="a">one</p><p class="x">two</p></body></html>"#;
        assert_eq!(title(html), Some("Home".to_string()));

        let found = query(html, "p.x").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "one");
        assert_eq!(found[0].attrs.get("id").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_invalid_selector() {
        assert!(matches!(query("<p></p>", "p[["), Err(SessionError::InvalidSelector(_))));
    }

    #[test]
    fn test_click_follows_href() {
        let html = r#"<a id="next" href="/two">Two</a>"#;
        let action = click_action(html, &base(), "#next", &HashMap::new()).unwrap();
        assert_eq!(action, ClickAction::Follow("https://example.com/two".to_string()));
    }

    #[test]
    fn test_click_submits_form_with_typed_values() {
        let html = r#"
            <form action="/login" method="POST">
                <input name="user" value="default">
                <input name="remember" type="checkbox">
                <textarea name="note">hi</textarea>
                <button id="go">Log in</button>
            </form>
        "#;
        let mut typed = HashMap::new();
        typed.insert("user".to_string(), "alice".to_string());

        let action = click_action(html, &base(), "#go", &typed).unwrap();
        assert_eq!(
            action,
            ClickAction::Submit(FormSubmission {
                method: "post".to_string(),
                action: "https://example.com/login".to_string(),
                fields: vec![
                    ("user".to_string(), "alice".to_string()),
                    ("note".to_string(), "hi".to_string()),
                ],
            })
        );
    }

    #[test]
    fn test_click_missing_element() {
        let result = click_action("<p></p>", &base(), "#nope", &HashMap::new());
        assert!(matches!(result, Err(SessionError::ElementNotFound(_))));
    }

    #[test]
    fn test_fillable_field() {
        let html = r#"<input id="u" name="user"><div id="d">x</div>"#;
        assert_eq!(fillable_field(html, "#u").unwrap(), "user");
        assert!(matches!(
            fillable_field(html, "#d"),
            Err(SessionError::Unsupported { .. })
        ));
    }
}
