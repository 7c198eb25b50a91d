// src/session/markdown.rs
// =============================================================================
// This module extracts links from Markdown documents.
//
// Sessions land on markdown whenever a site serves raw docs (README.md and
// friends as text/markdown). The `links()` call then has to understand
// markdown links instead of HTML anchors.
//
// We use the `pulldown-cmark` crate which:
// - Parses Markdown into events (heading, paragraph, link, etc.)
// - Follows the CommonMark specification
// - Is a streaming parser, no DOM is built
// =============================================================================

use pulldown_cmark::{Event, Parser, Tag};
use url::Url;

use super::document::resolve_url;

// Extracts all HTTP/HTTPS links from Markdown text
//
// Relative destinations are resolved against `base` (the document's own URL),
// so "./docs/README.md" on https://example.com/repo/ becomes
// https://example.com/repo/docs/README.md.
pub fn extract_markdown_links(markdown: &str, base: &Url) -> Vec<String> {
    let mut links = Vec::new();

    // A link produces Start(Link), then its text, then End(Link).
    // The destination is only known at Start, so we hold it until End.
    let mut current_link: Option<String> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Link(_link_type, dest_url, _title)) => {
                current_link = resolve_url(base, &dest_url).filter(|url| is_http_link(url));
            }
            Event::End(Tag::Link(..)) => {
                if let Some(url) = current_link.take() {
                    links.push(url);
                }
            }
            _ => {}
        }
    }

    links
}

fn is_http_link(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/repo/").unwrap()
    }

    #[test]
    fn test_extract_simple_link() {
        let markdown = "Check out [Rust](https://www.rust-lang.org)!";
        let links = extract_markdown_links(markdown, &base());
        assert_eq!(links, vec!["https://www.rust-lang.org/"]);
    }

    #[test]
    fn test_extract_multiple_links() {
        let markdown = r#"
# Resources

- [Rust](https://www.rust-lang.org)
- [Cargo](https://doc.rust-lang.org/cargo/)
- [Docs](https://doc.rust-lang.org/)
        "#;
        let links = extract_markdown_links(markdown, &base());
        assert_eq!(links.len(), 3);
        assert!(links.contains(&"https://doc.rust-lang.org/cargo/".to_string()));
    }

    #[test]
    fn test_skip_mailto_links() {
        let markdown = "Email me at [email](mailto:test@example.com)";
        assert!(extract_markdown_links(markdown, &base()).is_empty());
    }

    #[test]
    fn test_resolve_relative_links() {
        let markdown = "See [docs](./docs/README.md)";
        let links = extract_markdown_links(markdown, &base());
        assert_eq!(links, vec!["https://example.com/repo/docs/README.md"]);
    }
}
