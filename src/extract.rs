//! Targeted markup routines shared by content sources.
//!
//! None of this is a general HTML parser. Each routine implements exactly one rule
//! the crawl engine needs: isolate a class-bounded block (nesting aware), split a
//! region at a literal marker, cut fragments, and pull an image link out of a
//! fragment through an ordered list of strategies.

use crate::{error::ExtractError, model::ContentItem};
use lazy_regex::regex;
use regex::Regex;
use tracing::debug;

/// Returns the first element whose `class` attribute is exactly `class`, from its
/// opening tag through the matching closing tag.
///
/// Same-named tags nested inside the block are depth counted, so an inner
/// `</div>` does not terminate an outer `<div class=..>` early.
pub fn isolate_block<'a>(markup: &'a str, class: &str) -> Option<&'a str> {
    let value = regex::escape(class);
    let open = Regex::new(&format!(
        r#"(?i)<([a-z][a-z0-9]*)\b[^<>]*?\sclass\s*=\s*(?:"{value}"|'{value}'|{value}\b)[^<>]*>"#
    ))
    .ok()?;

    for caps in open.captures_iter(markup) {
        let (whole, name) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(name)) => (whole, name.as_str()),
            _ => continue,
        };
        if whole.as_str().ends_with("/>") {
            continue;
        }
        if let Some(end) = balanced_end(markup, whole.end(), name) {
            return Some(&markup[whole.start()..end]);
        }
    }
    None
}

/// Scans forward from just past an opening `<name ..>` and returns the byte offset
/// right after the closing tag that brings the depth back to zero.
///
/// Comments and script bodies are stepped over whole, so tag-like text inside them
/// does not count.
fn balanced_end(markup: &str, from: usize, name: &str) -> Option<usize> {
    let tag = Regex::new(&format!(
        r"(?is)<!--.*?-->|<script\b[^>]*>.*?</script\s*>|<(?P<close>/?){}\b[^<>]*?(?P<empty>/?)>",
        regex::escape(name)
    ))
    .ok()?;

    let mut depth = 1usize;
    for caps in tag.captures_iter(&markup[from..]) {
        let (Some(close), Some(empty)) = (caps.name("close"), caps.name("empty")) else {
            continue;
        };
        let closing = !close.as_str().is_empty();
        let self_closing = !empty.as_str().is_empty();
        if closing {
            depth -= 1;
            if depth == 0 {
                return caps.get(0).map(|m| from + m.end());
            }
        } else if !self_closing {
            depth += 1;
        }
    }
    None
}

/// Splits `block` into `(before, marker_and_after)` at the first `marker`.
pub fn split_at_marker<'a>(block: &'a str, marker: &str) -> Result<(&'a str, &'a str), ExtractError> {
    block
        .find(marker)
        .map(|at| block.split_at(at))
        .ok_or(ExtractError::PaginationMarkerMissing)
}

/// Cuts a content region at every `delimiter`, dropping blank pieces.
pub fn split_fragments<'a>(content: &'a str, delimiter: &str) -> Vec<&'a str> {
    content
        .split(delimiter)
        .filter(|f| !f.trim().is_empty())
        .collect()
}

/// Tries each strategy in order against the fragment (with line breaks removed) and
/// builds an item from the first `link` capture. The owning page is left empty.
pub fn extract_item(fragment: &str, strategies: &[&Regex]) -> Result<ContentItem, ExtractError> {
    let single_line = fragment.replace(['\r', '\n'], "");

    for (n, strategy) in strategies.iter().enumerate() {
        debug!("Trying image strategy {}", n + 1);
        let link = strategy
            .captures(&single_line)
            .and_then(|caps| caps.name("link"))
            .map(|m| m.as_str().trim())
            .filter(|link| !link.is_empty());
        if let Some(link) = link {
            let description = description_after_last_break(&single_line);
            return Ok(ContentItem::new(description.as_str(), link));
        }
    }
    Err(ExtractError::NoImage)
}

/// Text after the last `<br>` of a fragment, or empty when there is none.
pub fn description_after_last_break(fragment: &str) -> String {
    regex!(r"(?i)<br\s*/?>")
        .split(fragment)
        .skip(1)
        .last()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Looks for the next-page anchor (named group `link`) and resolves it against the
/// page it was found on.
pub fn next_link(pagination: &str, anchor: &Regex, current_page: &str) -> Option<String> {
    let href = anchor.captures(pagination)?.name("link")?.as_str().trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match url::Url::parse(current_page).and_then(|base| base.join(href)) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Some(href.to_string()),
    }
}

/// Last path segment of a link, without query string or fragment.
pub fn file_name(link: &str) -> String {
    let path = link.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
