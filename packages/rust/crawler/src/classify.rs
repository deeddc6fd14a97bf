//! Module-page detection and signal extraction.
//!
//! Training-module pages follow a recognizable shape: an `h1.module-title`
//! heading, a `div.objectives` block, and one or more `div.question-frame`
//! blocks holding the exercise content. Everything here works on owned
//! strings; the parsed document never escapes a function, so the results
//! can cross `await` points freely.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::rules;

/// Extensions collected as downloadable attachments.
const DOWNLOAD_EXTENSIONS: [&str; 2] = [".pdf", ".zip"];

static OBJECTIVES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)objectives?:\s*(.+)").expect("static regex")
});

/// Signals scraped from a page that classifies as a training module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSignals {
    /// Title text, or the last URL path segment when the page has none.
    pub name: String,
    /// Objectives block text, when the page carries one.
    pub objectives: Option<String>,
    /// Question content to enrich: the concatenated question frames, or the
    /// whole page when no frame is present.
    pub question_html: String,
    /// Resolved attachment links (`.pdf`, `.zip`).
    pub download_links: Vec<Url>,
}

/// Classify a rendered page and scrape its module signals.
///
/// A page counts as a module when it carries a module title or at least one
/// question frame. Non-module pages return `None` and are crawled for links
/// only.
pub fn detect_module(html: &str, page_url: &Url) -> Option<ModuleSignals> {
    let document = Html::parse_document(html);
    let title_sel = Selector::parse("h1.module-title").expect("static selector");
    let objectives_sel = Selector::parse("div.objectives").expect("static selector");
    let question_sel = Selector::parse("div.question-frame").expect("static selector");

    let title = document
        .select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let questions: Vec<String> = document
        .select(&question_sel)
        .map(|el| el.html())
        .collect();

    if title.is_none() && questions.is_empty() {
        return None;
    }

    let objectives = document
        .select(&objectives_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let question_html = if questions.is_empty() {
        html.to_string()
    } else {
        questions.join("\n")
    };

    Some(ModuleSignals {
        name: title.unwrap_or_else(|| last_path_segment(page_url)),
        objectives,
        question_html,
        download_links: download_links(&document, page_url),
    })
}

/// Pull an objectives line out of enriched markdown, as a fallback when the
/// page itself had no objectives block.
pub fn objectives_from_markdown(markdown: &str) -> Option<String> {
    OBJECTIVES_RE
        .captures(markdown)
        .map(|caps| caps[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

fn last_path_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("module")
        .to_string()
}

fn download_links(document: &Html, page_url: &Url) -> Vec<Url> {
    let selector = Selector::parse("a[href]").expect("static selector");
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(url) = rules::resolve(page_url, href) else {
            continue;
        };
        let path = url.path().to_ascii_lowercase();
        if DOWNLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            && seen.insert(url.clone())
        {
            links.push(url);
        }
    }
    links
}
