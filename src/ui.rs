use std::sync::Arc;

use axum::extract::State;
use axum::response::Html;
use minijinja::{context, Environment};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};

use crate::commands::ApiError;
use crate::doc_processor::SUPPORTED_EXTENSIONS;
use crate::state::AppState;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

/// Server-rendered pages.
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render_index(&self, model: &str, max_upload_mb: usize) -> Result<String, minijinja::Error> {
        let accept = SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect::<Vec<_>>()
            .join(",");
        self.env.get_template("index.html")?.render(context! {
            title => "Chat with your own PDF",
            model => model,
            accept => accept,
            max_upload_mb => max_upload_mb,
        })
    }
}

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Relative links and the schemes in `SAFE_SCHEMES` pass; `javascript:` and friends do not.
fn is_safe_url(url: &str) -> bool {
    // Browsers ignore embedded whitespace and control characters in a scheme.
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    match cleaned.split_once(':') {
        None => true,
        Some((scheme, _)) if scheme.contains(|c: char| matches!(c, '/' | '?' | '#')) => true,
        Some((scheme, _)) => SAFE_SCHEMES.contains(&scheme),
    }
}

fn neutralize(url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&url) {
        url
    } else {
        CowStr::Borrowed("#")
    }
}

/// Render markdown to HTML. Raw HTML in the source is shown as text, and links
/// or images with an unsafe scheme point nowhere.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub async fn index_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    let max_upload_mb = state.config.server.max_upload_bytes / (1024 * 1024);
    let page = state.pages.render_index(&state.config.llm.model, max_upload_mb)?;
    Ok(Html(page))
}

pub async fn health() -> &'static str {
    "ok"
}
