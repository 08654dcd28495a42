use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{validate_url, ScrapeError, Scraper};
use crate::models::ScrapedDocument;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "Mozilla/5.0 (compatible; broker-ai-api/1.0; +listing analysis)";
const MIN_TEXT_LEN: usize = 200;
const SHORT_BLOCK_LEN: usize = 250;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static CONTENT_HINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(listing|advert|offer|property|estate|details|description|content|obiava)")
        .expect("valid regex")
});

static CHROME_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(cookie|consent|newsletter|share|social|breadcrumb|related|similar|promo|banner|footer)")
        .expect("valid regex")
});

static MULTI_NEWLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static ARTICLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("article").expect("valid selector"));
static MAIN_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("main").expect("valid selector"));
static DIV_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("div, section").expect("valid selector"));
static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));
static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("valid selector"));
static JSONLD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector"));

// ── Scraper ──────────────────────────────────────────────────────────────────

/// Local scraper: plain HTTP fetch, HTML converted to markdown in-process.
/// No JavaScript rendering.
pub struct HtmlScraper {
    client: reqwest::Client,
}

impl HtmlScraper {
    pub fn new(insecure: bool) -> Result<Self, ScrapeError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9,bg;q=0.8"),
        );

        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ScrapeError::Request(e.to_string()))?;

        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                ScrapeError::Request(format!("ConnectError: {}", e))
            } else {
                ScrapeError::Request(format!("RequestError: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(ScrapeError::Upstream(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if !content_type.contains("html") {
            return Err(ScrapeError::NotHtml);
        }

        response
            .text()
            .await
            .map_err(|e| ScrapeError::Request(e.to_string()))
    }
}

#[async_trait]
impl Scraper for HtmlScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedDocument, ScrapeError> {
        validate_url(url)?;
        let html = self.fetch_html(url).await?;
        let document = extract_from_html(&html, url);
        debug!(
            url,
            markdown_chars = document.markdown.len(),
            images = document.image_references.len(),
            "page converted"
        );
        Ok(document)
    }
}

// ── Image reference collection ───────────────────────────────────────────────

/// Page-order image references without duplicates.
#[derive(Default)]
struct ImageRefs {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl ImageRefs {
    fn push(&mut self, reference: String) {
        if self.seen.insert(reference.clone()) {
            self.ordered.push(reference);
        }
    }
}

struct WalkCtx<'a> {
    in_content: bool,
    title: Option<&'a str>,
}

// ── Conversion ───────────────────────────────────────────────────────────────

/// Convert a listing page to markdown and collect every image it references.
///
/// Images found inside the main content come first, followed by the rest of
/// the page's `<img>` elements (galleries often sit outside the content
/// container). When the page has no `<img>` at all, the social preview image
/// (`og:image`, JSON-LD) is used.
pub fn extract_from_html(html: &str, page_url: &str) -> ScrapedDocument {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let (container, fallback_title) = find_container(&document);

    let title: Option<String> = container
        .and_then(|c| {
            c.select(&H1_SEL)
                .next()
                .map(text_of)
                .filter(|s| !s.is_empty())
        })
        .or_else(|| document.select(&TITLE_SEL).next().map(text_of).filter(|s| !s.is_empty()))
        .or(fallback_title);

    let ctx = WalkCtx {
        in_content: container.map_or(false, |c| matches!(c.value().name(), "article" | "main")),
        title: title.as_deref(),
    };

    let mut images = ImageRefs::default();
    let markdown = container
        .map(|c| walk_element(c, base.as_ref(), &mut images, &ctx))
        .unwrap_or_default();

    // Source indentation leaks in through text nodes.
    let markdown = markdown.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    let markdown = MULTI_NEWLINE_RE
        .replace_all(&markdown, "\n\n")
        .trim()
        .to_string();

    let markdown = match title.as_deref() {
        Some(t) => ensure_markdown_title(&markdown, t),
        None => markdown,
    };

    for img in document.select(&IMG_SEL) {
        if let Some(src) = resolve_img_src(img, base.as_ref()) {
            images.push(src);
        }
    }

    if images.ordered.is_empty() {
        if let Some(preview) = extract_meta_image(&document).or_else(|| extract_jsonld_image(&document)) {
            images.push(absolutize(&preview, base.as_ref()));
        }
    }

    ScrapedDocument {
        url: page_url.to_string(),
        markdown,
        image_references: images.ordered,
    }
}

fn find_container<'doc>(document: &'doc Html) -> (Option<ElementRef<'doc>>, Option<String>) {
    if let Some(el) = document.select(&ARTICLE_SEL).next() {
        return (Some(el), None);
    }
    if let Some(el) = document.select(&MAIN_SEL).next() {
        return (Some(el), None);
    }

    // Largest block whose class/id looks like listing content.
    let best = document
        .select(&DIV_SEL)
        .filter(|el| CONTENT_HINT_RE.is_match(&class_id(*el)))
        .map(|el| (text_of(el).len(), el))
        .max_by_key(|(len, _)| *len);

    if let Some((len, el)) = best {
        if len >= MIN_TEXT_LEN {
            return (Some(el), None);
        }
    }

    let fallback_title = document
        .select(&TITLE_SEL)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty());

    (document.select(&BODY_SEL).next(), fallback_title)
}

fn walk_element(el: ElementRef<'_>, base: Option<&Url>, images: &mut ImageRefs, ctx: &WalkCtx) -> String {
    let name = el.value().name();

    if matches!(
        name,
        "script" | "style" | "noscript" | "svg" | "form" | "button" | "iframe" | "template" | "video" | "audio"
    ) {
        return String::new();
    }

    if matches!(name, "nav" | "footer" | "aside") {
        return String::new();
    }

    if name == "header" && !ctx.in_content {
        return String::new();
    }

    // Short site-chrome blocks: cookie banners, share bars, "similar offers".
    if matches!(name, "section" | "div" | "p" | "ul" | "ol" | "li") {
        let ident = class_id(el);
        if !ident.trim().is_empty() && CHROME_CLASS_RE.is_match(&ident) {
            let text = text_of(el);
            let holds_title = ctx.title.map_or(false, |t| text.contains(t));
            if text.len() <= SHORT_BLOCK_LEN && !holds_title {
                return String::new();
            }
        }
    }

    let child_ctx = WalkCtx {
        in_content: ctx.in_content || matches!(name, "article" | "main"),
        title: ctx.title,
    };

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = text_of(el);
            if text.is_empty() {
                return String::new();
            }
            format!("{} {}\n\n", "#".repeat(level), text)
        }

        "figure" => {
            let rendered = find_first_tag(el, "img")
                .and_then(|img| image_markdown(img, base, images))
                .unwrap_or_default();
            let caption = find_first_tag(el, "figcaption")
                .map(text_of)
                .filter(|s| !s.is_empty());
            match caption {
                Some(cap) => format!("{}*{}*\n\n", rendered, cap),
                None => rendered,
            }
        }

        "img" => image_markdown(el, base, images).unwrap_or_default(),

        "picture" => find_first_tag(el, "img")
            .and_then(|img| image_markdown(img, base, images))
            .unwrap_or_default(),

        "a" => {
            let content = walk_children(el, base, images, &child_ctx);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            match el.value().attr("href").filter(|h| !h.starts_with('#') && !h.starts_with("javascript:")) {
                Some(href) => format!("[{}]({})", trimmed, absolutize(href, base)),
                None => trimmed.to_string(),
            }
        }

        "p" => block(walk_children(el, base, images, &child_ctx)),

        "br" => "\n".to_string(),
        "hr" => "\n---\n\n".to_string(),

        "ul" | "ol" => render_list(el, base, images, &child_ctx, name == "ol"),

        "li" => {
            let content = walk_children(el, base, images, &child_ctx);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return String::new();
            }
            format!("- {}\n", trimmed)
        }

        // Listing sites put most attributes (area, floor, heating) in tables.
        "table" => {
            let rendered = walk_children(el, base, images, &child_ctx);
            if rendered.trim().is_empty() {
                String::new()
            } else {
                format!("{}\n", rendered)
            }
        }

        "tr" => {
            let cells: Vec<String> = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .map(|c| normalize_text(&walk_children(c, base, images, &child_ctx)))
                .filter(|c| !c.is_empty())
                .collect();
            if cells.is_empty() {
                String::new()
            } else {
                format!("| {} |\n", cells.join(" | "))
            }
        }

        "strong" | "b" => wrap_inline(walk_children(el, base, images, &child_ctx), "**"),
        "em" | "i" => wrap_inline(walk_children(el, base, images, &child_ctx), "*"),

        "blockquote" => {
            let content = walk_children(el, base, images, &child_ctx);
            let quoted = content
                .trim()
                .lines()
                .map(|l| format!("> {}", l))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n\n", quoted)
        }

        _ => walk_children(el, base, images, &child_ctx),
    }
}

fn walk_children(el: ElementRef<'_>, base: Option<&Url>, images: &mut ImageRefs, ctx: &WalkCtx) -> String {
    let mut result = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => result.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    result.push_str(&walk_element(child_el, base, images, ctx));
                }
            }
            _ => {}
        }
    }
    result
}

fn render_list(el: ElementRef<'_>, base: Option<&Url>, images: &mut ImageRefs, ctx: &WalkCtx, ordered: bool) -> String {
    let mut result = String::new();
    let mut idx = 1usize;

    for item in el.children().filter_map(ElementRef::wrap) {
        if item.value().name() != "li" {
            continue;
        }
        let content = walk_children(item, base, images, ctx);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            continue;
        }
        if ordered {
            result.push_str(&format!("{}. {}\n", idx, trimmed));
            idx += 1;
        } else {
            result.push_str(&format!("- {}\n", trimmed));
        }
    }

    if !result.is_empty() {
        result.push('\n');
    }
    result
}

fn block(content: String) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n\n", trimmed)
    }
}

fn wrap_inline(content: String, marker: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}{}{}", marker, trimmed, marker)
    }
}

// ── Image helpers ────────────────────────────────────────────────────────────

/// Record the image and render it. Inline `data:` images are recorded but
/// kept out of the markdown.
fn image_markdown(img: ElementRef<'_>, base: Option<&Url>, images: &mut ImageRefs) -> Option<String> {
    let src = resolve_img_src(img, base)?;
    let alt = img
        .value()
        .attr("alt")
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    let rendered = if src.starts_with("data:") {
        String::new()
    } else {
        format!("![{}]({})\n\n", alt, src)
    };
    images.push(src);
    Some(rendered)
}

fn resolve_img_src(el: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let v = el.value();

    // Lazy-loading attributes first; `src` is often a placeholder on galleries.
    let src: Option<String> = ["data-src", "data-original", "data-lazy", "data-large", "src"]
        .iter()
        .find_map(|a| v.attr(a).map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string)
        .or_else(|| {
            v.attr("srcset")
                .or_else(|| v.attr("data-srcset"))
                .and_then(best_src_from_srcset)
        });

    let src = src?;
    if src.starts_with("data:") {
        return Some(src);
    }
    Some(absolutize(&src, base))
}

/// Pick the widest (or highest density) candidate; ties keep the later entry.
fn best_src_from_srcset(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .enumerate()
        .filter_map(|(index, part)| {
            let mut pieces = part.split_whitespace();
            let url = pieces.next()?.to_string();
            let score = pieces
                .next()
                .and_then(|d| d.strip_suffix('w').or_else(|| d.strip_suffix('x')))
                .and_then(|n| n.parse::<f64>().ok())
                .unwrap_or(0.0);
            Some((score, index, url))
        })
        .max_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        })
        .map(|(_, _, url)| url)
}

fn extract_meta_image(document: &Html) -> Option<String> {
    let checks = [
        ("property", "og:image"),
        ("property", "og:image:secure_url"),
        ("name", "twitter:image"),
        ("itemprop", "image"),
    ];
    for (attr, value) in &checks {
        let sel_str = format!("meta[{}=\"{}\"]", attr, value);
        let Some(sel) = Selector::parse(&sel_str).ok() else {
            continue;
        };
        let content = document
            .select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty());
        if let Some(content) = content {
            return Some(content.to_string());
        }
    }
    None
}

fn extract_jsonld_image(document: &Html) -> Option<String> {
    document
        .select(&JSONLD_SEL)
        .filter_map(|script| serde_json::from_str::<Value>(&script.text().collect::<String>()).ok())
        .find_map(|value| jsonld_image_value(&value))
}

fn jsonld_image_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            let direct = map.get("image").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.iter().find_map(image_url_of),
                Value::Object(_) => image_url_of(v),
                _ => None,
            });
            direct.or_else(|| map.values().find_map(jsonld_image_value))
        }
        Value::Array(items) => items.iter().find_map(jsonld_image_value),
        _ => None,
    }
}

fn image_url_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

// ── Markdown post-processing ─────────────────────────────────────────────────

/// Make the first non-empty line a `# title` heading when it is the bare title.
fn ensure_markdown_title(markdown: &str, title: &str) -> String {
    let expected = format!("# {}", title);
    let mut lines: Vec<String> = markdown.lines().map(str::to_string).collect();
    if let Some(first) = lines.iter_mut().find(|l| !l.trim().is_empty()) {
        if first.trim() == title {
            *first = expected;
            return lines.join("\n");
        }
        return markdown.to_string();
    }
    expected
}

// ── DOM utility helpers ──────────────────────────────────────────────────────

fn text_of(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn class_id(el: ElementRef<'_>) -> String {
    let id = el.value().id().unwrap_or("");
    let classes = el.value().classes().collect::<Vec<_>>().join(" ");
    format!("{} {}", id, classes)
}

fn absolutize(href: &str, base: Option<&Url>) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}

fn find_first_tag<'a>(el: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    el.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|d| d.value().name() == tag)
}
