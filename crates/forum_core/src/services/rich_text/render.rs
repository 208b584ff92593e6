//! Markdown-ish rendering and extraction. Everything is escaped first; only
//! the tags this module emits itself reach the output.

use super::sanitize;
use crate::domain::{AttachmentInfo, TargetKind, TargetRef, TextFormat};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;

static QUOTE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:>\s*)?\[?quote:(topic|comment)/(\d+)\]?\s*$").expect("valid quote pattern")
});
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid heading pattern"));
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").expect("valid rule pattern"));
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*+]\s+(.*)$").expect("valid bullet pattern"));
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d{1,9}[.)]\s+(.*)$").expect("valid list pattern"));
static LANGUAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+#.\-]{1,32}$").expect("valid language pattern"));
static CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("valid code span pattern"));
static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]{2,32})\b").expect("valid mention pattern"));
static ATTACHMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[attachment:([A-Za-z0-9_.\-]{1,128})\]\]").expect("valid attachment pattern")
});
static INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<code>`[^`\n]+`)",
        r"|(?P<attach>\[\[attachment:(?P<ah>[A-Za-z0-9_.\-]{1,128})\]\])",
        r"|(?P<img>!\[(?P<ialt>[^\]\n]*)\]\((?P<isrc>[^)\s]+)\))",
        r"|(?P<link>\[(?P<ltext>[^\]\n]+)\]\((?P<lhref>[^)\s]+)\))",
        r"|(?P<bold>\*\*(?P<btext>[^*\n]+)\*\*)",
        r"|(?P<em>\*(?P<etext>[^*\n]+)\*)",
        r"|(?P<mention>@(?P<handle>[A-Za-z0-9_]{2,32})\b)",
    ))
    .expect("valid inline pattern")
});

//=========================================================================================
// Block Structure
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Code { language: String, code: String },
    Quote { source: TargetRef, line: String },
    Heading { level: usize, text: String },
    Rule,
    BlockQuote(Vec<String>),
    List { ordered: bool, items: Vec<String> },
    Paragraph(Vec<String>),
}

impl Block {
    /// Lines of ordinary prose inside the block.
    fn prose(&self) -> Vec<&str> {
        match self {
            Block::Heading { text, .. } => vec![text.as_str()],
            Block::BlockQuote(lines) | Block::Paragraph(lines) => lines.iter().map(String::as_str).collect(),
            Block::List { items, .. } => items.iter().map(String::as_str).collect(),
            Block::Code { .. } | Block::Quote { .. } | Block::Rule => Vec::new(),
        }
    }
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    paragraph: Vec<String>,
    quoted: Vec<String>,
    list: Option<(bool, Vec<String>)>,
}

impl BlockBuilder {
    fn flush(&mut self) {
        if !self.paragraph.is_empty() {
            self.blocks.push(Block::Paragraph(std::mem::take(&mut self.paragraph)));
        }
        if !self.quoted.is_empty() {
            self.blocks.push(Block::BlockQuote(std::mem::take(&mut self.quoted)));
        }
        if let Some((ordered, items)) = self.list.take() {
            self.blocks.push(Block::List { ordered, items });
        }
    }

    fn push(&mut self, block: Block) {
        self.flush();
        self.blocks.push(block);
    }

    fn paragraph_line(&mut self, line: &str) {
        if !self.quoted.is_empty() || self.list.is_some() {
            self.flush();
        }
        self.paragraph.push(line.to_string());
    }

    fn quoted_line(&mut self, line: &str) {
        if !self.paragraph.is_empty() || self.list.is_some() {
            self.flush();
        }
        self.quoted.push(line.to_string());
    }

    fn list_item(&mut self, ordered: bool, item: &str) {
        match &mut self.list {
            Some((kind, items)) if *kind == ordered => items.push(item.to_string()),
            _ => {
                self.flush();
                self.list = Some((ordered, vec![item.to_string()]));
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush();
        self.blocks
    }
}

fn normalise_language(info: &str) -> String {
    info.split_whitespace()
        .next()
        .filter(|lang| LANGUAGE.is_match(lang))
        .map(|lang| lang.to_ascii_lowercase())
        .unwrap_or_else(|| "plain".to_string())
}

fn quote_source(caps: &Captures<'_>) -> Option<TargetRef> {
    let kind = match caps.get(1)?.as_str() {
        "topic" => TargetKind::Topic,
        _ => TargetKind::Comment,
    };
    let id = caps.get(2)?.as_str().parse().ok()?;
    Some(TargetRef { kind, id })
}

fn parse_blocks(raw: &str) -> Vec<Block> {
    let text = raw.replace("\r\n", "\n");
    let mut builder = BlockBuilder::default();
    let mut lines = text.split('\n');

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if let Some(info) = trimmed.strip_prefix("```") {
            let language = normalise_language(info);
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                code.push(inner);
            }
            builder.push(Block::Code { language, code: code.join("\n") });
            continue;
        }

        if trimmed.is_empty() {
            builder.flush();
            continue;
        }

        if let Some(source) = QUOTE_LINE.captures(line).as_ref().and_then(quote_source) {
            builder.push(Block::Quote { source, line: trimmed.to_string() });
            continue;
        }

        if let Some(caps) = HEADING.captures(trimmed) {
            let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            builder.push(Block::Heading { level, text: text.to_string() });
            continue;
        }

        if RULE.is_match(trimmed) {
            builder.push(Block::Rule);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix('>') {
            builder.quoted_line(rest.trim_start());
            continue;
        }

        if let Some(item) = BULLET.captures(line).and_then(|c| c.get(1)) {
            builder.list_item(false, item.as_str().trim());
            continue;
        }

        if let Some(item) = NUMBERED.captures(line).and_then(|c| c.get(1)) {
            builder.list_item(true, item.as_str().trim());
            continue;
        }

        builder.paragraph_line(trimmed);
    }

    builder.finish()
}

//=========================================================================================
// Extraction
//=========================================================================================

/// Everything the processor must resolve before rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Scan {
    pub handles: Vec<String>,
    pub attachment_handles: Vec<String>,
    pub code_blocks: Vec<(String, String)>,
    pub quote_refs: Vec<TargetRef>,
}

impl Scan {
    fn add_handles(&mut self, text: &str) {
        for handle in scan_mentions(text) {
            if !self.handles.iter().any(|h| h.eq_ignore_ascii_case(&handle)) {
                self.handles.push(handle);
            }
        }
    }

    fn add_attachments(&mut self, text: &str) {
        for caps in ATTACHMENT.captures_iter(text) {
            if let Some(handle) = caps.get(1) {
                if !self.attachment_handles.iter().any(|h| h == handle.as_str()) {
                    self.attachment_handles.push(handle.as_str().to_string());
                }
            }
        }
    }
}

fn preceded_by_word(text: &str, at: usize) -> bool {
    text[..at]
        .chars()
        .next_back()
        .map(|c| c.is_alphanumeric() || c == '_' || c == '@')
        .unwrap_or(false)
}

/// `@handle` occurrences that are not glued to a preceding word (e-mail addresses).
pub(crate) fn scan_mentions(text: &str) -> Vec<String> {
    MENTION
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if preceded_by_word(text, whole.start()) {
                return None;
            }
            caps.get(1).map(|m| m.as_str().to_string())
        })
        .collect()
}

pub(crate) fn scan(format: TextFormat, raw: &str) -> Scan {
    let mut scan = Scan::default();
    match format {
        TextFormat::Markdown | TextFormat::RichText => {
            for block in parse_blocks(raw) {
                match &block {
                    Block::Code { language, code } => scan.code_blocks.push((language.clone(), code.clone())),
                    Block::Quote { source, .. } => scan.quote_refs.push(*source),
                    _ => {
                        for line in block.prose() {
                            let without_code = CODE_SPAN.replace_all(line, " ");
                            scan.add_handles(&without_code);
                            scan.add_attachments(&without_code);
                        }
                    }
                }
            }
        }
        TextFormat::Plain => scan.add_handles(raw),
        TextFormat::Html => {
            scan.code_blocks = sanitize::code_blocks(raw);
            scan.add_handles(&sanitize::text_content(raw));
        }
    }
    scan
}

//=========================================================================================
// Rendering
//=========================================================================================

/// Resolved lookups the renderer consults.
pub(crate) struct RenderContext<'a> {
    /// Lower-cased handle to user id.
    pub mentions: &'a HashMap<String, u64>,
    pub attachments: &'a HashMap<String, AttachmentInfo>,
    pub quotes: &'a HashMap<TargetRef, String>,
    pub max_data_image_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Rendered {
    pub html: String,
    pub contains_media: bool,
}

pub(crate) fn render(format: TextFormat, raw: &str, ctx: &RenderContext<'_>) -> Rendered {
    match format {
        TextFormat::Markdown | TextFormat::RichText => render_markdown(raw, ctx),
        TextFormat::Plain => render_plain(raw, ctx),
        TextFormat::Html => sanitize::sanitize_html(raw, ctx.max_data_image_bytes),
    }
}

fn render_markdown(raw: &str, ctx: &RenderContext<'_>) -> Rendered {
    let mut inline = Inline { ctx, contains_media: false };
    let parts: Vec<String> = parse_blocks(raw)
        .iter()
        .map(|block| match block {
            Block::Code { language, code } => format!(
                r#"<pre><code class="language-{}">{}</code></pre>"#,
                language,
                html_escape::encode_text(code)
            ),
            Block::Quote { source, line } => match ctx.quotes.get(source) {
                Some(body) => format!(
                    r#"<blockquote class="quote" data-source="{}">{}</blockquote>"#,
                    source,
                    html_escape::encode_text(body)
                ),
                None => format!("<p>{}</p>", escape_text(line)),
            },
            Block::Heading { level, text } => format!("<h{level}>{}</h{level}>", inline.render(text)),
            Block::Rule => "<hr>".to_string(),
            Block::BlockQuote(lines) => format!("<blockquote><p>{}</p></blockquote>", inline.lines(lines)),
            Block::List { ordered, items } => {
                let tag = if *ordered { "ol" } else { "ul" };
                let items: String = items.iter().map(|item| format!("<li>{}</li>", inline.render(item))).collect();
                format!("<{tag}>{items}</{tag}>")
            }
            Block::Paragraph(lines) => format!("<p>{}</p>", inline.lines(lines)),
        })
        .collect();
    Rendered { html: parts.join("\n"), contains_media: inline.contains_media }
}

fn render_plain(raw: &str, ctx: &RenderContext<'_>) -> Rendered {
    let text = raw.replace("\r\n", "\n");
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.split('\n').map(|line| link_mentions(line, ctx)).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect();
    Rendered { html: paragraphs.join("\n"), contains_media: false }
}

/// Escapes `text` verbatim and turns resolved mentions into profile links.
fn link_mentions(text: &str, ctx: &RenderContext<'_>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MENTION.captures_iter(text) {
        let (Some(whole), Some(handle)) = (caps.get(0), caps.get(1)) else { continue };
        if preceded_by_word(text, whole.start()) {
            continue;
        }
        if let Some(user_id) = ctx.mentions.get(&handle.as_str().to_ascii_lowercase()) {
            out.push_str(&html_escape::encode_text(&text[last..whole.start()]));
            out.push_str(&mention_link(*user_id, handle.as_str()));
            last = whole.end();
        }
    }
    out.push_str(&html_escape::encode_text(&text[last..]));
    out
}

fn mention_link(user_id: u64, handle: &str) -> String {
    format!(r#"<a href="/users/{user_id}" class="mention">@{}</a>"#, html_escape::encode_text(handle))
}

/// Removes embedded markup from prose, then escapes what is left.
fn escape_text(text: &str) -> String {
    html_escape::encode_text(&sanitize::strip_tags(text)).into_owned()
}

fn attr(value: &str) -> Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}

struct Inline<'a> {
    ctx: &'a RenderContext<'a>,
    contains_media: bool,
}

impl Inline<'_> {
    fn lines(&mut self, lines: &[String]) -> String {
        let rendered: Vec<String> = lines.iter().map(|line| self.render(line)).collect();
        rendered.join("<br>")
    }

    fn render(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 16);
        let mut last = 0;
        for caps in INLINE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&escape_text(&text[last..whole.start()]));
            out.push_str(&self.token(text, whole.start(), &caps));
            last = whole.end();
        }
        out.push_str(&escape_text(&text[last..]));
        out
    }

    fn token(&mut self, text: &str, start: usize, caps: &Captures<'_>) -> String {
        let literal = caps.get(0).map(|m| m.as_str()).unwrap_or_default();

        if let Some(code) = caps.name("code") {
            let inner = code.as_str().trim_matches('`');
            return format!("<code>{}</code>", html_escape::encode_text(inner));
        }
        if let Some(handle) = caps.name("ah") {
            return self.attachment(handle.as_str(), literal);
        }
        if caps.name("img").is_some() {
            let alt = caps.name("ialt").map(|m| m.as_str()).unwrap_or_default();
            let src = caps.name("isrc").map(|m| m.as_str()).unwrap_or_default();
            return match sanitize::safe_url(src, Some(self.ctx.max_data_image_bytes)) {
                Some(url) => {
                    self.contains_media = true;
                    format!(r#"<img src="{}" alt="{}">"#, attr(&url), attr(alt))
                }
                None => escape_text(alt),
            };
        }
        if caps.name("link").is_some() {
            let label = caps.name("ltext").map(|m| m.as_str()).unwrap_or_default();
            let href = caps.name("lhref").map(|m| m.as_str()).unwrap_or_default();
            return match sanitize::safe_url(href, None) {
                Some(url) => format!(
                    r#"<a href="{}" rel="nofollow noopener">{}</a>"#,
                    attr(&url),
                    escape_text(label)
                ),
                None => escape_text(label),
            };
        }
        if let Some(inner) = caps.name("btext") {
            return format!("<strong>{}</strong>", self.render(inner.as_str()));
        }
        if let Some(inner) = caps.name("etext") {
            return format!("<em>{}</em>", self.render(inner.as_str()));
        }
        if let Some(handle) = caps.name("handle") {
            if !preceded_by_word(text, start) {
                if let Some(user_id) = self.ctx.mentions.get(&handle.as_str().to_ascii_lowercase()) {
                    return mention_link(*user_id, handle.as_str());
                }
            }
        }
        escape_text(literal)
    }

    fn attachment(&mut self, handle: &str, literal: &str) -> String {
        let Some(info) = self.ctx.attachments.get(handle) else {
            return escape_text(literal);
        };
        let href = format!("/attachments/{handle}");
        if !info.is_safe {
            return format!(
                r#"<span class="attachment-pending">{}</span>"#,
                html_escape::encode_text(&info.file_name)
            );
        }
        if info.is_media() {
            self.contains_media = true;
        }
        if info.mime_type.starts_with("image/") {
            format!(r#"<img src="{}" alt="{}">"#, attr(&href), attr(&info.file_name))
        } else {
            format!(r#"<a href="{}">{}</a>"#, attr(&href), html_escape::encode_text(&info.file_name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_md(raw: &str) -> Rendered {
        let mentions = HashMap::from([("alice".to_string(), 7_u64)]);
        let attachments = HashMap::new();
        let quotes = HashMap::from([(TargetRef::comment(3), "earlier <words>".to_string())]);
        let ctx = RenderContext {
            mentions: &mentions,
            attachments: &attachments,
            quotes: &quotes,
            max_data_image_bytes: 64,
        };
        render(TextFormat::Markdown, raw, &ctx)
    }

    #[test]
    fn script_tags_and_handlers_never_survive() {
        let out = render_md("hi <script>alert(1)</script> <b onclick=\"x()\">there</b>");
        assert!(!out.html.contains("<script"));
        assert!(!out.html.contains("onclick"));
        assert!(out.html.contains("there"));
    }

    #[test]
    fn scripted_link_protocols_are_dropped() {
        let out = render_md("[click](javascript:alert(1)) and [ok](https://example.org/a?b=1&c=2)");
        assert!(!out.html.contains("javascript"));
        assert!(out.html.contains(r#"href="https://example.org/a?b=1&amp;c=2""#));
    }

    #[test]
    fn small_data_images_are_kept_and_large_ones_dropped() {
        let small = render_md("![dot](data:image/png;base64,iVBORw0KGgo=)");
        assert!(small.html.contains("<img"));
        assert!(small.contains_media);

        let payload = "A".repeat(200);
        let large = render_md(&format!("![big](data:image/png;base64,{payload})"));
        assert!(!large.html.contains("<img"));
        assert!(!large.contains_media);

        let html = render_md("![x](data:text/html;base64,PHNjcmlwdD4=)");
        assert!(!html.html.contains("data:"));
    }

    #[test]
    fn fenced_code_is_verbatim_and_escaped() {
        let out = render_md("```rust\nfn main() { println!(\"<hi>\"); }\n```");
        assert!(out.html.contains(r#"<code class="language-rust">"#));
        assert!(out.html.contains("&lt;hi&gt;"));
    }

    #[test]
    fn resolved_mentions_link_and_unknown_stay_literal() {
        let out = render_md("ping @alice and @nobody, mail bob@alice.org");
        assert!(out.html.contains(r#"<a href="/users/7" class="mention">@alice</a>"#));
        assert!(out.html.contains("@nobody"));
        assert_eq!(out.html.matches("class=\"mention\"").count(), 1);
    }

    #[test]
    fn quote_markers_copy_the_quoted_body() {
        let out = render_md("quote:comment/3\n\nreply");
        assert!(out.html.contains(r#"data-source="comment/3""#));
        assert!(out.html.contains("earlier &lt;words&gt;"));

        let missing = render_md("quote:topic/99");
        assert!(missing.html.contains("quote:topic/99"));
    }

    #[test]
    fn scan_extracts_mentions_code_and_quotes() {
        let scan = scan(
            TextFormat::Markdown,
            "hey @Bob and @bob, see `@notme`\n\n```\nlet x = @inside;\n```\n> quote:topic/12\n[[attachment:f1.png]]",
        );
        assert_eq!(scan.handles, vec!["Bob".to_string()]);
        assert_eq!(scan.code_blocks, vec![("plain".to_string(), "let x = @inside;".to_string())]);
        assert_eq!(scan.quote_refs, vec![TargetRef::topic(12)]);
        assert_eq!(scan.attachment_handles, vec!["f1.png".to_string()]);
    }

    #[test]
    fn handles_longer_than_the_limit_are_ignored() {
        let long = format!("@{}", "a".repeat(33));
        assert!(scan_mentions(&long).is_empty());
        assert_eq!(scan_mentions("@ab"), vec!["ab".to_string()]);
        assert!(scan_mentions("@a").is_empty());
    }

    #[test]
    fn rendering_is_deterministic() {
        let raw = "# Title\n\n- one\n- **two**\n\n1. a\n2. b\n\n> said\n\n---";
        assert_eq!(render_md(raw), render_md(raw));
        let html = render_md(raw).html;
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<li><strong>two</strong></li>"));
        assert!(html.contains("<ol>"));
        assert!(html.contains("<hr>"));
    }
}
