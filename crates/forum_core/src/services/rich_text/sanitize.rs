//! Allowlist sanitiser for HTML input and the URL policy shared with the renderer.

use super::render::Rendered;
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt::Write;

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "em", "b", "i", "u", "s", "code", "pre", "blockquote", "ul", "ol", "li", "a", "img",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr",
];
const VOID_TAGS: &[&str] = &["br", "hr", "img"];

static DANGEROUS_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)<script\b.*?</script\s*>",
        r"|<style\b.*?</style\s*>",
        r"|<iframe\b.*?</iframe\s*>",
        r"|<object\b.*?</object\s*>",
        r"|<template\b.*?</template\s*>",
        r"|<!--.*?-->",
    ))
    .expect("valid block pattern")
});
static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)((?:\s[^<>]*)?)/?>").expect("valid tag pattern")
});
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z][A-Za-z0-9_:\-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid attribute pattern")
});
static LANGUAGE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^language-[A-Za-z0-9_+#.\-]{1,32}$").expect("valid class pattern")
});
static PRE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<pre[^>]*>\s*<code([^>]*)>(.*?)</code>\s*</pre>").expect("valid pre pattern")
});

/// Returns the URL when its scheme is allowed. `data:` URLs pass only for
/// raster images no larger than `data_image_limit` bytes.
pub(crate) fn safe_url(url: &str, data_image_limit: Option<usize>) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    if compact.starts_with("data:") {
        let limit = data_image_limit?;
        let raster = compact.starts_with("data:image/") && !compact.starts_with("data:image/svg");
        let payload = url.split_once(',').map(|(_, data)| data.len()).unwrap_or(0);
        let bytes = if compact.contains(";base64,") { payload * 3 / 4 } else { payload };
        return (raster && bytes <= limit).then(|| url.to_string());
    }

    match compact.find(':') {
        None => Some(url.to_string()),
        Some(colon) => {
            let scheme = &compact[..colon];
            if scheme.contains(|c| matches!(c, '/' | '?' | '#')) {
                // The colon belongs to a path or query, not a scheme.
                return Some(url.to_string());
            }
            matches!(scheme, "http" | "https" | "mailto").then(|| url.to_string())
        }
    }
}

/// Drops embedded markup (and the content of script-like elements) from prose.
pub(crate) fn strip_tags(text: &str) -> Cow<'_, str> {
    if !text.contains('<') {
        return Cow::Borrowed(text);
    }
    let without_blocks = DANGEROUS_BLOCK.replace_all(text, "");
    Cow::Owned(TAG.replace_all(&without_blocks, "").into_owned())
}

fn reencode_text(text: &str) -> String {
    html_escape::encode_text(&html_escape::decode_html_entities(text)).into_owned()
}

fn allowed_attributes(tag: &str, raw: &str, max_data_image_bytes: usize) -> Vec<(&'static str, String)> {
    let mut kept = Vec::new();
    for caps in ATTRIBUTE.captures_iter(raw) {
        let Some(name) = caps.get(1) else { continue };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
            .unwrap_or_default();
        match (tag, name.as_str().to_ascii_lowercase().as_str()) {
            ("a", "href") => {
                if let Some(url) = safe_url(&value, None) {
                    kept.push(("href", url));
                    kept.push(("rel", "nofollow noopener".to_string()));
                }
            }
            ("a", "title") => kept.push(("title", value)),
            ("img", "src") => {
                if let Some(url) = safe_url(&value, Some(max_data_image_bytes)) {
                    kept.push(("src", url));
                }
            }
            ("img", "alt") => kept.push(("alt", value)),
            ("img", "title") => kept.push(("title", value)),
            ("code", "class") if LANGUAGE_CLASS.is_match(&value) => kept.push(("class", value)),
            _ => {}
        }
    }
    kept
}

/// Rebuilds the input keeping only allowlisted tags and attributes.
pub(crate) fn sanitize_html(input: &str, max_data_image_bytes: usize) -> Rendered {
    let cleaned = DANGEROUS_BLOCK.replace_all(input, "");
    let mut html = String::with_capacity(cleaned.len());
    let mut contains_media = false;
    let mut last = 0;

    for caps in TAG.captures_iter(&cleaned) {
        let Some(whole) = caps.get(0) else { continue };
        html.push_str(&reencode_text(&cleaned[last..whole.start()]));
        last = whole.end();

        let name = caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            continue;
        }
        let closing = caps.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        if closing {
            if !VOID_TAGS.contains(&name.as_str()) {
                let _ = write!(html, "</{name}>");
            }
            continue;
        }

        let attributes = allowed_attributes(&name, caps.get(3).map(|m| m.as_str()).unwrap_or_default(), max_data_image_bytes);
        if name == "img" {
            if !attributes.iter().any(|(key, _)| *key == "src") {
                continue;
            }
            contains_media = true;
        }
        html.push('<');
        html.push_str(&name);
        for (key, value) in attributes {
            let _ = write!(html, r#" {key}="{}""#, html_escape::encode_double_quoted_attribute(&value));
        }
        html.push('>');
    }
    html.push_str(&reencode_text(&cleaned[last..]));

    Rendered { html, contains_media }
}

/// Visible text of an HTML fragment.
pub(crate) fn text_content(input: &str) -> String {
    html_escape::decode_html_entities(&strip_tags(input)).into_owned()
}

/// `<pre><code class="language-x">` blocks of an HTML fragment.
pub(crate) fn code_blocks(input: &str) -> Vec<(String, String)> {
    PRE_CODE
        .captures_iter(input)
        .map(|caps| {
            let class = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let language = class
                .split(|c: char| c == '"' || c == '\'' || c.is_whitespace())
                .find_map(|token| token.strip_prefix("language-"))
                .filter(|lang| !lang.is_empty())
                .map(|lang| lang.to_ascii_lowercase())
                .unwrap_or_else(|| "plain".to_string());
            let code = caps.get(2).map(|m| text_content(m.as_str())).unwrap_or_default();
            (language, code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_policy() {
        assert!(safe_url("https://example.org", None).is_some());
        assert!(safe_url("/topics/3", None).is_some());
        assert!(safe_url("docs/a:b", None).is_some());
        assert!(safe_url("JavaScript:alert(1)", None).is_none());
        assert!(safe_url("java\tscript:alert(1)", None).is_none());
        assert!(safe_url("vbscript:x", None).is_none());
        assert!(safe_url("data:image/png;base64,AAAA", None).is_none());
        assert!(safe_url("data:image/png;base64,AAAA", Some(16)).is_some());
        assert!(safe_url("data:image/svg+xml;base64,AAAA", Some(1024)).is_none());
    }

    #[test]
    fn html_input_keeps_only_allowlisted_markup() {
        let out = sanitize_html(
            r#"<p class="x" onclick="evil()">Hi <a href="javascript:alert(1)">there</a> <img src="/a.png" onerror="x"><iframe src="x"></iframe><div>kept text</div></p><script>bad()</script>"#,
            1024,
        );
        assert_eq!(
            out.html,
            r#"<p>Hi <a>there</a> <img src="/a.png">kept text</p>"#
        );
        assert!(out.contains_media);
    }

    #[test]
    fn stray_angle_brackets_are_escaped() {
        let out = sanitize_html("1 < 2 &amp; 3 > 2", 0);
        assert_eq!(out.html, "1 &lt; 2 &amp; 3 &gt; 2");
    }

    #[test]
    fn code_blocks_are_extracted_from_html() {
        let blocks = code_blocks(r#"<pre><code class="language-Python">print(&quot;x&quot;)</code></pre>"#);
        assert_eq!(blocks, vec![("python".to_string(), "print(\"x\")".to_string())]);
    }
}
