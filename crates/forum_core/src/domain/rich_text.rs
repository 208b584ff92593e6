//! Canonicalised rich text and its side tables.

use super::{TargetKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum TextFormat {
        Markdown => "markdown",
        Html => "html",
        Plain => "plain",
        RichText => "richText",
    }
}

impl Default for TextFormat {
    fn default() -> Self {
        TextFormat::Markdown
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichTextFlags {
    pub has_mentions: bool,
    pub has_attachments: bool,
    pub contains_media: bool,
    pub contains_code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichTextContent {
    pub target: TargetRef,
    pub format: TextFormat,
    pub raw_body: String,
    pub rendered_html: String,
    pub flags: RichTextFlags,
    pub last_processed_at: DateTime<Utc>,
}

/// What the external storage/scanner knows about an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub handle: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Supplied by the external scanner; unsafe attachments hold the content back.
    pub is_safe: bool,
}

impl AttachmentInfo {
    pub fn is_media(&self) -> bool {
        self.mime_type.starts_with("image/")
            || self.mime_type.starts_with("video/")
            || self.mime_type.starts_with("audio/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub target: TargetRef,
    pub handle: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub is_safe: bool,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    pub target: TargetRef,
    pub language: String,
    pub code: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub target: TargetRef,
    pub source: TargetRef,
    /// Copied by value when the quoting content was processed.
    pub quoted_body: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMention {
    pub target: TargetRef,
    pub mentioned_user_id: u64,
    pub handle: String,
}

/// Processor output before the owning content has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedText {
    pub format: TextFormat,
    pub raw_body: String,
    pub rendered_html: String,
    pub mentioned_user_ids: Vec<u64>,
    pub mentions: Vec<(String, u64)>,
    pub attachments: Vec<AttachmentInfo>,
    pub code_blocks: Vec<(String, String)>,
    pub quotes: Vec<(TargetRef, String)>,
    pub flags: RichTextFlags,
}

impl ProcessedText {
    /// True when an attachment still awaits a clean scan.
    pub fn awaiting_scan(&self) -> bool {
        self.attachments.iter().any(|a| !a.is_safe)
    }

    /// Binds the processed text to its owning content.
    pub fn into_bundle(self, target: TargetRef, processed_at: DateTime<Utc>) -> RichTextBundle {
        RichTextBundle {
            content: RichTextContent {
                target,
                format: self.format,
                raw_body: self.raw_body,
                rendered_html: self.rendered_html,
                flags: self.flags,
                last_processed_at: processed_at,
            },
            attachments: self
                .attachments
                .into_iter()
                .enumerate()
                .map(|(i, a)| Attachment {
                    target,
                    handle: a.handle,
                    file_name: a.file_name,
                    mime_type: a.mime_type,
                    size_bytes: a.size_bytes,
                    is_safe: a.is_safe,
                    position: i as u32,
                })
                .collect(),
            code_blocks: self
                .code_blocks
                .into_iter()
                .enumerate()
                .map(|(i, (language, code))| CodeBlock {
                    target,
                    language,
                    code,
                    position: i as u32,
                })
                .collect(),
            quotes: self
                .quotes
                .into_iter()
                .enumerate()
                .map(|(i, (source, quoted_body))| Quote {
                    target,
                    source,
                    quoted_body,
                    position: i as u32,
                })
                .collect(),
            mentions: self
                .mentions
                .into_iter()
                .map(|(handle, mentioned_user_id)| TextMention {
                    target,
                    mentioned_user_id,
                    handle,
                })
                .collect(),
        }
    }
}

/// The rich-text row and all side-table rows of one piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichTextBundle {
    pub content: RichTextContent,
    pub attachments: Vec<Attachment>,
    pub code_blocks: Vec<CodeBlock>,
    pub quotes: Vec<Quote>,
    pub mentions: Vec<TextMention>,
}

impl RichTextBundle {
    /// Re-points every row at a freshly assigned content id.
    pub fn retarget(mut self, kind: TargetKind, id: u64) -> Self {
        let target = TargetRef { kind, id };
        self.content.target = target;
        self.attachments.iter_mut().for_each(|a| a.target = target);
        self.code_blocks.iter_mut().for_each(|c| c.target = target);
        self.quotes.iter_mut().for_each(|q| q.target = target);
        self.mentions.iter_mut().for_each(|m| m.target = target);
        self
    }
}
