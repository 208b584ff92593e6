//! Canonicalises submitted text: safe HTML plus extracted mentions,
//! attachments, code blocks and quotes.

mod render;
mod sanitize;

use crate::domain::{AttachmentInfo, RichTextBundle, RichTextFlags, ProcessedText, TargetKind, TargetRef, TextFormat};
use crate::error::{ForumError, ForumResult};
use crate::ports::{AttachmentInspector, DiscussionStore, PortError, UserDirectory};
use crate::services::Ports;
use crate::settings::ForumSettings;
use render::RenderContext;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct RichTextProcessor {
    store: Arc<dyn DiscussionStore>,
    users: Arc<dyn UserDirectory>,
    attachments: Arc<dyn AttachmentInspector>,
    settings: Arc<ForumSettings>,
}

impl RichTextProcessor {
    pub fn new(ports: &Ports, settings: Arc<ForumSettings>) -> Self {
        Self {
            store: ports.store.clone(),
            users: ports.users.clone(),
            attachments: ports.attachments.clone(),
            settings,
        }
    }

    /// Renders and analyses `raw_body`. Re-running on an unchanged body with
    /// unchanged referenced content yields the same output.
    pub async fn process(&self, format: TextFormat, raw_body: &str, author_id: u64) -> ForumResult<ProcessedText> {
        if raw_body.len() > self.settings.max_body_bytes {
            return Err(ForumError::validation(format!(
                "body exceeds {} bytes",
                self.settings.max_body_bytes
            )));
        }

        let scan = render::scan(format, raw_body);

        let profiles = if scan.handles.is_empty() {
            Vec::new()
        } else {
            self.users.find_by_handles(&scan.handles).await?
        };
        let resolved: HashMap<String, u64> = profiles
            .iter()
            .map(|profile| (profile.handle.to_ascii_lowercase(), profile.id))
            .collect();

        let mut attachment_map = HashMap::new();
        let mut attachments: Vec<AttachmentInfo> = Vec::new();
        for handle in &scan.attachment_handles {
            let info = self
                .attachments
                .describe(handle)
                .await?
                .ok_or_else(|| ForumError::validation(format!("unknown attachment '{handle}'")))?;
            attachments.push(info.clone());
            attachment_map.insert(handle.clone(), info);
        }

        let mut quote_map = HashMap::new();
        let mut quotes = Vec::new();
        for source in &scan.quote_refs {
            if let Some(body) = quote_map.get(source) {
                quotes.push((*source, String::clone(body)));
                continue;
            }
            if let Some(body) = self.quoted_body(*source).await? {
                quote_map.insert(*source, body.clone());
                quotes.push((*source, body));
            }
        }

        let rendered = render::render(
            format,
            raw_body,
            &RenderContext {
                mentions: &resolved,
                attachments: &attachment_map,
                quotes: &quote_map,
                max_data_image_bytes: self.settings.max_data_image_bytes,
            },
        );

        let mentions: Vec<(String, u64)> = scan
            .handles
            .iter()
            .filter_map(|handle| resolved.get(&handle.to_ascii_lowercase()).map(|id| (handle.clone(), *id)))
            .collect();
        let mut mentioned_user_ids: Vec<u64> = mentions.iter().map(|(_, id)| *id).collect();
        mentioned_user_ids.sort_unstable();
        mentioned_user_ids.dedup();

        let flags = RichTextFlags {
            has_mentions: !mentions.is_empty(),
            has_attachments: !attachments.is_empty(),
            contains_media: rendered.contains_media || attachments.iter().any(AttachmentInfo::is_media),
            contains_code: !scan.code_blocks.is_empty() || rendered.html.contains("<code>"),
        };

        debug!(
            author_id,
            format = %format,
            mentions = mentions.len(),
            attachments = attachments.len(),
            "Processed rich text"
        );

        Ok(ProcessedText {
            format,
            raw_body: raw_body.to_string(),
            rendered_html: rendered.html,
            mentioned_user_ids,
            mentions,
            attachments,
            code_blocks: scan.code_blocks,
            quotes,
            flags,
        })
    }

    /// The stored rich text of a topic or comment.
    pub async fn get(&self, target: TargetRef) -> ForumResult<RichTextBundle> {
        self.store
            .get_rich_text(target)
            .await?
            .ok_or_else(|| ForumError::not_found(format!("rich text for {target}")))
    }

    /// Body of a visible topic or comment; `None` leaves the marker literal.
    async fn quoted_body(&self, source: TargetRef) -> ForumResult<Option<String>> {
        let found = match source.kind {
            TargetKind::Topic => self
                .store
                .get_topic(source.id)
                .await
                .map(|t| (!t.is_deleted() && t.is_approved).then_some(t.body)),
            TargetKind::Comment => self
                .store
                .get_comment(source.id)
                .await
                .map(|c| (!c.is_deleted() && c.is_approved).then_some(c.body)),
        };
        match found {
            Ok(body) => Ok(body),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
