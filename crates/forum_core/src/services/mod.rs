//! crates/forum_core/src/services/mod.rs
//!
//! The components of the discussion subsystem, each built on the ports and
//! wired together by [`Forum`].

pub mod access;
pub mod content_links;
pub mod discussion;
pub mod filter;
pub mod moderation;
pub mod outbox;
pub mod reports;
pub mod rich_text;
pub mod subscriptions;
pub mod trust;

pub use access::AccessControl;
pub use content_links::ContentLinkIndex;
pub use discussion::Discussion;
pub use filter::ContentFilter;
pub use moderation::ModerationQueue;
pub use outbox::OutboxDispatcher;
pub use reports::ReportPipeline;
pub use rich_text::RichTextProcessor;
pub use subscriptions::SubscriptionEngine;
pub use trust::TrustEngine;

use crate::error::{ForumError, ForumResult};
use crate::ports::{
    AttachmentInspector, CacheService, Clock, ContentMetadataService, DiscussionStore, Notifier, TokenBucket,
    UserDirectory,
};
use crate::settings::ForumSettings;
use std::sync::Arc;
use tracing::warn;

//=========================================================================================
// Ports (the adapters handed in by the service crate)
//=========================================================================================

#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn DiscussionStore>,
    pub cache: Arc<dyn CacheService>,
    pub notifier: Arc<dyn Notifier>,
    pub content: Arc<dyn ContentMetadataService>,
    pub users: Arc<dyn UserDirectory>,
    pub attachments: Arc<dyn AttachmentInspector>,
    pub clock: Arc<dyn Clock>,
}

//=========================================================================================
// Forum (every component, wired once at startup)
//=========================================================================================

/// The assembled discussion subsystem. Cheap to clone.
#[derive(Clone)]
pub struct Forum {
    pub settings: Arc<ForumSettings>,
    pub access: Arc<AccessControl>,
    pub trust: Arc<TrustEngine>,
    pub rich_text: Arc<RichTextProcessor>,
    pub filter: Arc<ContentFilter>,
    pub subscriptions: Arc<SubscriptionEngine>,
    pub moderation: Arc<ModerationQueue>,
    pub reports: Arc<ReportPipeline>,
    pub discussion: Arc<Discussion>,
    pub content_links: Arc<ContentLinkIndex>,
    pub outbox: Arc<OutboxDispatcher>,
    store: Arc<dyn DiscussionStore>,
}

impl Forum {
    pub fn new(ports: Ports, settings: ForumSettings) -> Self {
        let settings = Arc::new(settings);
        let access = Arc::new(AccessControl::new(&ports));
        let trust = Arc::new(TrustEngine::new(&ports, access.clone(), settings.clone()));
        let rich_text = Arc::new(RichTextProcessor::new(&ports, settings.clone()));
        let filter = Arc::new(ContentFilter::new(&ports, access.clone(), trust.clone(), settings.clone()));
        let subscriptions = Arc::new(SubscriptionEngine::new(&ports, settings.clone()));
        let moderation = Arc::new(ModerationQueue::new(
            &ports,
            access.clone(),
            trust.clone(),
            subscriptions.clone(),
            settings.clone(),
        ));
        let reports = Arc::new(ReportPipeline::new(&ports, access.clone(), trust.clone(), settings.clone()));
        let discussion = Arc::new(Discussion::new(
            &ports,
            access.clone(),
            trust.clone(),
            rich_text.clone(),
            filter.clone(),
            subscriptions.clone(),
            settings.clone(),
        ));
        let content_links = Arc::new(ContentLinkIndex::new(
            &ports,
            access.clone(),
            rich_text.clone(),
            subscriptions.clone(),
            settings.clone(),
        ));
        let outbox = Arc::new(OutboxDispatcher::new(&ports, settings.clone()));

        Self {
            settings,
            access,
            trust,
            rich_text,
            filter,
            subscriptions,
            moderation,
            reports,
            discussion,
            content_links,
            outbox,
            store: ports.store,
        }
    }

    /// Round-trips the store; used by the health endpoint.
    pub async fn ping(&self) -> ForumResult<()> {
        Ok(self.store.ping().await?)
    }
}

/// Takes one token from the `(user, action)` bucket. A cache failure admits
/// the request with a warning.
pub(crate) async fn enforce_rate_limit(
    cache: &dyn CacheService,
    user_id: u64,
    action: &str,
    bucket: TokenBucket,
) -> ForumResult<()> {
    let key = format!("rate:{user_id}:{action}");
    match cache.take_token(&key, bucket).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => Err(ForumError::RateLimited {
            action: action.to_string(),
            retry_after_secs: decision.retry_after_secs.max(1),
        }),
        Err(err) => {
            warn!(user_id, action, error = %err, "Rate limiter unavailable; admitting request");
            Ok(())
        }
    }
}
