pub mod categories;
pub mod comments;
pub mod content;
pub mod health;
pub mod moderation;
pub mod reactions;
pub mod reports;
pub mod rich_text;
pub mod subscriptions;
pub mod tags;
pub mod topics;
