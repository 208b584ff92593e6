//! crates/forum_core/src/domain/mod.rs
//!
//! Defines the pure, core data structures of the discussion subsystem.
//! These structs are independent of any database; they only know how to
//! serialize themselves for the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raised when a persisted or submitted string does not name a known variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a closed, string-backed enum with a stable wire/storage name per variant.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::domain::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod content;
pub mod discussion;
pub mod moderation;
pub mod reports;
pub mod rich_text;
pub mod subscriptions;

pub use content::*;
pub use discussion::*;
pub use moderation::*;
pub use reports::*;
pub use rich_text::*;
pub use subscriptions::*;

string_enum! {
    /// The two kinds of discussion entity that reactions, reports and filter results point at.
    pub enum TargetKind {
        Topic => "topic",
        Comment => "comment",
    }
}

/// A polymorphic reference to a topic or a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub kind: TargetKind,
    pub id: u64,
}

impl TargetRef {
    pub fn topic(id: u64) -> Self {
        Self { kind: TargetKind::Topic, id }
    }

    pub fn comment(id: u64) -> Self {
        Self { kind: TargetKind::Comment, id }
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

string_enum! {
    /// Role level carried by the bearer credential.
    #[derive(PartialOrd, Ord)]
    pub enum Role {
        Guest => "guest",
        Member => "member",
        Moderator => "moderator",
        Admin => "admin",
    }
}

/// The authenticated caller, as resolved by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: u64,
    pub role: Role,
}

impl Principal {
    pub fn guest() -> Self {
        Self { user_id: 0, role: Role::Guest }
    }

    pub fn member(user_id: u64) -> Self {
        Self { user_id, role: Role::Member }
    }

    pub fn moderator(user_id: u64) -> Self {
        Self { user_id, role: Role::Moderator }
    }

    pub fn admin(user_id: u64) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A user as known to the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: u64,
    pub handle: String,
    pub created_at: DateTime<Utc>,
}

/// 1-based page request. `page_size` is clamped to [`PageRequest::MAX_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_PAGE_SIZE)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Slices an already filtered and ordered collection.
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .collect();
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn string_enums_round_trip_their_storage_names() {
        for kind in TargetKind::ALL {
            assert_eq!(TargetKind::from_str(kind.as_str()).unwrap(), *kind);
        }
        assert!(TargetKind::from_str("book").is_err());
    }

    #[test]
    fn page_request_clamps_and_offsets() {
        let request = PageRequest::new(Some(0), Some(1000));
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, PageRequest::MAX_PAGE_SIZE);

        let request = PageRequest::new(Some(3), Some(10));
        assert_eq!(request.offset(), 20);
    }

    #[test]
    fn page_from_vec_slices_the_requested_window() {
        let page = Page::from_vec((1..=25).collect::<Vec<_>>(), PageRequest::new(Some(3), Some(10)));
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total, 25);
    }
}
