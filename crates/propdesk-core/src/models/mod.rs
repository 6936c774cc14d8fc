pub mod audit;
pub mod backup;
pub mod blog;
pub mod entity;
pub mod lease;
pub mod notification;
pub mod organization;
pub mod team;
pub mod user;

pub use audit::*;
pub use backup::*;
pub use blog::*;
pub use entity::*;
pub use lease::*;
pub use notification::*;
pub use organization::*;
pub use team::*;
pub use user::*;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Limit/offset paging shared by every list endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// A page of results together with the total row count before paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Treats an empty or whitespace-only string as "clear this field".
pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// For `Option<Option<T>>` patch fields: absent stays `None`, an explicit
/// `null` becomes `Some(None)`. Pair with `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    <Option<T> as serde::Deserialize>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(Pagination::default().limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(Pagination::new(0, -4).limit(), 1);
        assert_eq!(Pagination::new(0, -4).offset(), 0);
        assert_eq!(Pagination::new(5_000, 10).limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn blank_strings_clear() {
        assert_eq!(blank_to_none(Some("  ".into())), None);
        assert_eq!(blank_to_none(Some(" x ".into())), Some("x".into()));
        assert_eq!(blank_to_none(None), None);
    }
}
