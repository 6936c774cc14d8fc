use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{
    validate_optional_text, validate_slug, validate_text, Validate, ValidationError,
};

text_enum! {
    pub enum PostStatus {
        Draft => "draft",
        Published => "published",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub body: String,
    pub author_id: Option<Uuid>,
    pub status: PostStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub title: String,
    /// Derived from the title when absent.
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub body: String,
}

impl Validate for NewPost {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_text("title", &self.title, 1, 200)?;
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        validate_optional_text("excerpt", self.excerpt.as_deref(), 500)?;
        validate_text("body", &self.body, 1, 200_000)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
}

impl Validate for UpdatePost {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            validate_text("title", title, 1, 200)?;
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        validate_optional_text("excerpt", self.excerpt.as_deref(), 500)?;
        if let Some(body) = &self.body {
            validate_text("body", body, 1, 200_000)?;
        }
        Ok(())
    }
}
