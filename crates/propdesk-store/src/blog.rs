use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::info;
use uuid::Uuid;

use propdesk_core::validation::slugify;
use propdesk_core::{
    blank_to_none, BlogPost, NewPost, Paged, Pagination, PostStatus, PropdeskError, Result,
    UpdatePost,
};

use crate::sqlite::{db_err, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct PostRow {
    id: Uuid,
    slug: String,
    title: String,
    excerpt: Option<String>,
    body: String,
    author_id: Option<Uuid>,
    status: String,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for BlogPost {
    type Error = PropdeskError;

    fn try_from(row: PostRow) -> Result<Self> {
        Ok(BlogPost {
            id: row.id,
            slug: row.slug,
            title: row.title,
            excerpt: row.excerpt,
            body: row.body,
            author_id: row.author_id,
            status: parse_col(&row.status)?,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const POST_COLUMNS: &str =
    "id, slug, title, excerpt, body, author_id, status, published_at, created_at, updated_at";

fn slug_conflict(err: sqlx::Error) -> PropdeskError {
    match db_err(err) {
        PropdeskError::Conflict(_) => {
            PropdeskError::Conflict("a post with this slug already exists".to_string())
        }
        other => other,
    }
}

fn into_posts(rows: Vec<PostRow>) -> Result<Vec<BlogPost>> {
    rows.into_iter().map(BlogPost::try_from).collect()
}

impl SqliteStore {
    /// Stores a draft. Without an explicit slug one is derived from the title.
    pub async fn create_post(&self, author_id: Option<Uuid>, input: &NewPost) -> Result<BlogPost> {
        let slug = match input.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(slug) => slug.trim().to_string(),
            None => slugify(&input.title),
        };
        if slug.is_empty() {
            return Err(PropdeskError::Validation(
                "a slug cannot be derived from this title".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO blog_posts (id, slug, title, excerpt, body, author_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&slug)
        .bind(input.title.trim())
        .bind(blank_to_none(input.excerpt.clone()))
        .bind(&input.body)
        .bind(author_id)
        .bind(PostStatus::Draft.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(slug_conflict)?;

        self.get_post(id).await
    }

    pub async fn get_post(&self, id: Uuid) -> Result<BlogPost> {
        let row: Option<PostRow> =
            sqlx::query_as(&format!("SELECT {} FROM blog_posts WHERE id = ?", POST_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("post", id))?
            .try_into()
    }

    pub async fn get_published_post_by_slug(&self, slug: &str) -> Result<BlogPost> {
        let row: Option<PostRow> = sqlx::query_as(&format!(
            "SELECT {} FROM blog_posts WHERE slug = ? AND status = ?",
            POST_COLUMNS
        ))
        .bind(slug)
        .bind(PostStatus::Published.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("post", slug))?
            .try_into()
    }

    /// Every post for the admin view, optionally narrowed to one status.
    pub async fn list_posts(&self, status: Option<PostStatus>) -> Result<Vec<BlogPost>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM blog_posts", POST_COLUMNS));
        if let Some(status) = status {
            qb.push(" WHERE status = ");
            qb.push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, rowid DESC");

        let rows: Vec<PostRow> = qb
            .build_query_as::<PostRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        into_posts(rows)
    }

    /// Published posts, most recently published first.
    pub async fn list_published_posts(&self, page: Pagination) -> Result<Paged<BlogPost>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blog_posts WHERE status = ?")
            .bind(PostStatus::Published.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "SELECT {} FROM blog_posts WHERE status = ?
             ORDER BY published_at DESC, rowid DESC LIMIT ? OFFSET ?",
            POST_COLUMNS
        ))
        .bind(PostStatus::Published.as_str())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Paged {
            items: into_posts(rows)?,
            total,
            limit: page.limit(),
            offset: page.offset(),
        })
    }

    pub async fn update_post(&self, id: Uuid, input: &UpdatePost) -> Result<BlogPost> {
        let current = self.get_post(id).await?;

        let title = input
            .title
            .as_deref()
            .map(|t| t.trim().to_string())
            .unwrap_or(current.title);
        let slug = input
            .slug
            .as_deref()
            .map(|s| s.trim().to_string())
            .unwrap_or(current.slug);
        let excerpt = match &input.excerpt {
            Some(e) => blank_to_none(Some(e.clone())),
            None => current.excerpt,
        };
        let body = input.body.clone().unwrap_or(current.body);

        sqlx::query(
            "UPDATE blog_posts SET title = ?, slug = ?, excerpt = ?, body = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&title)
        .bind(&slug)
        .bind(&excerpt)
        .bind(&body)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(slug_conflict)?;

        self.get_post(id).await
    }

    /// Publishes a post. Re-publishing keeps the original publication date.
    pub async fn publish_post(&self, id: Uuid) -> Result<BlogPost> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE blog_posts SET status = ?, published_at = COALESCE(published_at, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(PostStatus::Published.as_str())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("post", id));
        }
        info!(post_id = %id, "post published");
        self.get_post(id).await
    }

    pub async fn unpublish_post(&self, id: Uuid) -> Result<BlogPost> {
        let result = sqlx::query("UPDATE blog_posts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(PostStatus::Draft.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("post", id));
        }
        self.get_post(id).await
    }

    pub async fn delete_post(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM blog_posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("post", id));
        }
        Ok(())
    }
}
