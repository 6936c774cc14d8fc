use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use propdesk_core::{
    Notification, Paged, Pagination, PropdeskError, PushDevice, RegisterDevice, Result,
};

use crate::sqlite::{db_err, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    user_id: Uuid,
    title: String,
    body: String,
    url: Option<String>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            title: row.title,
            body: row.body,
            url: row.url,
            read_at: row.read_at,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct PushDeviceRow {
    id: Uuid,
    user_id: Uuid,
    token: String,
    platform: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PushDeviceRow> for PushDevice {
    type Error = PropdeskError;

    fn try_from(row: PushDeviceRow) -> Result<Self> {
        Ok(PushDevice {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            platform: parse_col(&row.platform)?,
            created_at: row.created_at,
        })
    }
}

fn push_user_filter(qb: &mut QueryBuilder<'_, Sqlite>, user_id: Uuid, unread_only: bool) {
    qb.push(" WHERE user_id = ");
    qb.push_bind(user_id);
    if unread_only {
        qb.push(" AND read_at IS NULL");
    }
}

impl SqliteStore {
    pub async fn create_notification(
        &self,
        organization_id: Option<Uuid>,
        user_id: Uuid,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            title: title.trim().to_string(),
            body: body.trim().to_string(),
            url: url.map(str::to_string),
            read_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO notifications (id, organization_id, user_id, title, body, url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(notification.id)
        .bind(notification.organization_id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.url)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(notification)
    }

    /// A user's notifications across every organization, newest first.
    pub async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: Pagination,
    ) -> Result<Paged<Notification>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM notifications");
        push_user_filter(&mut count, user_id, unread_only);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, organization_id, user_id, title, body, url, read_at, created_at FROM notifications",
        );
        push_user_filter(&mut qb, user_id, unread_only);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows: Vec<NotificationRow> = qb
            .build_query_as::<NotificationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Paged {
            items: rows.into_iter().map(Notification::from).collect(),
            total,
            limit: page.limit(),
            offset: page.offset(),
        })
    }

    /// Marks one of the user's notifications read. Notifications of other
    /// users are reported as missing.
    pub async fn mark_notification_read(&self, user_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("notification", id));
        }
        Ok(())
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Registers a device token for the user. A token that moves to another
    /// account is reassigned.
    pub async fn register_push_device(
        &self,
        user_id: Uuid,
        input: &RegisterDevice,
    ) -> Result<PushDevice> {
        let row: PushDeviceRow = sqlx::query_as(
            "INSERT INTO push_devices (id, user_id, token, platform, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, platform = excluded.platform
             RETURNING id, user_id, token, platform, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(input.token.trim())
        .bind(input.platform.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    pub async fn remove_push_device(&self, user_id: Uuid, token: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM push_devices WHERE user_id = ? AND token = ?")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::NotFound("push device not found".to_string()));
        }
        Ok(())
    }

    pub async fn list_push_devices(&self, user_ids: &[Uuid]) -> Result<Vec<PushDevice>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, user_id, token, platform, created_at FROM push_devices WHERE user_id IN (",
        );
        let mut list = qb.separated(", ");
        for id in user_ids {
            list.push_bind(*id);
        }
        list.push_unseparated(") ORDER BY created_at ASC");

        let rows: Vec<PushDeviceRow> = qb
            .build_query_as::<PushDeviceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(PushDevice::try_from).collect()
    }
}
