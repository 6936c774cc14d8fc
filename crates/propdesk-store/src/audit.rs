use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use propdesk_core::{AuditFilter, AuditLog, NewAuditLog, Paged, Result};

use crate::sqlite::db_err;
use crate::SqliteStore;

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    actor_id: Option<Uuid>,
    action: String,
    subject_type: String,
    subject_id: Option<Uuid>,
    metadata: Json<serde_json::Value>,
    ip: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditLog {
    fn from(row: AuditRow) -> Self {
        AuditLog {
            id: row.id,
            organization_id: row.organization_id,
            actor_id: row.actor_id,
            action: row.action,
            subject_type: row.subject_type,
            subject_id: row.subject_id,
            metadata: row.metadata.0,
            ip: row.ip,
            created_at: row.created_at,
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    qb.push(" WHERE 1");
    if let Some(org) = filter.organization_id {
        qb.push(" AND organization_id = ");
        qb.push_bind(org);
    }
    if let Some(actor) = filter.actor_id {
        qb.push(" AND actor_id = ");
        qb.push_bind(actor);
    }
    if let Some(action) = filter.action.as_deref().filter(|a| !a.is_empty()) {
        // substr avoids LIKE treating `_` in action names as a wildcard
        qb.push(" AND substr(action, 1, ");
        qb.push_bind(action.chars().count() as i64);
        qb.push(") = ");
        qb.push_bind(action.to_string());
    }
    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ");
        qb.push_bind(since);
    }
}

impl SqliteStore {
    pub async fn record_audit(&self, entry: NewAuditLog) -> Result<AuditLog> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            organization_id: entry.organization_id,
            actor_id: entry.actor_id,
            action: entry.action,
            subject_type: entry.subject_type,
            subject_id: entry.subject_id,
            metadata: entry.metadata,
            ip: entry.ip,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO audit_logs (id, organization_id, actor_id, action, subject_type, subject_id, metadata, ip, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id)
        .bind(log.organization_id)
        .bind(log.actor_id)
        .bind(&log.action)
        .bind(&log.subject_type)
        .bind(log.subject_id)
        .bind(Json(&log.metadata))
        .bind(&log.ip)
        .bind(log.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(log)
    }

    pub async fn list_audit(&self, filter: &AuditFilter) -> Result<Paged<AuditLog>> {
        let page = filter.page();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, organization_id, actor_id, action, subject_type, subject_id, metadata, ip, created_at
             FROM audit_logs",
        );
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows: Vec<AuditRow> = qb
            .build_query_as::<AuditRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Paged {
            items: rows.into_iter().map(AuditLog::from).collect(),
            total,
            limit: page.limit(),
            offset: page.offset(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn filters_by_org_actor_and_action_prefix() {
        let store = SqliteStore::in_memory().await.unwrap();
        let org = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let lease = Uuid::new_v4();

        store
            .record_audit(
                NewAuditLog::new("lease.create", "lease")
                    .organization(org)
                    .actor(actor)
                    .subject(lease)
                    .metadata(json!({ "tenant": "Dana" }))
                    .ip(Some("10.0.0.1".into())),
            )
            .await
            .unwrap();
        store
            .record_audit(NewAuditLog::new("lease.update", "lease").organization(org))
            .await
            .unwrap();
        store
            .record_audit(NewAuditLog::new("leasehold.import", "entity").organization(org))
            .await
            .unwrap();
        store
            .record_audit(NewAuditLog::new("backup.create", "backup").actor(actor))
            .await
            .unwrap();

        let by_org = store
            .list_audit(&AuditFilter {
                organization_id: Some(org),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_org.total, 3);

        let leases = store
            .list_audit(&AuditFilter {
                organization_id: Some(org),
                action: Some("lease.".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(leases.total, 2);
        assert_eq!(leases.items[0].action, "lease.update");
        assert_eq!(leases.items[1].metadata, json!({ "tenant": "Dana" }));
        assert_eq!(leases.items[1].ip.as_deref(), Some("10.0.0.1"));

        let by_actor = store
            .list_audit(&AuditFilter {
                actor_id: Some(actor),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_actor.total, 2);

        let future = store
            .list_audit(&AuditFilter {
                since: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(future.total, 0);
    }
}
