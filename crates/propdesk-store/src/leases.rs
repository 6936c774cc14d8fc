use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::debug;
use uuid::Uuid;

use propdesk_core::{
    blank_to_none, DataScope, Lease, LeaseFilter, NewLease, Paged, PropdeskError, Result,
};

use crate::scope::push_id_scope;
use crate::sqlite::{db_err, like_pattern, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct LeaseRow {
    id: Uuid,
    organization_id: Uuid,
    entity_id: Uuid,
    tenant_name: String,
    tenant_email: Option<String>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    rent_cents: i64,
    deposit_cents: i64,
    currency: String,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LeaseRow> for Lease {
    type Error = PropdeskError;

    fn try_from(row: LeaseRow) -> Result<Self> {
        Ok(Lease {
            id: row.id,
            organization_id: row.organization_id,
            entity_id: row.entity_id,
            tenant_name: row.tenant_name,
            tenant_email: row.tenant_email,
            start_date: row.start_date,
            end_date: row.end_date,
            rent_cents: row.rent_cents,
            deposit_cents: row.deposit_cents,
            currency: row.currency,
            status: parse_col(&row.status)?,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const LEASE_COLUMNS: &str = "l.id, l.organization_id, l.entity_id, l.tenant_name, l.tenant_email, \
                             l.start_date, l.end_date, l.rent_cents, l.deposit_cents, l.currency, \
                             l.status, l.notes, l.created_at, l.updated_at";

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    organization_id: Uuid,
    filter: &LeaseFilter,
    scope: &DataScope,
) {
    qb.push(" WHERE l.organization_id = ");
    qb.push_bind(organization_id);

    if let Some(status) = filter.status {
        qb.push(" AND l.status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(entity_id) = filter.entity_id {
        qb.push(" AND l.entity_id = ");
        qb.push_bind(entity_id);
    }
    if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = like_pattern(q);
        qb.push(" AND (lower(l.tenant_name) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR lower(COALESCE(l.tenant_email, '')) LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }

    push_id_scope(qb, "l.id", scope);
}

impl SqliteStore {
    /// Inserts a lease. The entity must belong to the same organization.
    pub async fn create_lease(&self, organization_id: Uuid, input: &NewLease) -> Result<Lease> {
        self.require_entity(organization_id, input.entity_id).await?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO leases (id, organization_id, entity_id, tenant_name, tenant_email, start_date, end_date,
                                 rent_cents, deposit_cents, currency, status, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(organization_id)
        .bind(input.entity_id)
        .bind(input.tenant_name.trim())
        .bind(blank_to_none(input.tenant_email.clone()))
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.rent_cents)
        .bind(input.deposit_cents)
        .bind(&input.currency)
        .bind(input.status.as_str())
        .bind(blank_to_none(input.notes.clone()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(lease_id = %id, entity_id = %input.entity_id, "lease created");
        self.get_lease(organization_id, id, &DataScope::All).await
    }

    /// Loads one lease. Rows outside `scope` are reported as missing.
    pub async fn get_lease(
        &self,
        organization_id: Uuid,
        id: Uuid,
        scope: &DataScope,
    ) -> Result<Lease> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM leases l", LEASE_COLUMNS));
        push_filters(&mut qb, organization_id, &LeaseFilter::default(), scope);
        qb.push(" AND l.id = ");
        qb.push_bind(id);

        let row: Option<LeaseRow> = qb
            .build_query_as::<LeaseRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("lease", id))?
            .try_into()
    }

    pub async fn list_leases(
        &self,
        organization_id: Uuid,
        filter: &LeaseFilter,
        scope: &DataScope,
    ) -> Result<Paged<Lease>> {
        let page = filter.page();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM leases l");
        push_filters(&mut count, organization_id, filter, scope);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM leases l", LEASE_COLUMNS));
        push_filters(&mut qb, organization_id, filter, scope);
        qb.push(" ORDER BY l.created_at DESC, l.rowid DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows: Vec<LeaseRow> = qb
            .build_query_as::<LeaseRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Paged {
            items: rows.into_iter().map(Lease::try_from).collect::<Result<_>>()?,
            total,
            limit: page.limit(),
            offset: page.offset(),
        })
    }

    /// Persists an already merged and validated lease, see
    /// [`propdesk_core::UpdateLease::apply`].
    pub async fn update_lease(&self, lease: &Lease) -> Result<Lease> {
        self.require_entity(lease.organization_id, lease.entity_id)
            .await?;

        let result = sqlx::query(
            "UPDATE leases
             SET entity_id = ?, tenant_name = ?, tenant_email = ?, start_date = ?, end_date = ?,
                 rent_cents = ?, deposit_cents = ?, currency = ?, status = ?, notes = ?, updated_at = ?
             WHERE id = ? AND organization_id = ?",
        )
        .bind(lease.entity_id)
        .bind(&lease.tenant_name)
        .bind(&lease.tenant_email)
        .bind(lease.start_date)
        .bind(lease.end_date)
        .bind(lease.rent_cents)
        .bind(lease.deposit_cents)
        .bind(&lease.currency)
        .bind(lease.status.as_str())
        .bind(&lease.notes)
        .bind(Utc::now())
        .bind(lease.id)
        .bind(lease.organization_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("lease", lease.id));
        }
        self.get_lease(lease.organization_id, lease.id, &DataScope::All)
            .await
    }

    pub async fn delete_lease(&self, organization_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM leases WHERE id = ? AND organization_id = ?")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("lease", id));
        }
        Ok(())
    }

    async fn require_entity(&self, organization_id: Uuid, entity_id: Uuid) -> Result<()> {
        if self
            .entity_in_scope(organization_id, entity_id, &DataScope::All)
            .await?
        {
            Ok(())
        } else {
            Err(PropdeskError::Validation(format!(
                "entity {} does not exist",
                entity_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::{seed_entity, seed_org};
    use propdesk_core::{EntityKind, LeaseStatus, UpdateLease};
    use std::collections::BTreeSet;

    fn new_lease(entity_id: Uuid, tenant: &str) -> NewLease {
        NewLease {
            entity_id,
            tenant_name: tenant.to_string(),
            tenant_email: Some(format!("{}@example.com", tenant.to_lowercase())),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            rent_cents: 150_000,
            deposit_cents: 150_000,
            currency: "USD".into(),
            status: LeaseStatus::Draft,
            notes: None,
        }
    }

    #[tokio::test]
    async fn lease_scope_uses_allow_list() {
        let store = SqliteStore::in_memory().await.unwrap();
        let org = seed_org(&store).await;
        let maple = seed_entity(&store, org, EntityKind::Property, None, "Maple").await;

        let dana = store.create_lease(org, &new_lease(maple.id, "Dana")).await.unwrap();
        let sam = store.create_lease(org, &new_lease(maple.id, "Sam")).await.unwrap();

        let scope = DataScope::Only(BTreeSet::from([dana.id]));
        let page = store
            .list_leases(org, &LeaseFilter::default(), &scope)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, dana.id);

        assert!(matches!(
            store.get_lease(org, sam.id, &scope).await,
            Err(PropdeskError::NotFound(_))
        ));
        assert!(store
            .list_leases(org, &LeaseFilter::default(), &DataScope::Nothing)
            .await
            .unwrap()
            .items
            .is_empty());
    }

    #[tokio::test]
    async fn leases_stay_inside_their_organization() {
        let store = SqliteStore::in_memory().await.unwrap();
        let org = seed_org(&store).await;
        let other = seed_org(&store).await;
        let foreign = seed_entity(&store, other, EntityKind::Property, None, "Elsewhere").await;

        let err = store.create_lease(org, &new_lease(foreign.id, "Dana")).await;
        assert!(matches!(err, Err(PropdeskError::Validation(_))));

        let own = seed_entity(&store, org, EntityKind::Property, None, "Maple").await;
        let lease = store.create_lease(org, &new_lease(own.id, "Dana")).await.unwrap();
        assert!(matches!(
            store.get_lease(other, lease.id, &DataScope::All).await,
            Err(PropdeskError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_lease(other, lease.id).await,
            Err(PropdeskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_and_filter_by_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        let org = seed_org(&store).await;
        let maple = seed_entity(&store, org, EntityKind::Property, None, "Maple").await;
        let lease = store.create_lease(org, &new_lease(maple.id, "Dana")).await.unwrap();
        store.create_lease(org, &new_lease(maple.id, "Sam")).await.unwrap();

        let merged = UpdateLease {
            status: Some(LeaseStatus::Active),
            rent_cents: Some(160_000),
            ..Default::default()
        }
        .apply(&lease)
        .unwrap();
        let saved = store.update_lease(&merged).await.unwrap();
        assert_eq!(saved.status, LeaseStatus::Active);
        assert_eq!(saved.rent_cents, 160_000);
        assert_eq!(saved.end_date, NaiveDate::from_ymd_opt(2026, 12, 31));

        let active = store
            .list_leases(
                org,
                &LeaseFilter {
                    status: Some(LeaseStatus::Active),
                    ..Default::default()
                },
                &DataScope::All,
            )
            .await
            .unwrap();
        assert_eq!(active.total, 1);

        let by_email = store
            .list_leases(
                org,
                &LeaseFilter {
                    q: Some("SAM@".into()),
                    ..Default::default()
                },
                &DataScope::All,
            )
            .await
            .unwrap();
        assert_eq!(by_email.total, 1);
        assert_eq!(by_email.items[0].tenant_name, "Sam");

        store.delete_lease(org, lease.id).await.unwrap();
        assert!(store.delete_entity(org, maple.id).await.is_err());
    }
}
