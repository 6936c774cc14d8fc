use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::debug;
use uuid::Uuid;

use propdesk_core::{
    blank_to_none, DataScope, EntityFilter, EntityKind, LeaseableEntity, NewEntity, Paged,
    PropdeskError, Result, UpdateEntity,
};

use crate::scope::push_entity_scope;
use crate::sqlite::{db_err, like_pattern, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct EntityRow {
    id: Uuid,
    organization_id: Uuid,
    parent_id: Option<Uuid>,
    kind: String,
    name: String,
    address: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntityRow> for LeaseableEntity {
    type Error = PropdeskError;

    fn try_from(row: EntityRow) -> Result<Self> {
        Ok(LeaseableEntity {
            id: row.id,
            organization_id: row.organization_id,
            parent_id: row.parent_id,
            kind: parse_col(&row.kind)?,
            name: row.name,
            address: row.address,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ENTITY_COLUMNS: &str = "e.id, e.organization_id, e.parent_id, e.kind, e.name, e.address, \
                              e.description, e.created_at, e.updated_at";

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    organization_id: Uuid,
    filter: &EntityFilter,
    scope: &DataScope,
) {
    qb.push(" WHERE e.organization_id = ");
    qb.push_bind(organization_id);

    if let Some(kind) = filter.kind {
        qb.push(" AND e.kind = ");
        qb.push_bind(kind.as_str());
    }
    if let Some(parent_id) = filter.parent_id {
        qb.push(" AND e.parent_id = ");
        qb.push_bind(parent_id);
    }
    if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = like_pattern(q);
        qb.push(" AND (lower(e.name) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR lower(COALESCE(e.address, '')) LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }

    push_entity_scope(qb, "e.id", organization_id, scope);
}

impl SqliteStore {
    /// Inserts an entity after checking that its parent exists in the same
    /// organization and has a kind it may hang under.
    pub async fn create_entity(
        &self,
        organization_id: Uuid,
        input: &NewEntity,
    ) -> Result<LeaseableEntity> {
        let parent_kind = match input.parent_id {
            Some(parent_id) => {
                let kind: Option<String> = sqlx::query_scalar(
                    "SELECT kind FROM entities WHERE id = ? AND organization_id = ?",
                )
                .bind(parent_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

                let kind = kind.ok_or_else(|| {
                    PropdeskError::Validation(format!("parent entity {} does not exist", parent_id))
                })?;
                Some(parse_col::<EntityKind>(&kind)?)
            }
            None => None,
        };
        input.kind.check_parent(parent_kind)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO entities (id, organization_id, parent_id, kind, name, address, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(organization_id)
        .bind(input.parent_id)
        .bind(input.kind.as_str())
        .bind(input.name.trim())
        .bind(blank_to_none(input.address.clone()))
        .bind(blank_to_none(input.description.clone()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(entity_id = %id, kind = %input.kind, "entity created");
        self.get_entity(organization_id, id, &DataScope::All).await
    }

    /// Loads one entity. Rows outside `scope` are reported as missing.
    pub async fn get_entity(
        &self,
        organization_id: Uuid,
        id: Uuid,
        scope: &DataScope,
    ) -> Result<LeaseableEntity> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM entities e", ENTITY_COLUMNS));
        push_filters(&mut qb, organization_id, &EntityFilter::default(), scope);
        qb.push(" AND e.id = ");
        qb.push_bind(id);

        let row: Option<EntityRow> = qb
            .build_query_as::<EntityRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("entity", id))?
            .try_into()
    }

    pub async fn list_entities(
        &self,
        organization_id: Uuid,
        filter: &EntityFilter,
        scope: &DataScope,
    ) -> Result<Paged<LeaseableEntity>> {
        let page = filter.page();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM entities e");
        push_filters(&mut count, organization_id, filter, scope);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM entities e", ENTITY_COLUMNS));
        push_filters(&mut qb, organization_id, filter, scope);
        qb.push(" ORDER BY e.created_at DESC, e.rowid DESC LIMIT ");
        qb.push_bind(page.limit());
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        let rows: Vec<EntityRow> = qb
            .build_query_as::<EntityRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(Paged {
            items: rows
                .into_iter()
                .map(LeaseableEntity::try_from)
                .collect::<Result<_>>()?,
            total,
            limit: page.limit(),
            offset: page.offset(),
        })
    }

    pub async fn update_entity(
        &self,
        organization_id: Uuid,
        id: Uuid,
        input: &UpdateEntity,
    ) -> Result<LeaseableEntity> {
        let current = self.get_entity(organization_id, id, &DataScope::All).await?;

        let name = input
            .name
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or(current.name);
        let address = match &input.address {
            Some(a) => blank_to_none(Some(a.clone())),
            None => current.address,
        };
        let description = match &input.description {
            Some(d) => blank_to_none(Some(d.clone())),
            None => current.description,
        };

        sqlx::query(
            "UPDATE entities SET name = ?, address = ?, description = ?, updated_at = ?
             WHERE id = ? AND organization_id = ?",
        )
        .bind(&name)
        .bind(&address)
        .bind(&description)
        .bind(Utc::now())
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_entity(organization_id, id, &DataScope::All).await
    }

    /// Deletes a leaf entity. Entities that still have children or leases
    /// are refused with a conflict.
    pub async fn delete_entity(&self, organization_id: Uuid, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE parent_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        if children > 0 {
            return Err(PropdeskError::Conflict(format!(
                "entity {} still has {} child entities",
                id, children
            )));
        }

        let leases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leases WHERE entity_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        if leases > 0 {
            return Err(PropdeskError::Conflict(format!(
                "entity {} still has {} leases",
                id, leases
            )));
        }

        let result = sqlx::query("DELETE FROM entities WHERE id = ? AND organization_id = ?")
            .bind(id)
            .bind(organization_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("entity", id));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Whether entity `id` exists in the organization and is visible under
    /// `scope`, walking up through its ancestors.
    pub async fn entity_in_scope(
        &self,
        organization_id: Uuid,
        id: Uuid,
        scope: &DataScope,
    ) -> Result<bool> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT EXISTS(SELECT 1 FROM entities e");
        push_filters(&mut qb, organization_id, &EntityFilter::default(), scope);
        qb.push(" AND e.id = ");
        qb.push_bind(id);
        qb.push(")");

        qb.build_query_scalar::<bool>()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}
