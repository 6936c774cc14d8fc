use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use propdesk_core::validation::slugify;
use propdesk_core::{
    BillingUpdate, NewOrganization, Organization, Permissions, PropdeskError, Result, Role,
    UpdateOrganization,
};

use crate::sqlite::{db_err, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    slug: String,
    owner_id: Uuid,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    plan: String,
    subscription_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrganizationRow> for Organization {
    type Error = PropdeskError;

    fn try_from(row: OrganizationRow) -> Result<Self> {
        Ok(Organization {
            id: row.id,
            name: row.name,
            slug: row.slug,
            owner_id: row.owner_id,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            plan: parse_col(&row.plan)?,
            subscription_status: parse_col(&row.subscription_status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORG_COLUMNS: &str = "id, name, slug, owner_id, stripe_customer_id, stripe_subscription_id, \
                           plan, subscription_status, created_at, updated_at";

fn into_orgs(rows: Vec<OrganizationRow>) -> Result<Vec<Organization>> {
    rows.into_iter().map(Organization::try_from).collect()
}

impl SqliteStore {
    /// Creates an organization and makes `owner_id` its owner in one
    /// transaction. The slug is derived from the name and suffixed with
    /// `-2`, `-3`, ... until it is free.
    pub async fn create_organization(
        &self,
        owner_id: Uuid,
        input: &NewOrganization,
    ) -> Result<Organization> {
        let name = input.name.trim().to_string();
        let mut base = slugify(&name);
        if base.is_empty() {
            base = "org".to_string();
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut slug = base.clone();
        let mut n = 1;
        loop {
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM organizations WHERE slug = ?)")
                    .bind(&slug)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if !taken {
                break;
            }
            n += 1;
            slug = format!("{}-{}", base, n);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, owner_id, plan, subscription_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'free', 'none', ?, ?)",
        )
        .bind(id)
        .bind(&name)
        .bind(&slug)
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO team_members (id, organization_id, user_id, role, permissions, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(owner_id)
        .bind(Role::Owner.as_str())
        .bind(sqlx::types::Json(Permissions::full()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!(organization_id = %id, slug = %slug, "organization created");

        self.get_organization(id).await
    }

    pub async fn get_organization(&self, id: Uuid) -> Result<Organization> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE id = ?",
            ORG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("organization", id))?
            .try_into()
    }

    pub async fn get_organization_by_slug(&self, slug: &str) -> Result<Organization> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE slug = ?",
            ORG_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("organization", slug))?
            .try_into()
    }

    pub async fn get_organization_by_stripe_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Organization>> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE stripe_customer_id = ?",
            ORG_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Organization::try_from).transpose()
    }

    /// Organizations the user belongs to, oldest membership first.
    pub async fn list_organizations_for_user(&self, user_id: Uuid) -> Result<Vec<Organization>> {
        let rows: Vec<OrganizationRow> = sqlx::query_as(
            "SELECT o.id, o.name, o.slug, o.owner_id, o.stripe_customer_id, o.stripe_subscription_id,
                    o.plan, o.subscription_status, o.created_at, o.updated_at
             FROM organizations o
             JOIN team_members m ON m.organization_id = o.id
             WHERE m.user_id = ?
             ORDER BY m.created_at ASC, m.rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        into_orgs(rows)
    }

    pub async fn list_all_organizations(&self) -> Result<Vec<Organization>> {
        let rows: Vec<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations ORDER BY created_at DESC, rowid DESC",
            ORG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        into_orgs(rows)
    }

    pub async fn update_organization(
        &self,
        id: Uuid,
        input: &UpdateOrganization,
    ) -> Result<Organization> {
        let current = self.get_organization(id).await?;
        let name = input
            .name
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or(current.name);

        sqlx::query("UPDATE organizations SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&name)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        self.get_organization(id).await
    }

    /// Writes back billing state. Customer and subscription ids are only
    /// replaced when a new value is given.
    pub async fn update_billing(&self, id: Uuid, billing: &BillingUpdate) -> Result<Organization> {
        let result = sqlx::query(
            "UPDATE organizations
             SET stripe_customer_id = COALESCE(?, stripe_customer_id),
                 stripe_subscription_id = COALESCE(?, stripe_subscription_id),
                 plan = ?, subscription_status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(billing.stripe_customer_id.as_deref())
        .bind(billing.stripe_subscription_id.as_deref())
        .bind(billing.plan.as_str())
        .bind(billing.subscription_status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("organization", id));
        }
        self.get_organization(id).await
    }

    /// Deletes the organization together with its members, invitations,
    /// entities, leases and notifications.
    pub async fn delete_organization(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("organization", id));
        }
        info!(organization_id = %id, "organization deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::seed_user;
    use propdesk_core::{Plan, SubscriptionStatus};

    #[tokio::test]
    async fn slugs_are_unique() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = seed_user(&store, "owner@example.com").await;

        let input = NewOrganization {
            name: "Acme Rentals".into(),
        };
        let first = store.create_organization(owner.id, &input).await.unwrap();
        let second = store.create_organization(owner.id, &input).await.unwrap();
        let third = store.create_organization(owner.id, &input).await.unwrap();

        assert_eq!(first.slug, "acme-rentals");
        assert_eq!(second.slug, "acme-rentals-2");
        assert_eq!(third.slug, "acme-rentals-3");
        assert_eq!(
            store.get_organization_by_slug("acme-rentals-2").await.unwrap().id,
            second.id
        );
    }

    #[tokio::test]
    async fn creator_becomes_owner() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = seed_user(&store, "owner@example.com").await;
        let org = store
            .create_organization(owner.id, &NewOrganization { name: "Acme".into() })
            .await
            .unwrap();

        let member = store.get_membership(org.id, owner.id).await.unwrap().unwrap();
        assert_eq!(member.role, Role::Owner);
        assert_eq!(org.plan, Plan::Free);
        assert_eq!(org.subscription_status, SubscriptionStatus::Inactive);

        let mine = store.list_organizations_for_user(owner.id).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn billing_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = seed_user(&store, "owner@example.com").await;
        let org = store
            .create_organization(owner.id, &NewOrganization { name: "Acme".into() })
            .await
            .unwrap();

        store
            .update_billing(
                org.id,
                &BillingUpdate {
                    stripe_customer_id: Some("cus_123".into()),
                    stripe_subscription_id: None,
                    plan: Plan::Pro,
                    subscription_status: SubscriptionStatus::Trialing,
                },
            )
            .await
            .unwrap();

        let updated = store
            .update_billing(
                org.id,
                &BillingUpdate {
                    stripe_customer_id: None,
                    stripe_subscription_id: Some("sub_9".into()),
                    plan: Plan::Pro,
                    subscription_status: SubscriptionStatus::Active,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.stripe_customer_id.as_deref(), Some("cus_123"));
        assert_eq!(updated.stripe_subscription_id.as_deref(), Some("sub_9"));

        let found = store
            .get_organization_by_stripe_customer("cus_123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, org.id);
        assert!(store
            .get_organization_by_stripe_customer("cus_missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_members() {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = seed_user(&store, "owner@example.com").await;
        let org = store
            .create_organization(owner.id, &NewOrganization { name: "Acme".into() })
            .await
            .unwrap();

        store.delete_organization(org.id).await.unwrap();
        assert!(store.get_membership(org.id, owner.id).await.unwrap().is_none());
        assert!(matches!(
            store.get_organization(org.id).await,
            Err(PropdeskError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_organization(org.id).await,
            Err(PropdeskError::NotFound(_))
        ));
    }
}
