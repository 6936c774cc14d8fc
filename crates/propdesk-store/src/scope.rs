//! Pushes [`DataScope`] predicates onto a query under construction.
//!
//! Every helper appends an `AND ...` clause, so the builder must already be
//! inside a `WHERE`.

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use propdesk_core::DataScope;

/// Restricts `column` to the ids in `scope`.
pub fn push_id_scope(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, scope: &DataScope) {
    match scope {
        DataScope::All => {}
        DataScope::Nothing => {
            qb.push(" AND 0");
        }
        DataScope::Only(ids) => {
            qb.push(" AND ");
            qb.push(column);
            qb.push(" IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
        }
    }
}

/// Restricts `column` to entities that are, or descend from, a property in
/// `scope`. Units and rooms inherit visibility from their property.
pub fn push_entity_scope(
    qb: &mut QueryBuilder<'_, Sqlite>,
    column: &str,
    organization_id: Uuid,
    scope: &DataScope,
) {
    match scope {
        DataScope::All => {}
        DataScope::Nothing => {
            qb.push(" AND 0");
        }
        DataScope::Only(ids) => {
            qb.push(" AND ");
            qb.push(column);
            qb.push(
                " IN (WITH RECURSIVE visible(id) AS (\
                 SELECT id FROM entities WHERE organization_id = ",
            );
            qb.push_bind(organization_id);
            qb.push(" AND parent_id IS NULL AND id IN (");
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
            list.push_unseparated(")");
            qb.push(
                " UNION ALL SELECT child.id FROM entities child \
                 JOIN visible ON child.parent_id = visible.id) \
                 SELECT id FROM visible)",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn all_scope_adds_nothing() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM leases WHERE 1");
        push_id_scope(&mut qb, "id", &DataScope::All);
        assert_eq!(qb.sql(), "SELECT id FROM leases WHERE 1");
    }

    #[test]
    fn nothing_scope_matches_no_rows() {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM leases WHERE 1");
        push_id_scope(&mut qb, "id", &DataScope::Nothing);
        assert_eq!(qb.sql(), "SELECT id FROM leases WHERE 1 AND 0");
    }

    #[test]
    fn only_scope_binds_each_id() {
        let ids = BTreeSet::from([Uuid::new_v4(), Uuid::new_v4()]);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM leases WHERE 1");
        push_id_scope(&mut qb, "leases.id", &DataScope::Only(ids));
        assert_eq!(
            qb.sql(),
            "SELECT id FROM leases WHERE 1 AND leases.id IN (?, ?)"
        );
    }

    #[test]
    fn entity_scope_walks_descendants() {
        let ids = BTreeSet::from([Uuid::new_v4()]);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM entities WHERE 1");
        push_entity_scope(&mut qb, "id", Uuid::new_v4(), &DataScope::Only(ids));
        let sql = qb.sql();
        assert!(sql.contains("WITH RECURSIVE visible(id)"));
        assert!(sql.contains("parent_id IS NULL AND id IN (?)"));
        assert!(sql.ends_with("SELECT id FROM visible)"));
    }
}
