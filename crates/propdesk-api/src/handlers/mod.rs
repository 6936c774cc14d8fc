//! HTTP handlers, one module per resource.

pub mod account;
pub mod audit;
pub mod backups;
pub mod billing;
pub mod blog;
pub mod deployment;
pub mod entities;
pub mod health;
pub mod invitations;
pub mod leases;
pub mod notifications;
pub mod organizations;
pub mod team;

use propdesk_core::NewAuditLog;
use propdesk_integrations::search::{ENTITIES_INDEX, LEASES_INDEX};
use serde::Serialize;
use tracing::warn;

use crate::AppState;

/// Records an audit entry. The change it describes has already happened,
/// so a failure here is logged rather than returned.
pub(crate) async fn record(state: &AppState, entry: NewAuditLog) {
    let action = entry.action.clone();
    if let Err(e) = state.store.record_audit(entry).await {
        warn!(action = %action, error = %e, "failed to record audit entry");
    }
}

pub(crate) async fn index_document<T: Serialize>(state: &AppState, index: &str, document: &T) {
    let value = match serde_json::to_value(document) {
        Ok(value) => value,
        Err(e) => {
            warn!(index, error = %e, "document not serializable for search");
            return;
        }
    };
    if let Err(e) = state.search.index(index, value).await {
        warn!(index, error = %e, "search indexing failed");
    }
}

pub(crate) async fn unindex(state: &AppState, index: &str, id: uuid::Uuid) {
    if let Err(e) = state.search.remove(index, &id.to_string()).await {
        warn!(index, %id, error = %e, "search removal failed");
    }
}

pub(crate) async fn index_entity(state: &AppState, entity: &propdesk_core::LeaseableEntity) {
    index_document(state, ENTITIES_INDEX, entity).await
}

pub(crate) async fn index_lease(state: &AppState, lease: &propdesk_core::Lease) {
    index_document(state, LEASES_INDEX, lease).await
}
