//! SQLite persistence for Propdesk.
//!
//! Every resource lives in one database behind [`SqliteStore`]. Organization
//! owned reads take a [`propdesk_core::DataScope`] so rows a member may not
//! see never leave the database.

mod audit;
mod backups;
mod blog;
mod entities;
mod leases;
mod notifications;
mod organizations;
pub mod scope;
mod sqlite;
mod team;
mod users;

pub use sqlite::{create_database, Pool, SqliteStore};
pub use team::InvitationAccount;
