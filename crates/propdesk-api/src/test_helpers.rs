//! Fixtures for integration tests: an application state over an in-memory
//! database with recording doubles in place of email and push delivery.

use std::sync::Arc;

use propdesk_core::{Settings, User};
use propdesk_integrations::{MemoryMailer, MemoryPush};
use propdesk_store::SqliteStore;
use secrecy::SecretString;
use tempfile::TempDir;

use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";
pub const TEST_PRO_PRICE: &str = "price_pro_test";
pub const TEST_ENTERPRISE_PRICE: &str = "price_enterprise_test";

/// Doubles wired into a testing state. Dropping this removes the backup
/// directory.
pub struct TestDoubles {
    pub mailer: Arc<MemoryMailer>,
    pub push: Arc<MemoryPush>,
    pub backup_dir: TempDir,
}

pub fn test_settings(backup_dir: &TempDir) -> Settings {
    let mut settings = Settings {
        env: "test".into(),
        ..Settings::default()
    };
    settings.auth.jwt_secret = Some(SecretString::from(TEST_JWT_SECRET.to_string()));
    settings.email.app_url = "https://app.propdesk.test".into();
    settings.stripe.webhook_secret = Some(SecretString::from(TEST_WEBHOOK_SECRET.to_string()));
    settings.stripe.pro_price_id = Some(TEST_PRO_PRICE.into());
    settings.stripe.enterprise_price_id = Some(TEST_ENTERPRISE_PRICE.into());
    settings.backups.dir = backup_dir.path().to_string_lossy().into_owned();
    settings.backups.retention = 2;
    settings
}

impl AppState {
    pub async fn for_testing() -> (Self, TestDoubles) {
        let backup_dir = tempfile::tempdir().expect("temp backup dir");
        Self::for_testing_with(test_settings(&backup_dir), backup_dir).await
    }

    /// Same as [`AppState::for_testing`] with caller-adjusted settings.
    pub async fn for_testing_with(settings: Settings, backup_dir: TempDir) -> (Self, TestDoubles) {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        let mut state =
            Self::with_store(Arc::new(settings), store).expect("testing state");

        let mailer = Arc::new(MemoryMailer::new());
        let push = Arc::new(MemoryPush::new());
        state.mailer = mailer.clone();
        state.push = push.clone();

        (
            state,
            TestDoubles {
                mailer,
                push,
                backup_dir,
            },
        )
    }

    /// Flags an existing account as a platform admin.
    pub async fn promote_to_admin(&self, user: &User) -> User {
        self.store
            .set_admin(user.id, true)
            .await
            .expect("promote user to admin")
    }
}
