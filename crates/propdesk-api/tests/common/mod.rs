#![allow(dead_code)]

use axum::http::StatusCode;
use axum_test::TestServer;
use propdesk_api::test_helpers::TestDoubles;
use propdesk_api::{create_router, AppState};
use serde_json::{json, Value};
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-42";

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub doubles: TestDoubles,
}

pub async fn spawn_app() -> TestApp {
    let (state, doubles) = AppState::for_testing().await;
    spawn_with(state, doubles)
}

pub fn spawn_with(state: AppState, doubles: TestDoubles) -> TestApp {
    let server = TestServer::new(create_router(state.clone())).expect("test server");
    TestApp {
        server,
        state,
        doubles,
    }
}

pub struct Account {
    pub token: String,
    pub user_id: Uuid,
    pub email: String,
    pub org_id: Option<Uuid>,
}

impl Account {
    pub fn org(&self) -> Uuid {
        self.org_id.expect("account has an organization")
    }
}

fn uuid_at(value: &Value, pointer: &str) -> Uuid {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("no uuid at {} in {}", pointer, value))
}

pub fn id_of(value: &Value) -> Uuid {
    uuid_at(value, "/id")
}

impl TestApp {
    /// Signs up a new account, optionally together with an organization.
    pub async fn signup(&self, email: &str, organization: Option<&str>) -> Account {
        let response = self
            .server
            .post("/auth/signup")
            .json(&json!({
                "email": email,
                "full_name": "Test User",
                "password": PASSWORD,
                "organization_name": organization,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();

        Account {
            token: body["token"].as_str().expect("token").to_string(),
            user_id: uuid_at(&body, "/user/id"),
            email: email.to_string(),
            org_id: organization.map(|_| uuid_at(&body, "/organization/id")),
        }
    }

    pub async fn signup_admin(&self, email: &str) -> Account {
        let account = self.signup(email, None).await;
        let user = self
            .state
            .store
            .get_user(account.user_id)
            .await
            .expect("user exists");
        self.state.promote_to_admin(&user).await;
        account
    }

    /// Invites `email` into the owner's organization and accepts as a new
    /// account. Returns the new account and its member id.
    pub async fn invite_and_join(&self, owner: &Account, email: &str, role: &str) -> (Account, Uuid) {
        self.server
            .post(&format!("/orgs/{}/invitations", owner.org()))
            .authorization_bearer(&owner.token)
            .json(&json!({ "email": email, "role": role }))
            .await
            .assert_status(StatusCode::CREATED);

        let token = self.invitation_token(email);
        let response = self
            .server
            .post(&format!("/invitations/{}/accept", token))
            .json(&json!({ "full_name": "Invited User", "password": PASSWORD }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();

        (
            Account {
                token: body["token"].as_str().expect("token").to_string(),
                user_id: uuid_at(&body, "/user/id"),
                email: email.to_string(),
                org_id: Some(owner.org()),
            },
            uuid_at(&body, "/member/id"),
        )
    }

    /// Token from the last invitation link mailed to `email`.
    pub fn invitation_token(&self, email: &str) -> String {
        let message = self
            .doubles
            .mailer
            .last_to(email)
            .expect("invitation email sent");
        link_token(&message.text, "/invitations/")
    }

    pub async fn create_property(&self, account: &Account, name: &str) -> Uuid {
        let response = self
            .server
            .post(&format!("/orgs/{}/entities", account.org()))
            .authorization_bearer(&account.token)
            .json(&json!({ "kind": "property", "name": name }))
            .await;
        response.assert_status(StatusCode::CREATED);
        id_of(&response.json())
    }

    pub async fn audit_actions(&self, org_id: Uuid) -> Vec<String> {
        let filter = propdesk_core::AuditFilter {
            organization_id: Some(org_id),
            limit: Some(100),
            ..Default::default()
        };
        self.state
            .store
            .list_audit(&filter)
            .await
            .expect("audit list")
            .items
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }
}

/// Extracts the token following `marker` in a link inside `text`.
pub fn link_token(text: &str, marker: &str) -> String {
    let start = text.find(marker).expect("link in email") + marker.len();
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
