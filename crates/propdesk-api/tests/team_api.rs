mod common;

use axum::http::StatusCode;
use common::{id_of, PASSWORD};
use serde_json::{json, Value};

#[tokio::test]
async fn invitation_preview_and_accept() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;

    let created = app
        .server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "Casey@Example.com", "role": "member" }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let invitation: Value = created.json();
    assert_eq!(invitation["status"], "pending");
    assert!(invitation.get("token").is_none());

    let message = app.doubles.mailer.last_to("casey@example.com").unwrap();
    assert!(message.text.contains("https://app.propdesk.test/invitations/"));
    let token = app.invitation_token("casey@example.com");

    let preview: Value = app
        .server
        .get(&format!("/invitations/{}", token))
        .await
        .json();
    assert_eq!(preview["organization_name"], "Harbor Lofts");
    assert_eq!(preview["has_account"], false);

    app.server
        .post(&format!("/invitations/{}/accept", token))
        .json(&json!({}))
        .expect_failure()
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let accepted = app
        .server
        .post(&format!("/invitations/{}/accept", token))
        .json(&json!({ "full_name": "Casey", "password": PASSWORD }))
        .await;
    accepted.assert_status_ok();
    let accepted: Value = accepted.json();
    assert_eq!(accepted["member"]["role"], "member");
    assert!(accepted["token"].is_string());

    app.server
        .post(&format!("/invitations/{}/accept", token))
        .json(&json!({ "full_name": "Casey", "password": PASSWORD }))
        .expect_failure()
        .await
        .assert_status(StatusCode::GONE);

    let team: Value = app
        .server
        .get(&format!("/orgs/{}/team", owner.org()))
        .authorization_bearer(&owner.token)
        .await
        .json();
    assert_eq!(team.as_array().unwrap().len(), 2);

    assert!(app
        .audit_actions(owner.org())
        .await
        .contains(&"invitation.accept".to_string()));
}

#[tokio::test]
async fn duplicate_pending_invitations_conflict() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;
    let path = format!("/orgs/{}/invitations", owner.org());

    app.server
        .post(&path)
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "casey@example.com" }))
        .await
        .assert_status(StatusCode::CREATED);
    app.server
        .post(&path)
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "casey@example.com" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn existing_member_invitation_merges_permissions() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;
    let (casey, member_id) = app.invite_and_join(&owner, "casey@example.com", "member").await;
    let (admin, admin_member) = app.invite_and_join(&owner, "admin@example.com", "admin").await;

    app.server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({
            "email": "casey@example.com",
            "role": "member",
            "permissions": { "pages": ["leases"], "leases_access_mode": "all" },
        }))
        .await
        .assert_status(StatusCode::CREATED);
    let token = app.invitation_token("casey@example.com");

    let accepted: Value = app
        .server
        .post(&format!("/invitations/{}/accept", token))
        .authorization_bearer(&casey.token)
        .json(&json!({}))
        .await
        .json();
    assert_eq!(id_of(&accepted["member"]), member_id);
    assert_eq!(accepted["member"]["role"], "member");
    let permissions = &accepted["member"]["permissions"];
    let pages = permissions["pages"].as_array().unwrap();
    assert!(pages.contains(&json!("leases")));
    assert!(pages.contains(&json!("dashboard")));
    assert_eq!(permissions["leases_access_mode"], "all");
    assert_eq!(permissions["properties_access_mode"], "none");

    // The merged grant is live for the member.
    app.server
        .get(&format!("/orgs/{}/leases", owner.org()))
        .authorization_bearer(&casey.token)
        .await
        .assert_status_ok();

    // A lower invited role never demotes an existing member.
    app.server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "admin@example.com", "role": "member" }))
        .await
        .assert_status(StatusCode::CREATED);
    let token = app.invitation_token("admin@example.com");
    let accepted: Value = app
        .server
        .post(&format!("/invitations/{}/accept", token))
        .authorization_bearer(&admin.token)
        .json(&json!({}))
        .await
        .json();
    assert_eq!(id_of(&accepted["member"]), admin_member);
    assert_eq!(accepted["member"]["role"], "admin");

    let team: Value = app
        .server
        .get(&format!("/orgs/{}/team", owner.org()))
        .authorization_bearer(&owner.token)
        .await
        .json();
    assert_eq!(team.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn signed_in_invitee_must_match_email() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;
    let casey = app.signup("casey@example.com", None).await;
    let other = app.signup("other@example.com", None).await;

    app.server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "casey@example.com", "role": "admin" }))
        .await
        .assert_status(StatusCode::CREATED);
    let token = app.invitation_token("casey@example.com");

    // Anonymous accept cannot take over an existing account.
    app.server
        .post(&format!("/invitations/{}/accept", token))
        .json(&json!({ "full_name": "Casey", "password": PASSWORD }))
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);

    app.server
        .post(&format!("/invitations/{}/accept", token))
        .authorization_bearer(&other.token)
        .json(&json!({}))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let accepted: Value = app
        .server
        .post(&format!("/invitations/{}/accept", token))
        .authorization_bearer(&casey.token)
        .json(&json!({}))
        .await
        .json();
    assert_eq!(accepted["member"]["role"], "admin");
    assert_eq!(accepted["user"]["id"], casey.user_id.to_string());
}

#[tokio::test]
async fn revoked_invitations_cannot_be_accepted() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;

    let created = app
        .server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "casey@example.com" }))
        .await;
    let invitation_id = id_of(&created.json());
    let token = app.invitation_token("casey@example.com");

    let revoked: Value = app
        .server
        .delete(&format!("/orgs/{}/invitations/{}", owner.org(), invitation_id))
        .authorization_bearer(&owner.token)
        .await
        .json();
    assert_eq!(revoked["status"], "revoked");

    app.server
        .post(&format!("/invitations/{}/accept", token))
        .json(&json!({ "full_name": "Casey", "password": PASSWORD }))
        .expect_failure()
        .await
        .assert_status(StatusCode::GONE);
}

#[tokio::test]
async fn resend_issues_a_new_link() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;

    let created = app
        .server
        .post(&format!("/orgs/{}/invitations", owner.org()))
        .authorization_bearer(&owner.token)
        .json(&json!({ "email": "casey@example.com" }))
        .await;
    let invitation_id = id_of(&created.json());
    let first = app.invitation_token("casey@example.com");

    app.server
        .post(&format!(
            "/orgs/{}/invitations/{}/resend",
            owner.org(),
            invitation_id
        ))
        .authorization_bearer(&owner.token)
        .await
        .assert_status_ok();
    let second = app.invitation_token("casey@example.com");
    assert_ne!(first, second);

    app.server
        .get(&format!("/invitations/{}", first))
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn role_rules_protect_owners() {
    let app = common::spawn_app().await;
    let owner = app.signup("owner@example.com", Some("Harbor Lofts")).await;
    let (admin, admin_member) = app.invite_and_join(&owner, "admin@example.com", "admin").await;
    let (member, member_id) = app.invite_and_join(&owner, "member@example.com", "member").await;

    let team: Value = app
        .server
        .get(&format!("/orgs/{}/team", owner.org()))
        .authorization_bearer(&owner.token)
        .await
        .json();
    let owner_member = team
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["role"] == "owner")
        .map(id_of)
        .unwrap();
    let team_path = |id| format!("/orgs/{}/team/{}", owner.org(), id);

    // Plain members cannot manage the team.
    app.server
        .patch(&team_path(admin_member))
        .authorization_bearer(&member.token)
        .json(&json!({ "role": "member" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Admins cannot touch owners or mint new ones.
    app.server
        .patch(&team_path(owner_member))
        .authorization_bearer(&admin.token)
        .json(&json!({ "role": "member" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.server
        .patch(&team_path(member_id))
        .authorization_bearer(&admin.token)
        .json(&json!({ "role": "owner" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // The last owner stays.
    app.server
        .patch(&team_path(owner_member))
        .authorization_bearer(&owner.token)
        .json(&json!({ "role": "admin" }))
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);
    app.server
        .delete(&team_path(owner_member))
        .authorization_bearer(&owner.token)
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);

    // A refused demotion does not half-apply the permissions sent with it.
    app.server
        .patch(&team_path(owner_member))
        .authorization_bearer(&owner.token)
        .json(&json!({ "role": "member", "permissions": { "pages": ["leases"] } }))
        .expect_failure()
        .await
        .assert_status(StatusCode::CONFLICT);
    let after: Value = app
        .server
        .get(&format!("/orgs/{}/team", owner.org()))
        .authorization_bearer(&owner.token)
        .await
        .json();
    let owner_after = after
        .as_array()
        .unwrap()
        .iter()
        .find(|m| id_of(m) == owner_member)
        .unwrap();
    let owner_before = team
        .as_array()
        .unwrap()
        .iter()
        .find(|m| id_of(m) == owner_member)
        .unwrap();
    assert_eq!(owner_after["role"], "owner");
    assert_eq!(owner_after["permissions"], owner_before["permissions"]);

    // Admins can grant pages to members.
    let granted: Value = app
        .server
        .patch(&team_path(member_id))
        .authorization_bearer(&admin.token)
        .json(&json!({ "grant": { "pages": ["leases"] } }))
        .await
        .json();
    let pages = granted["permissions"]["pages"].as_array().unwrap();
    assert!(pages.contains(&json!("leases")));
    assert!(pages.contains(&json!("dashboard")));

    app.server
        .delete(&team_path(member_id))
        .authorization_bearer(&admin.token)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let actions = app.audit_actions(owner.org()).await;
    assert!(actions.contains(&"team.update_permissions".to_string()));
    assert!(actions.contains(&"team.remove".to_string()));
}
