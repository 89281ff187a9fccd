use axum::http::StatusCode;
use gatehouse_backend::{
    models::user::UserRole,
    utils::cookies::{PENDING_2FA_COOKIE_NAME, SESSION_COOKIE_NAME},
};
use serde_json::{json, Value};

mod support;

use support::{current_totp, peer, seed_user, set_cookie, spawn_app, Client, TestApp, PASSWORD};

const WRONG_CODE: &str = "WRONG-CODE";

/// Signs in, runs setup and enable, and returns the secret with the backup
/// codes shown at setup.
async fn enroll(app: &TestApp, email: &str) -> (String, Vec<String>) {
    let mut client = Client::new(peer(200));
    let response = client.login(app, email, PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);

    let setup = client.post(app, "/api/auth/2fa/setup", json!({})).await;
    assert_eq!(setup.status, StatusCode::OK);
    let secret = setup.body["secret"].as_str().expect("secret").to_string();
    let codes: Vec<String> = serde_json::from_value(setup.body["backupCodes"].clone())
        .expect("backup codes");

    let enable = client
        .post(
            app,
            "/api/auth/2fa/enable",
            json!({ "code": current_totp(&secret) }),
        )
        .await;
    assert_eq!(enable.status, StatusCode::OK);
    (secret, codes)
}

async fn start_challenge(app: &TestApp, email: &str, n: u8) -> Client {
    let mut client = Client::new(peer(n));
    let response = client.login(app, email, PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "success": true, "requires2fa": true }));
    let pending = set_cookie(&response.headers, PENDING_2FA_COOKIE_NAME).expect("pending cookie");
    assert!(pending.contains("HttpOnly"));
    assert!(pending.contains("SameSite=Strict"));
    assert!(pending.contains("Max-Age=300"));
    assert!(client.cookie(PENDING_2FA_COOKIE_NAME).is_some());
    assert!(client.cookie(SESSION_COOKIE_NAME).is_none());
    client
}

#[tokio::test]
async fn setup_then_enable_turns_two_factor_on() {
    let app = spawn_app();
    seed_user(&app, "ivy@example.com", UserRole::Member).await;
    let mut client = Client::new(peer(100));
    client.login(&app, "ivy@example.com", PASSWORD).await;

    let setup = client.post(&app, "/api/auth/2fa/setup", json!({})).await;
    assert_eq!(setup.status, StatusCode::OK);
    assert!(setup.body["uri"]
        .as_str()
        .is_some_and(|uri| uri.starts_with("otpauth://totp/")));
    assert!(setup.body["qrCode"].as_str().is_some_and(|qr| !qr.is_empty()));
    assert_eq!(setup.body["backupCodes"].as_array().map(Vec::len), Some(10));

    let status = client.get(&app, "/api/auth/2fa/status").await;
    assert_eq!(status.body["enabled"], false);

    let secret = setup.body["secret"].as_str().expect("secret");
    let enable = client
        .post(
            &app,
            "/api/auth/2fa/enable",
            json!({ "code": current_totp(secret) }),
        )
        .await;
    assert_eq!(enable.status, StatusCode::OK);
    assert_eq!(enable.body["success"], true);

    let status = client.get(&app, "/api/auth/2fa/status").await;
    assert_eq!(status.body["enabled"], true);
    assert_eq!(status.body["backupCodesRemaining"], 10);
}

#[tokio::test]
async fn enable_without_setup_is_rejected() {
    let app = spawn_app();
    seed_user(&app, "jack@example.com", UserRole::Member).await;
    let mut client = Client::new(peer(101));
    client.login(&app, "jack@example.com", PASSWORD).await;

    let response = client
        .post(&app, "/api/auth/2fa/enable", json!({ "code": "123456" }))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn setup_requires_the_csrf_header() {
    let app = spawn_app();
    seed_user(&app, "kate@example.com", UserRole::Member).await;
    let mut client = Client::new(peer(102));
    client.login(&app, "kate@example.com", PASSWORD).await;

    let response = client
        .post_without_csrf(&app, "/api/auth/2fa/setup", json!({}))
        .await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["code"], "CSRF_MISMATCH");
}

#[tokio::test]
async fn backup_code_login_reports_remaining_codes() {
    let app = spawn_app();
    seed_user(&app, "liam@example.com", UserRole::Member).await;
    let (_, codes) = enroll(&app, "liam@example.com").await;

    let mut client = start_challenge(&app, "liam@example.com", 110).await;
    let response = client
        .post(&app, "/api/auth/2fa/verify", json!({ "code": codes[0] }))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["success"], true);
    assert_eq!(response.body["user"]["email"], "liam@example.com");
    assert_eq!(response.body["backupCodesRemaining"], 9);
    assert!(response.body["csrfToken"].is_string());
    assert!(client.cookie(SESSION_COOKIE_NAME).is_some());
    assert!(client.cookie(PENDING_2FA_COOKIE_NAME).is_none());

    // A consumed code never works twice.
    let mut again = start_challenge(&app, "liam@example.com", 111).await;
    let response = again
        .post(&app, "/api/auth/2fa/verify", json!({ "code": codes[0] }))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["code"], "INVALID_2FA_CODE");
}

#[tokio::test]
async fn totp_login_issues_a_session() {
    let app = spawn_app();
    seed_user(&app, "mia@example.com", UserRole::Admin).await;
    let (secret, _) = enroll(&app, "mia@example.com").await;

    let mut client = start_challenge(&app, "mia@example.com", 112).await;
    let response = client
        .post(
            &app,
            "/api/auth/2fa/verify",
            json!({ "code": current_totp(&secret) }),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.get("backupCodesRemaining").is_none());
    let session = client.get(&app, "/api/auth/session").await;
    assert_eq!(session.body["user"]["role"], "admin");
}

#[tokio::test]
async fn fifth_wrong_code_destroys_the_challenge() {
    let app = spawn_app();
    seed_user(&app, "noah@example.com", UserRole::Member).await;
    let (secret, _) = enroll(&app, "noah@example.com").await;
    let mut client = start_challenge(&app, "noah@example.com", 113).await;

    let mut remaining = Vec::new();
    for _ in 0..5 {
        let response = client
            .post(&app, "/api/auth/2fa/verify", json!({ "code": WRONG_CODE }))
            .await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        remaining.push(response.body["details"]["attemptsRemaining"].clone());
    }
    assert_eq!(
        remaining,
        vec![json!(4), json!(3), json!(2), json!(1), json!(0)]
    );
    assert!(client.cookie(PENDING_2FA_COOKIE_NAME).is_none());

    let response = client
        .post(
            &app,
            "/api/auth/2fa/verify",
            json!({ "code": current_totp(&secret) }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "2FA_SESSION_EXPIRED");
}

#[tokio::test]
async fn verify_without_challenge_reports_expiry() {
    let app = spawn_app();
    let mut client = Client::new(peer(114));

    let response = client
        .post(&app, "/api/auth/2fa/verify", json!({ "code": "123456" }))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "2FA_SESSION_EXPIRED");
}

#[tokio::test]
async fn disable_requires_the_password() {
    let app = spawn_app();
    seed_user(&app, "olga@example.com", UserRole::Member).await;
    let (secret, _) = enroll(&app, "olga@example.com").await;
    let mut client = start_challenge(&app, "olga@example.com", 115).await;
    client
        .post(
            &app,
            "/api/auth/2fa/verify",
            json!({ "code": current_totp(&secret) }),
        )
        .await;

    let response = client
        .post(&app, "/api/auth/2fa/disable", json!({ "password": "nope" }))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = client
        .post(&app, "/api/auth/2fa/disable", json!({ "password": PASSWORD }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let status = client.get(&app, "/api/auth/2fa/status").await;
    assert_eq!(status.body, json!({ "enabled": false }));

    // Without enrollment the password alone signs in again.
    let mut fresh = Client::new(peer(116));
    let response = fresh.login(&app, "olga@example.com", PASSWORD).await;
    assert!(response.body["csrfToken"].is_string());
}

#[tokio::test]
async fn regenerated_backup_codes_replace_the_old_set() {
    let app = spawn_app();
    seed_user(&app, "pia@example.com", UserRole::Member).await;
    let (secret, old_codes) = enroll(&app, "pia@example.com").await;
    let mut client = start_challenge(&app, "pia@example.com", 117).await;
    client
        .post(
            &app,
            "/api/auth/2fa/verify",
            json!({ "code": current_totp(&secret) }),
        )
        .await;

    let rejected = client
        .post(&app, "/api/auth/2fa/backup-codes", json!({ "code": WRONG_CODE }))
        .await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);

    let response = client
        .post(
            &app,
            "/api/auth/2fa/backup-codes",
            json!({ "code": current_totp(&secret) }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let new_codes = response.body["backupCodes"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    assert_eq!(new_codes.len(), 10);

    let mut challenge = start_challenge(&app, "pia@example.com", 118).await;
    let response = challenge
        .post(&app, "/api/auth/2fa/verify", json!({ "code": old_codes[0] }))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    let response = challenge
        .post(
            &app,
            "/api/auth/2fa/verify",
            json!({ "code": new_codes[0].clone() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["backupCodesRemaining"], Value::from(9));
}

#[tokio::test]
async fn global_flag_off_skips_the_second_factor() {
    let mut config = support::test_config();
    config.two_factor_enabled = false;
    let app = support::spawn_app_with(config);
    seed_user(&app, "quin@example.com", UserRole::Member).await;
    enroll(&app, "quin@example.com").await;

    let mut client = Client::new(peer(119));
    let response = client.login(&app, "quin@example.com", PASSWORD).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["user"]["twoFactorEnabled"], true);
    assert!(response.body.get("requires2fa").is_none());
    assert!(client.cookie(SESSION_COOKIE_NAME).is_some());
}
