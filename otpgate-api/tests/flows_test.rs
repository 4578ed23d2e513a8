/// End-to-end flows against a real database
///
/// Run with `DATABASE_URL=postgresql://... cargo test -p otpgate-api -- --ignored`.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use common::{bot_verify, delete, get, post_json, random_phone, send, TestContext};
use otpgate_shared::{
    auth::tokens::hash_secret,
    models::{
        login_request::LoginRequest,
        otp_request::{OtpRequest, MAX_OTP_ATTEMPTS, OTP_RATE_LIMIT},
        user::UserRole,
    },
};
use serde_json::{json, Value};
use uuid::Uuid;

/// Issues a QR login request and returns its hash
async fn request_qr(ctx: &TestContext, phone: &str) -> String {
    let (status, body) = send(
        &ctx.app,
        post_json("/api/auth/qr/request", None, json!({ "phone": phone })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["data"]["hash_code"].as_str().unwrap().to_string()
}

/// Fires `count` requests at once and collects their statuses
async fn concurrently<F>(ctx: &TestContext, count: usize, make: F) -> Vec<StatusCode>
where
    F: Fn(usize) -> Request<Body>,
{
    let handles: Vec<_> = (0..count)
        .map(|i| {
            let app = ctx.app.clone();
            let request = make(i);
            tokio::spawn(async move { send(&app, request).await.0 })
        })
        .collect();

    let mut statuses = Vec::with_capacity(count);
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    statuses
}

fn count_status(statuses: &[StatusCode], wanted: StatusCode) -> usize {
    statuses.iter().filter(|s| **s == wanted).count()
}

async fn otp_rows_for(ctx: &TestContext, user_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM otp_requests WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&ctx.db)
        .await
        .unwrap()
}

async fn create_organization(ctx: &TestContext, owner_token: &str, name: &str) -> String {
    let (status, body) = send(
        &ctx.app,
        post_json("/api/organizations", Some(owner_token), json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
#[ignore]
async fn test_qr_login_flow() {
    let ctx = TestContext::new().await.unwrap();
    let phone = random_phone();

    let hash = request_qr(&ctx, &phone).await;
    let status_uri = format!("/api/auth/qr/status/{}", hash);

    let (status, body) = send(&ctx.app, get(&status_uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");

    let (status, body) = send(&ctx.app, bot_verify(&phone, &hash)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["verified"], true);

    // Repeated webhook is idempotent
    let (status, _) = send(&ctx.app, bot_verify(&phone, &hash)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&ctx.app, get(&status_uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "verified");
    let token = body["data"]["token"].as_str().unwrap().to_string();

    // Polling again hands out the same session
    let (_, again) = send(&ctx.app, get(&status_uri, None)).await;
    assert_eq!(again["data"]["token"], token.as_str());

    let (status, me) = send(&ctx.app, get("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["phone"], phone.as_str());

    let (_, balance) = send(&ctx.app, get("/api/credits/balance", Some(&token))).await;
    assert_eq!(balance["data"]["balance"], 10);
    assert_eq!(balance["data"]["trial"]["blocked"], false);
}

#[tokio::test]
#[ignore]
async fn test_phone_mismatch_is_recorded() {
    let ctx = TestContext::new().await.unwrap();
    let phone = random_phone();

    let hash = request_qr(&ctx, &phone).await;

    let (status, _) = send(&ctx.app, bot_verify(&random_phone(), &hash)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&ctx.app, get(&format!("/api/auth/qr/status/{}", hash), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "phone_mismatch");

    // The rightful phone cannot verify a failed request either
    let (status, _) = send(&ctx.app, bot_verify(&phone, &hash)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
async fn test_pending_request_limit() {
    let ctx = TestContext::with_overrides(&[("MAX_PENDING_LOGIN_REQUESTS", "2")])
        .await
        .unwrap();
    let phone = random_phone();

    request_qr(&ctx, &phone).await;
    request_qr(&ctx, &phone).await;

    let (status, body) = send(
        &ctx.app,
        post_json("/api/auth/qr/request", None, json!({ "phone": phone })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limit_exceeded");
}

#[tokio::test]
#[ignore]
async fn test_trial_credits_run_out() {
    let ctx = TestContext::with_overrides(&[("WELCOME_CREDITS", "2")])
        .await
        .unwrap();
    let (_, token) = ctx.user_with_session(UserRole::User).await.unwrap();

    for expected in [1, 0] {
        let (status, body) = send(&ctx.app, post_json("/api/credits/use", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["balance"], expected);
    }

    let (status, body) = send(&ctx.app, post_json("/api/credits/use", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (_, txs) = send(&ctx.app, get("/api/credits/transactions", Some(&token))).await;
    assert_eq!(txs["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
#[ignore]
async fn test_register_then_login() {
    let ctx = TestContext::new().await.unwrap();
    let phone = random_phone();

    let (status, body) = send(
        &ctx.app,
        post_json(
            "/api/auth/register",
            None,
            json!({ "phone": phone, "password": "hunter22x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, _) = send(
        &ctx.app,
        post_json(
            "/api/auth/register",
            None,
            json!({ "phone": phone, "password": "hunter22x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &ctx.app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "identifier": phone, "password": "wrong-pass1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &ctx.app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "identifier": phone, "password": "hunter22x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, _) = send(&ctx.app, post_json("/api/auth/logout", Some(&token), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&ctx.app, get("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_organization_charged_once_per_login_request() {
    let ctx = TestContext::new().await.unwrap();
    let (_, admin_token) = ctx.user_with_session(UserRole::Admin).await.unwrap();
    let (_, owner_token) = ctx.user_with_session(UserRole::User).await.unwrap();

    let org_id = create_organization(&ctx, &owner_token, "Acme").await;

    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/api/admin/organizations/{}/credits", org_id),
            Some(&admin_token),
            json!({ "amount": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/api/organizations/{}/tokens", org_id),
            Some(&owner_token),
            json!({ "name": "backend" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let org_token = body["data"]["token"].as_str().unwrap().to_string();

    let phone = random_phone();
    let hash = request_qr(&ctx, &phone).await;

    let (_, body) = send(
        &ctx.app,
        post_json("/api/v1/validate-hash", Some(&org_token), json!({ "hash_code": hash })),
    )
    .await;
    assert_eq!(body["data"]["verified"], false);
    assert_eq!(body["data"]["status"], "pending");

    let (status, _) = send(&ctx.app, bot_verify(&phone, &hash)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, first) = send(
        &ctx.app,
        post_json("/api/v1/validate-hash", Some(&org_token), json!({ "hash_code": hash })),
    )
    .await;
    assert_eq!(first["data"]["verified"], true);
    assert_eq!(first["data"]["charged"], true);
    assert_eq!(first["data"]["balance"], 4);

    let (_, second) = send(
        &ctx.app,
        post_json("/api/v1/validate-hash", Some(&org_token), json!({ "hash_code": hash })),
    )
    .await;
    assert_eq!(second["data"]["charged"], false);
    assert_eq!(second["data"]["balance"], 4);
}

#[tokio::test]
#[ignore]
async fn test_non_member_cannot_see_organization() {
    let ctx = TestContext::new().await.unwrap();
    let (_, owner_token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let (_, other_token) = ctx.user_with_session(UserRole::User).await.unwrap();

    let org_id = create_organization(&ctx, &owner_token, "Private").await;

    let (status, _) = send(
        &ctx.app,
        get(&format!("/api/organizations/{}", org_id), Some(&other_token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&ctx.app, get("/api/admin/stats", Some(&other_token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn test_otp_send_and_wrong_code() {
    let ctx = TestContext::new().await.unwrap();
    let (_, token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let phone = random_phone();

    let (status, body) = send(
        &ctx.app,
        post_json("/api/otp/send", Some(&token), json!({ "phone": phone })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["balance"], 9);

    let (status, _) = send(
        &ctx.app,
        post_json(
            "/api/otp/verify",
            Some(&token),
            json!({ "phone": phone, "code": "000000x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_wrong_codes_stop_at_attempt_budget() {
    let ctx = TestContext::new().await.unwrap();
    let (user, token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let phone = random_phone();

    let request = OtpRequest::create(
        &ctx.db,
        user.id,
        &phone,
        &hash_secret("123456"),
        OtpRequest::expiry_from(Utc::now()),
    )
    .await
    .unwrap();

    let statuses = concurrently(&ctx, 40, |_| {
        post_json(
            "/api/otp/verify",
            Some(&token),
            json!({ "phone": phone, "code": "654321" }),
        )
    })
    .await;

    assert_eq!(
        count_status(&statuses, StatusCode::BAD_REQUEST),
        MAX_OTP_ATTEMPTS as usize
    );
    assert_eq!(
        count_status(&statuses, StatusCode::TOO_MANY_REQUESTS),
        40 - MAX_OTP_ATTEMPTS as usize
    );

    let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM otp_requests WHERE id = $1")
        .bind(request.id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(attempts, MAX_OTP_ATTEMPTS);

    // The right code no longer helps once the budget is spent
    let (status, _) = send(
        &ctx.app,
        post_json(
            "/api/otp/verify",
            Some(&token),
            json!({ "phone": phone, "code": "123456" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
#[ignore]
async fn test_correct_code_within_budget_verifies() {
    let ctx = TestContext::new().await.unwrap();
    let (user, token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let phone = random_phone();

    OtpRequest::create(
        &ctx.db,
        user.id,
        &phone,
        &hash_secret("123456"),
        OtpRequest::expiry_from(Utc::now()),
    )
    .await
    .unwrap();

    for _ in 0..(MAX_OTP_ATTEMPTS - 1) {
        let (status, _) = send(
            &ctx.app,
            post_json(
                "/api/otp/verify",
                Some(&token),
                json!({ "phone": phone, "code": "654321" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, body) = send(
        &ctx.app,
        post_json(
            "/api/otp/verify",
            Some(&token),
            json!({ "phone": phone, "code": "123456" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["verified"], true);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_sends_only_deliver_paid_codes() {
    let ctx = TestContext::with_overrides(&[("WELCOME_CREDITS", "1")])
        .await
        .unwrap();
    let (user, token) = ctx.user_with_session(UserRole::User).await.unwrap();

    let statuses = concurrently(&ctx, 10, |_| {
        post_json(
            "/api/otp/send",
            Some(&token),
            json!({ "phone": random_phone() }),
        )
    })
    .await;

    assert_eq!(count_status(&statuses, StatusCode::OK), 1);
    assert_eq!(count_status(&statuses, StatusCode::FORBIDDEN), 9);
    assert_eq!(ctx.delivered_otps(), 1);
    assert_eq!(otp_rows_for(&ctx, user.id).await, 1);
    assert_eq!(ctx.state.ledger.balance(user.id).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_sends_respect_phone_limit() {
    let ctx = TestContext::new().await.unwrap();
    let (user, token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let phone = random_phone();

    let statuses = concurrently(&ctx, 8, |_| {
        post_json("/api/otp/send", Some(&token), json!({ "phone": phone }))
    })
    .await;

    let sent = OTP_RATE_LIMIT as usize;
    assert_eq!(count_status(&statuses, StatusCode::OK), sent);
    assert_eq!(count_status(&statuses, StatusCode::TOO_MANY_REQUESTS), 8 - sent);
    assert_eq!(ctx.delivered_otps(), sent);
    assert_eq!(
        ctx.state.ledger.balance(user.id).await.unwrap(),
        10 - sent as i64
    );
}

#[tokio::test]
#[ignore]
async fn test_failed_delivery_is_not_charged() {
    let ctx = TestContext::with_overrides(&[("BOT_SERVICE_URL", "http://127.0.0.1:1")])
        .await
        .unwrap();
    let (user, token) = ctx.user_with_session(UserRole::User).await.unwrap();

    let (status, _) = send(
        &ctx.app,
        post_json("/api/otp/send", Some(&token), json!({ "phone": random_phone() })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(ctx.state.ledger.balance(user.id).await.unwrap(), 10);
    assert_eq!(otp_rows_for(&ctx, user.id).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_qr_requests_respect_pending_limit() {
    let ctx = TestContext::with_overrides(&[("MAX_PENDING_LOGIN_REQUESTS", "5")])
        .await
        .unwrap();
    let phone = random_phone();

    let statuses = concurrently(&ctx, 12, |_| {
        post_json("/api/auth/qr/request", None, json!({ "phone": phone }))
    })
    .await;

    assert_eq!(count_status(&statuses, StatusCode::OK), 5);
    assert_eq!(count_status(&statuses, StatusCode::TOO_MANY_REQUESTS), 7);
    assert_eq!(
        LoginRequest::count_pending_for_phone(&ctx.db, &phone)
            .await
            .unwrap(),
        5
    );
}

#[tokio::test]
#[ignore]
async fn test_rejected_request_is_listed_as_failed() {
    let ctx = TestContext::new().await.unwrap();
    let (_, admin_token) = ctx.user_with_session(UserRole::Admin).await.unwrap();
    let phone = random_phone();

    let hash = request_qr(&ctx, &phone).await;
    let (status, _) = send(&ctx.app, bot_verify(&random_phone(), &hash)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let listed = |body: &Value| {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["hash_code"] == hash.as_str())
    };

    let (_, pending) = send(
        &ctx.app,
        get("/api/admin/login-requests?status=pending&limit=200", Some(&admin_token)),
    )
    .await;
    assert!(!listed(&pending));

    let (status, failed) = send(
        &ctx.app,
        get("/api/admin/login-requests?status=failed&limit=200", Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", failed);
    assert!(listed(&failed));

    let (_, stats) = send(&ctx.app, get("/api/admin/stats", Some(&admin_token))).await;
    assert!(stats["data"]["login_requests"]["failed"].as_i64().unwrap() >= 1);
}

#[tokio::test]
#[ignore]
async fn test_removed_member_leaves_groups() {
    let ctx = TestContext::new().await.unwrap();
    let (_, owner_token) = ctx.user_with_session(UserRole::User).await.unwrap();
    let (member, _) = ctx.user_with_session(UserRole::User).await.unwrap();

    let org_id = create_organization(&ctx, &owner_token, "Groups").await;

    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/api/organizations/{}/members", org_id),
            Some(&owner_token),
            json!({ "phone": member.phone }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = send(
        &ctx.app,
        post_json(
            &format!("/api/organizations/{}/groups", org_id),
            Some(&owner_token),
            json!({ "name": "ops" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let group_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &ctx.app,
        post_json(
            &format!("/api/organizations/{}/groups/{}/members", org_id, group_id),
            Some(&owner_token),
            json!({ "user_id": member.id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &ctx.app,
        delete(
            &format!("/api/organizations/{}/members/{}", org_id, member.id),
            Some(&owner_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, groups) = send(
        &ctx.app,
        get(&format!("/api/organizations/{}/groups", org_id), Some(&owner_token)),
    )
    .await;
    assert_eq!(groups["data"][0]["member_ids"], json!([]));
}

#[tokio::test]
#[ignore]
async fn test_login_does_not_reveal_qr_only_accounts() {
    let ctx = TestContext::new().await.unwrap();
    let (qr_user, _) = ctx.user_with_session(UserRole::User).await.unwrap();

    let (status, qr_only) = send(
        &ctx.app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "identifier": qr_user.phone, "password": "hunter22x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, unknown) = send(
        &ctx.app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "identifier": random_phone(), "password": "hunter22x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(qr_only, unknown);
}
