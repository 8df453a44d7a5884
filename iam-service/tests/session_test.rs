mod common;

use common::{TestApp, TEST_ADMIN_USER};
use serde_json::{json, Value};

#[tokio::test]
async fn session_round_trip() {
    let app = TestApp::spawn().await;
    let user = app.create_user("Joe", "joe@example.org").await;

    let response = app.start_session(&user).await;
    assert_eq!(response.status().as_u16(), 201);
    let session: Value = response.json().await.unwrap();
    let token = session["access_token"].as_str().unwrap().to_string();
    assert_eq!(session["token_type"], "Bearer");

    let response = app.post_bearer("/logout", &token).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["logged_out"], true);

    // Second logout with the same token is refused
    let response = app.post_bearer("/logout", &token).await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn minting_a_session_requires_the_operator_credential() {
    let app = TestApp::spawn().await;
    let user = app.create_user("Joe", "joe@example.org").await;
    let path = format!("/user/{}/session", user);

    let response = app.post(&path, json!({})).await;
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(
        response.headers()["www-authenticate"],
        "Basic realm=\"iam-service\""
    );

    let response = app
        .client
        .post(app.url(&path))
        .basic_auth(TEST_ADMIN_USER, Some("wrong-password"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // A user's own bearer token is not an operator credential.
    let token: Value = app.start_session(&user).await.json().await.unwrap();
    let response = app
        .post_bearer(&path, token["access_token"].as_str().unwrap())
        .await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn session_for_unknown_user_is_404() {
    let app = TestApp::spawn().await;

    let response = app.start_session("ghost").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn inspect_reports_claims_until_logout() {
    let app = TestApp::spawn().await;
    let user = app.create_user("Joe", "joe@example.org").await;
    let session: Value = app.start_session(&user).await.json().await.unwrap();
    let token = session["access_token"].as_str().unwrap().to_string();

    let response = app.post_bearer("/inspect", &token).await;
    assert_eq!(response.status().as_u16(), 200);
    let claims: Value = response.json().await.unwrap();
    assert_eq!(claims["sub"], user.as_str());
    assert_eq!(claims["aud"], "iam-service-test");

    app.post_bearer("/logout", &token).await;

    let response = app.post_bearer("/inspect", &token).await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn logout_requires_bearer_token() {
    let app = TestApp::spawn().await;

    let response = app.client.post(app.url("/logout")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = app.post_bearer("/logout", "not-a-jwt").await;
    assert_eq!(response.status().as_u16(), 401);
}
