//! End-to-end session tests: login, restore across restarts, logout and
//! server-side session expiry.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use salon_client::{
    ClearReason, Event, GatewayError, GetOptions, SessionError, SessionState, Topic,
};
use salon_core::Email;
use salon_integration_tests::{EMAIL, PASSWORD, TestContext, USER_ID};
use secrecy::SecretString;

async fn login(client: &salon_client::SalonClient) {
    client
        .session()
        .login(&Email::parse(EMAIL).unwrap(), &SecretString::from(PASSWORD))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_survives_restart() {
    let ctx = TestContext::new().await;

    let first = ctx.client();
    login(&first).await;
    assert_eq!(
        first.session().session().user().map(|u| u.id.as_i64()),
        Some(USER_ID)
    );
    drop(first);

    let second = ctx.client();
    let state = second.session().restore().await;

    assert!(state.is_authenticated());
    assert_eq!(ctx.backend.hits("me"), 1);
}

#[tokio::test]
async fn test_wrong_password() {
    let ctx = TestContext::new().await;
    let client = ctx.client();

    let err = client
        .session()
        .login(
            &Email::parse(EMAIL).unwrap(),
            &SecretString::from("wrong".to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidCredentials));
    assert_eq!(client.session().session(), SessionState::LoggedOut);
    assert!(ctx.stored_keys().is_empty());
}

#[tokio::test]
async fn test_logout_clears_storage_and_notifies_backend() {
    let ctx = TestContext::new().await;
    let client = ctx.client();
    login(&client).await;
    assert!(ctx.stored_keys().contains(&"session.credentials".to_string()));

    client.session().logout().await;

    assert_eq!(client.session().session(), SessionState::LoggedOut);
    assert!(ctx.stored_keys().is_empty());
    assert_eq!(ctx.backend.logout_tokens(), vec!["tok-1".to_string()]);

    // Nothing left to restore.
    assert_eq!(ctx.client().session().restore().await, SessionState::LoggedOut);
}

#[tokio::test]
async fn test_revoked_session_is_not_restored() {
    let ctx = TestContext::new().await;
    login(&ctx.client()).await;
    ctx.backend.revoke_all_tokens();

    let client = ctx.client();
    assert_eq!(client.session().restore().await, SessionState::LoggedOut);
    assert!(ctx.stored_keys().is_empty());
}

#[tokio::test]
async fn test_server_side_expiry_logs_out_once() {
    let ctx = TestContext::new().await;
    let client = ctx.client();
    login(&client).await;
    client.selected_shop().select(salon_core::ShopId::new(1)).await.unwrap();

    let cleared = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&cleared);
    client.events().subscribe(Topic::SessionCleared, move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });

    ctx.backend.revoke_all_tokens();
    let gateway = client.gateway();
    let (a, b, c) = tokio::join!(
        gateway.get::<serde_json::Value>("appointments"),
        gateway.get::<serde_json::Value>("appointments"),
        client.selected_shop().current(GetOptions::force_refresh()),
    );

    for err in [a.unwrap_err(), b.unwrap_err(), c.unwrap_err()] {
        assert!(matches!(
            err,
            GatewayError::AuthFailure { status } if status == StatusCode::UNAUTHORIZED
        ));
    }
    assert_eq!(client.session().session(), SessionState::LoggedOut);
    assert_eq!(
        *cleared.lock().unwrap(),
        vec![Event::SessionCleared {
            reason: ClearReason::AuthFailure
        }]
    );
    assert!(client.selected_shop().snapshot().value.is_none());
    assert!(ctx.stored_keys().is_empty());
}
