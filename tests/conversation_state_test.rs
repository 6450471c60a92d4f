//! Ephemeral conversation state: expiry on read, sweep, and the background
//! sweep task.

mod common;

use chrono::Duration as ChronoDuration;
use common::{settle, Harness};
use serde_json::json;
use settings_core::SettingsError;
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_state_expires_after_ttl_and_sweep_removes_row() {
    let h = Harness::new();
    assert_ok!(
        h.service
            .set_conversation_state(7, "awaiting_slippage", json!({"step": 2}), 10)
            .await
    );
    assert_ok!(
        h.service
            .set_conversation_state(8, "awaiting_amount", json!({}), 30)
            .await
    );

    let state = h.service.get_conversation_state(7).await.unwrap().unwrap();
    assert_eq!(state.state_tag, "awaiting_slippage");
    assert_eq!(state.payload["step"], 2);

    h.clock.advance(ChronoDuration::minutes(11));

    let removed = h.service.conversation_states().sweep_expired().await.unwrap();
    assert_eq!(removed, 1);
    assert!(h.durable.conversation_row(7).is_none());
    assert!(h.durable.conversation_row(8).is_some());
    assert!(h.service.get_conversation_state(7).await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_minute_state_absent_after_61_seconds_without_sweep() {
    let h = Harness::new();
    h.service
        .set_conversation_state(7, "awaiting_amount", json!({}), 1)
        .await
        .unwrap();
    assert!(h.service.get_conversation_state(7).await.unwrap().is_some());

    h.clock.advance(ChronoDuration::seconds(61));
    assert!(h.service.get_conversation_state(7).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_miss_racing_set_state_serves_new_state() {
    let h = Harness::new();
    h.service
        .set_conversation_state(7, "awaiting_token", json!({"step": 1}), 10)
        .await
        .unwrap();
    h.backend.remove_raw(&h.key("conversation", 7));

    let mut held = h.durable.hold_next_load();
    let states = h.service.conversation_states().clone();
    let reader = tokio::spawn(async move { states.get_state(7).await });
    held.loaded().await;

    h.service
        .set_conversation_state(7, "awaiting_amount", json!({"step": 2}), 10)
        .await
        .unwrap();
    held.release();

    let raced = reader.await.unwrap().unwrap().unwrap();
    assert_eq!(raced.state_tag, "awaiting_token");

    let state = h.service.get_conversation_state(7).await.unwrap().unwrap();
    assert_eq!(state.state_tag, "awaiting_amount");
    assert_eq!(state.payload["step"], 2);
}

#[tokio::test]
async fn test_zero_ttl_is_a_validation_error() {
    let h = Harness::new();
    let err = h
        .service
        .set_conversation_state(7, "awaiting_amount", json!({}), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, SettingsError::Validation(_)));
}

#[tokio::test]
async fn test_default_ttl_and_clear() {
    let h = Harness::new();
    h.service
        .set_conversation_state_default_ttl(3, "awaiting_token", json!({"chain": "base"}))
        .await
        .unwrap();

    let row = h.durable.conversation_row(3).unwrap();
    assert_eq!(
        row.expires_at - row.created_at,
        ChronoDuration::minutes(i64::from(h.config.conversation.default_ttl_minutes))
    );

    h.service.clear_conversation_state(3).await.unwrap();
    assert!(h.service.get_conversation_state(3).await.unwrap().is_none());
    assert_eq!(h.durable.conversation_row_count(), 0);
}

#[tokio::test]
async fn test_state_served_from_durable_store_while_cache_down() {
    let h = Harness::new();
    h.backend.disconnect();

    h.service
        .set_conversation_state(5, "awaiting_amount", json!({"x": 1}), 5)
        .await
        .unwrap();
    let state = h.service.get_conversation_state(5).await.unwrap().unwrap();
    assert_eq!(state.payload["x"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_removes_expired_rows() {
    let h = Harness::new();
    h.service
        .set_conversation_state(7, "awaiting_amount", json!({}), 1)
        .await
        .unwrap();
    h.service.start_background_tasks();

    h.clock.advance(ChronoDuration::minutes(2));
    tokio::time::advance(h.config.conversation.sweep_interval() + Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(h.durable.conversation_row_count(), 0);
    h.service.shutdown().await;
}
