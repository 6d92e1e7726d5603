//! Tests for telegram module

use super::config::parse_user_ids;
use super::transport::map_request_error;
use super::*;
use teloxide::{ApiError, RequestError};
use termbridge_core::TransportError;

#[test]
fn test_telegram_config() {
    let config = TelegramConfig::new("test_token").with_allowed_users(vec![123, 456]);

    assert_eq!(config.bot_token, "test_token");
    assert_eq!(config.allowed_users, vec![123, 456]);
}

#[test]
fn test_config_debug_hides_token() {
    let config = TelegramConfig::new("123456:secret-token");
    let shown = format!("{:?}", config);
    assert!(!shown.contains("secret-token"));
    assert!(shown.contains("REDACTED"));
}

#[test]
fn test_user_allowed() {
    let config = TelegramConfig::new("token").with_allowed_users(vec![123, 456]);
    let adapter = TelegramAdapter::new(config);

    assert!(adapter.is_user_allowed(123));
    assert!(adapter.is_user_allowed(456));
    assert!(!adapter.is_user_allowed(789));
}

#[test]
fn test_empty_allowlist_allows_all() {
    let config = TelegramConfig::new("token");
    let adapter = TelegramAdapter::new(config);

    assert!(adapter.is_user_allowed(123));
    assert!(adapter.is_user_allowed(999999));
}

#[test]
fn test_parse_user_ids_skips_garbage() {
    assert_eq!(parse_user_ids("1, 2,x,,3 "), vec![1, 2, 3]);
    assert!(parse_user_ids("").is_empty());
}

#[test]
fn test_not_modified_is_distinguished() {
    assert_eq!(
        map_request_error(RequestError::Api(ApiError::MessageNotModified)),
        TransportError::NotModified
    );
    assert!(matches!(
        map_request_error(RequestError::Api(ApiError::MessageToEditNotFound)),
        TransportError::Failed(_)
    ));
}
