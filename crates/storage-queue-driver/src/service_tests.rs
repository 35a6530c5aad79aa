//! Tests for the capability interface types.

use super::*;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("azurequeue".to_string()).is_ok());
    assert!(QueueName::new("jobs-2024".to_string()).is_ok());
    assert!(QueueName::new("123".to_string()).is_ok());
    assert!(QueueName::new("a".repeat(63)).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("ab".to_string()).is_err());
    assert!(QueueName::new("a".repeat(64)).is_err());
    assert!(QueueName::new("UpperCase".to_string()).is_err());
    assert!(QueueName::new("under_score".to_string()).is_err());
    assert!(QueueName::new("-leading-hyphen".to_string()).is_err());
    assert!(QueueName::new("trailing-hyphen-".to_string()).is_err());
    assert!(QueueName::new("double--hyphen".to_string()).is_err());
}

#[test]
fn test_queue_name_from_str() {
    let name: QueueName = "orders".parse().unwrap();
    assert_eq!(name.as_str(), "orders");
    assert_eq!(name.to_string(), "orders");
    assert!("Orders".parse::<QueueName>().is_err());
}

#[test]
fn test_store_options_builder() {
    let run_at = Utc::now() + Duration::minutes(5);
    let options = StoreOptions::new()
        .with_run_at_time(run_at)
        .with_time_to_live(Duration::hours(1));

    assert_eq!(options.run_at, Some(run_at.timestamp_millis()));
    assert_eq!(options.time_to_live, Some(Duration::hours(1)));
    assert_eq!(options.request, RequestOptions::default());
}

#[test]
fn test_receive_options_builder() {
    let options = ReceiveOptions::new()
        .with_number_of_messages(5)
        .with_visibility_timeout(Duration::seconds(60))
        .with_timeout(Duration::seconds(2));

    assert_eq!(options.number_of_messages, Some(5));
    assert_eq!(options.visibility_timeout, Some(Duration::seconds(60)));
    assert_eq!(options.request.timeout, Some(Duration::seconds(2)));
}

#[test]
fn test_list_and_create_options_builders() {
    let options = ListQueuesOptions::new()
        .with_prefix("jobs")
        .with_metadata()
        .with_page_size(10);
    assert_eq!(options.prefix.as_deref(), Some("jobs"));
    assert!(options.include_metadata);
    assert_eq!(options.page_size, Some(10));

    let options = CreateQueueOptions::new().with_metadata("owner", "billing");
    assert_eq!(options.metadata.get("owner").map(String::as_str), Some("billing"));
}

#[test]
fn test_message_update_builder_encodes_payload() {
    let update = MessageUpdate::new()
        .with_payload(&Payload::from(serde_json::json!({"step": 2})))
        .unwrap()
        .with_visibility_timeout(Duration::seconds(10));

    assert_eq!(update.message_text.as_deref(), Some(r#"{"step":2}"#));
    assert_eq!(update.visibility_timeout, Some(Duration::seconds(10)));
}
