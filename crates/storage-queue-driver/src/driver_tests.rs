//! Tests for the driver contract types.

use super::*;
use crate::envelope::{decode_message, RemoteMessage};

fn job(id: &str) -> Job {
    decode_message(RemoteMessage {
        message_id: id.to_string(),
        message_text: Some("{}".to_string()),
        ..Default::default()
    })
}

#[test]
fn test_no_jobs_is_no_delivery() {
    assert!(Delivery::from_jobs(Vec::new()).is_none());
}

#[test]
fn test_one_job_is_single() {
    let delivery = Delivery::from_jobs(vec![job("a")]).unwrap();
    assert!(matches!(delivery, Delivery::Single(ref j) if j.id.as_str() == "a"));
    assert_eq!(delivery.len(), 1);
    assert_eq!(delivery.into_jobs().len(), 1);
}

#[test]
fn test_several_jobs_are_batch_in_order() {
    let delivery = Delivery::from_jobs(vec![job("a"), job("b")]).unwrap();
    assert_eq!(delivery.len(), 2);

    let ids: Vec<_> = delivery
        .into_jobs()
        .into_iter()
        .map(|j| j.id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn test_delivery_serializes_untagged() {
    let single = serde_json::to_value(Delivery::Single(job("a"))).unwrap();
    assert_eq!(single["id"], "a");

    let batch = serde_json::to_value(Delivery::Batch(vec![job("a"), job("b")])).unwrap();
    assert_eq!(batch[1]["id"], "b");
}
