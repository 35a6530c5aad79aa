//! Tests for the storage queue driver.

use super::*;
use crate::config::StorageConfig;
use crate::transport::{MemoryConnector, MemoryQueueService};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Test Connectors
// ============================================================================

/// Memory connector that counts connect calls
#[derive(Debug, Default)]
struct CountingConnector {
    inner: MemoryConnector,
    connects: AtomicUsize,
}

impl CountingConnector {
    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ServiceConnector for CountingConnector {
    fn connect(&self) -> Result<Arc<dyn QueueService>, DriverError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect()
    }
}

/// Connector that always fails with a configuration error
#[derive(Debug, Default)]
struct FailingConnector {
    attempts: AtomicUsize,
}

impl ServiceConnector for FailingConnector {
    fn connect(&self) -> Result<Arc<dyn QueueService>, DriverError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ConfigurationError::Missing {
            key: "accountName".to_string(),
        }
        .into())
    }
}

fn config(name: &str) -> DriverConfig {
    DriverConfig::new(name, StorageConfig::default())
}

fn memory_driver(name: &str) -> StorageQueueDriver {
    StorageQueueDriver::with_connector(config(name), Arc::new(MemoryConnector::new()))
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_construction_does_not_connect() {
        let connector = Arc::new(CountingConnector::default());
        let _driver = StorageQueueDriver::with_connector(config("orders"), connector.clone());
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_connect_once() {
        let connector = Arc::new(CountingConnector::default());
        let driver = Arc::new(StorageQueueDriver::with_connector(
            config("orders"),
            connector.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let driver = Arc::clone(&driver);
            handles.push(tokio::spawn(async move {
                driver.get_next(&ReceiveOptions::new()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_none());
        }

        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_first_use_creates_missing_queue() {
        let service = MemoryQueueService::new();
        let driver = StorageQueueDriver::with_connector(
            config("orders"),
            Arc::new(MemoryConnector::with_service(service.clone())),
        );

        let properties = driver
            .queue_properties(&RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(properties.approximate_message_count, 0);

        let listed = service
            .list_queues_segment(&ListQueuesOptions::new(), None)
            .await
            .unwrap();
        assert_eq!(listed.queues[0].name, "orders");
    }

    #[tokio::test]
    async fn test_close_keeps_service_and_rebuilds_queue_handle() {
        let connector = Arc::new(CountingConnector::default());
        let driver = StorageQueueDriver::with_connector(config("orders"), connector.clone());

        driver
            .store(Payload::from("first"), &StoreOptions::new())
            .await
            .unwrap();
        driver.close().await;
        driver.close().await;

        let delivery = driver.get_next(&ReceiveOptions::new()).await.unwrap();
        assert!(delivery.is_some());
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_cached() {
        let connector = Arc::new(FailingConnector::default());
        let driver = StorageQueueDriver::with_connector(config("orders"), connector.clone());

        for _ in 0..2 {
            let error = driver.clear(&RequestOptions::default()).await.unwrap_err();
            assert!(matches!(error, DriverError::Configuration(_)));
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queue_handle_addresses_configured_queue() {
        let driver = memory_driver("orders");

        let first = driver.queue_client().await.unwrap();
        assert_eq!(first.queue_name().as_str(), "orders");

        let cached = driver.queue_client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        driver.close().await;
        let rebuilt = driver.queue_client().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.queue_name(), first.queue_name());
    }

    #[tokio::test]
    async fn test_invalid_configured_name_is_configuration_error() {
        let driver = memory_driver("Not_A_Queue");
        let error = driver.clear(&RequestOptions::default()).await.unwrap_err();
        assert!(matches!(
            error,
            DriverError::Configuration(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_process_is_not_implemented() {
        let driver = memory_driver("orders");
        let handler: JobHandler = Arc::new(|_job| {});

        let error = driver.process(handler).unwrap_err();
        assert!(matches!(
            error,
            DriverError::NotImplemented {
                operation: "process"
            }
        ));
        assert_eq!(driver.name(), "orders");
    }
}

// ============================================================================
// Message Operation Tests
// ============================================================================

mod operations {
    use super::*;

    #[tokio::test]
    async fn test_store_then_receive_structured_payload() {
        let driver = memory_driver("orders");

        let stored = driver
            .store(Payload::from(json!({"order": 42})), &StoreOptions::new())
            .await
            .unwrap();
        assert!(stored.receipt.is_some());
        assert!(!stored.delayed);

        let delivery = driver.get_next(&ReceiveOptions::new()).await.unwrap();
        let job = match delivery {
            Some(Delivery::Single(job)) => job,
            other => panic!("expected single job, got {:?}", other),
        };
        assert_eq!(job.id, stored.id);
        assert_eq!(job.payload, Some(Payload::Json(json!({"order": 42}))));
        assert_eq!(job.dequeue_count, Some(1));
    }

    #[tokio::test]
    async fn test_past_run_at_is_stored_immediately_visible() {
        let driver = memory_driver("orders");
        let options = StoreOptions::new().with_run_at(Utc::now().timestamp_millis() - 60_000);

        let stored = driver.store(Payload::from("late"), &options).await.unwrap();
        assert!(!stored.delayed);

        let peeked = driver.peek_next(&PeekOptions::new()).await.unwrap();
        assert!(peeked.is_some());
    }

    #[tokio::test]
    async fn test_future_run_at_delays_message() {
        let driver = memory_driver("orders");
        let run_at = Utc::now() + Duration::minutes(5);

        let stored = driver
            .store(Payload::from("later"), &StoreOptions::new().with_run_at_time(run_at))
            .await
            .unwrap();

        assert!(stored.delayed);
        assert!((stored.run_at - run_at.timestamp_millis()).abs() < 1_000);
        assert!(driver
            .get_next(&ReceiveOptions::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_receive_returns_batch() {
        let driver = memory_driver("orders");
        for n in 0..3 {
            driver
                .store(Payload::from(json!({ "n": n })), &StoreOptions::new())
                .await
                .unwrap();
        }

        let delivery = driver
            .get_next(&ReceiveOptions::new().with_number_of_messages(5))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(delivery, Delivery::Batch(ref jobs) if jobs.len() == 3));
    }

    #[tokio::test]
    async fn test_peek_never_carries_receipt() {
        let driver = memory_driver("orders");
        driver
            .store(Payload::from("look"), &StoreOptions::new())
            .await
            .unwrap();

        let jobs = driver
            .peek_next(&PeekOptions::new())
            .await
            .unwrap()
            .unwrap()
            .into_jobs();
        assert!(jobs.iter().all(|job| job.receipt.is_none()));
    }

    #[tokio::test]
    async fn test_update_then_remove_with_new_receipt() {
        let driver = memory_driver("orders");
        driver
            .store(Payload::from("draft"), &StoreOptions::new())
            .await
            .unwrap();
        let job = driver
            .get_next(&ReceiveOptions::new())
            .await
            .unwrap()
            .unwrap()
            .into_jobs()
            .remove(0);
        let receipt = job.receipt.clone().unwrap();

        let update = MessageUpdate::new()
            .with_payload(&Payload::from(json!({"status": "done"})))
            .unwrap()
            .with_visibility_timeout(Duration::seconds(30));
        let updated = driver
            .update(&job.id, &receipt, update, &RequestOptions::default())
            .await
            .unwrap();

        let stale = driver
            .remove(&job.id, &receipt, &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(stale.service_code(), Some("PopReceiptMismatch"));

        driver
            .remove(&job.id, &updated.receipt, &RequestOptions::default())
            .await
            .unwrap();
        let properties = driver
            .queue_properties(&RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(properties.approximate_message_count, 0);
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let driver = memory_driver("orders");
        for _ in 0..2 {
            driver
                .store(Payload::from("x"), &StoreOptions::new())
                .await
                .unwrap();
        }

        driver.clear(&RequestOptions::default()).await.unwrap();
        driver.clear(&RequestOptions::default()).await.unwrap();
        assert!(driver
            .peek_next(&PeekOptions::new())
            .await
            .unwrap()
            .is_none());
    }
}

// ============================================================================
// Account Operation Tests
// ============================================================================

mod account {
    use super::*;

    #[tokio::test]
    async fn test_list_queues_follows_markers() {
        let driver = memory_driver("orders");
        for name in ["jobs-a", "jobs-b", "jobs-c"] {
            driver
                .create_queue(name, &CreateQueueOptions::new())
                .await
                .unwrap();
        }

        let queues = driver
            .list_queues(&ListQueuesOptions::new().with_prefix("jobs").with_page_size(1))
            .await
            .unwrap();
        let names: Vec<_> = queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["jobs-a", "jobs-b", "jobs-c"]);
    }

    #[tokio::test]
    async fn test_create_queue_validates_name() {
        let driver = memory_driver("orders");
        let error = driver
            .create_queue("Bad_Name", &CreateQueueOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(error, DriverError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_queue_is_remote_error() {
        let driver = memory_driver("orders");
        let error = driver
            .delete_queue("ghost", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.service_code(), Some("QueueNotFound"));
    }
}

// ============================================================================
// Deadline Tests
// ============================================================================

mod deadlines {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let options = RequestOptions::new().with_timeout(Duration::milliseconds(10));
        let result: Result<(), DriverError> = bounded("slow", &options, async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        match result {
            Err(DriverError::RemoteService(RemoteServiceError::Timeout { operation, .. })) => {
                assert_eq!(operation, "slow")
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let options = RequestOptions::new().with_timeout(Duration::seconds(5));
        let result = bounded("fast", &options, async { Ok::<_, DriverError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
