use super::{at, test_config, Arc, Harness};
use async_trait::async_trait;
use chat_digest::models::internal::{ConversationId, Message};
use chat_digest::orchestrator::{ScheduleSettings, SummaryScheduler};
use chat_digest::services::summary_provider::{MockProvider, ProviderError, SummaryProvider};
use chat_digest::services::{DeliveryError, SummaryDelivery, TokioClock};
use chat_digest::storage::{BlobStore, MemoryBlobStore, StorageError};
use chrono::NaiveDate;
use mockall::mock;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mock! {
    pub Delivery {}

    #[async_trait]
    impl SummaryDelivery for Delivery {
        async fn deliver(&self, target: ConversationId, text: &str) -> Result<(), DeliveryError>;
    }
}

/// Fails for one conversation, succeeds for every other.
struct FlakyProvider {
    failing: ConversationId,
}

#[async_trait]
impl SummaryProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate_summary(
        &self,
        messages: &[Message],
        _title: &str,
    ) -> Result<String, ProviderError> {
        match messages.first() {
            Some(m) if m.conversation_id == self.failing => {
                Err(ProviderError::Other("backend unavailable".to_string()))
            }
            _ => Ok("fine".to_string()),
        }
    }
}

/// Records when each generation started.
#[derive(Default)]
struct TimedProvider {
    started: Mutex<Vec<Instant>>,
}

#[async_trait]
impl SummaryProvider for TimedProvider {
    fn name(&self) -> &str {
        "timed"
    }

    async fn generate_summary(
        &self,
        _messages: &[Message],
        _title: &str,
    ) -> Result<String, ProviderError> {
        self.started.lock().unwrap().push(Instant::now());
        Ok("timed".to_string())
    }
}

/// A store whose listing always fails, so every batch errors out before any
/// conversation is touched.
#[derive(Default)]
struct UnlistableStore {
    inner: MemoryBlobStore,
}

#[async_trait]
impl BlobStore for UnlistableStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(namespace, key, value).await
    }

    async fn keys(&self, namespace: &str, _prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Io {
            path: PathBuf::from(namespace),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "listing denied"),
        })
    }
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

async fn settle() {
    // Lets the timer task run up to its first sleep.
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_after_fire_time_schedules_tomorrow() {
    let config = test_config();
    let clock = Arc::new(TokioClock::starting_at(at("2024-03-01 23:45:00")));
    let harness = Harness::new(&config, Arc::new(MockProvider::new_success("s")), clock);
    let scheduler = harness.scheduler(&config);

    assert!(!scheduler.start_async().await, "timer needs start() first");
    scheduler.start();
    assert!(scheduler.start_async().await);
    assert!(!scheduler.start_async().await, "only one timer at a time");
    settle().await;

    assert_eq!(scheduler.next_fire(), Some(at("2024-03-02 23:30:00")));
    assert!(scheduler.has_timer());

    scheduler.stop_and_wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_disabled_scheduler_never_arms_timer() {
    let config = chat_digest::config::Config {
        summarization_enabled: false,
        ..test_config()
    };
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(MockProvider::new_success("s")),
        "2024-03-01 12:00:00",
    );
    let scheduler = harness.scheduler(&config);

    scheduler.start();
    assert!(!scheduler.start_async().await);
    assert!(!scheduler.has_timer());
    assert!(scheduler.next_fire().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_and_summarizes_previous_day() {
    let config = test_config();
    let provider = Arc::new(MockProvider::new_success("- daily recap"));
    let clock = Arc::new(TokioClock::starting_at(at("2024-03-02 23:29:00")));
    let harness = Harness::new(&config, provider.clone(), clock);
    harness.seed(1, "2024-03-01 09:00:00", 12).await;
    harness.seed(2, "2024-03-01 09:00:00", 3).await;
    harness.seed(3, "2024-03-02 09:00:00", 12).await;

    let scheduler = harness.scheduler(&config);
    scheduler.start();
    scheduler.start_async().await;

    tokio::time::sleep(Duration::from_secs(120)).await;

    let report = scheduler.last_report().expect("batch should have run");
    assert_eq!(report.date, date("2024-03-01"));
    assert_eq!(report.active, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(provider.calls(), 1);
    assert!(harness.archive.get(1, date("2024-03-01")).await.unwrap().is_some());
    assert!(harness.archive.get(3, date("2024-03-02")).await.unwrap().is_none());

    // Re-anchored to the next calendar day, not 24h after the batch ended.
    assert_eq!(scheduler.next_fire(), Some(at("2024-03-03 23:30:00")));

    scheduler.stop_and_wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_timer() {
    let config = test_config();
    let provider = Arc::new(MockProvider::new_success("s"));
    let clock = Arc::new(TokioClock::starting_at(at("2024-03-02 23:00:00")));
    let harness = Harness::new(&config, provider.clone(), clock);
    harness.seed(1, "2024-03-01 09:00:00", 12).await;

    let scheduler = harness.scheduler(&config);
    scheduler.start();
    scheduler.start_async().await;
    settle().await;
    assert!(scheduler.next_fire().is_some());

    let handle = scheduler.stop().expect("timer task handle");
    handle.await.unwrap();

    assert!(!scheduler.is_running());
    assert!(!scheduler.has_timer());
    assert!(scheduler.next_fire().is_none());

    // Well past the old fire time: nothing ran.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(provider.calls(), 0);
    assert!(scheduler.last_report().is_none());
}

#[tokio::test]
async fn test_batch_isolates_failing_conversation() {
    let config = test_config();
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(FlakyProvider { failing: 2 }),
        "2024-03-02 23:30:00",
    );
    for id in 1..=3 {
        harness.seed(id, "2024-03-01 09:00:00", 10).await;
    }
    let scheduler = harness.scheduler(&config);

    let report = scheduler
        .run_daily_batch(date("2024-03-01"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.active, 3);
    assert_eq!(report.generated, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].conversation_id, 2);
    assert!(harness.archive.get(1, date("2024-03-01")).await.unwrap().is_some());
    assert!(harness.archive.get(2, date("2024-03-01")).await.unwrap().is_none());
    assert!(harness.archive.get(3, date("2024-03-01")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_batch_honours_allow_list() {
    let config = chat_digest::config::Config {
        allowed_conversations: vec![3],
        ..test_config()
    };
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(MockProvider::new_success("s")),
        "2024-03-02 23:30:00",
    );
    for id in 1..=3 {
        harness.seed(id, "2024-03-01 09:00:00", 10).await;
    }

    let report = harness
        .scheduler(&config)
        .run_daily_batch(date("2024-03-01"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.active, 1);
    assert_eq!(harness.archive.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_batch_processes_nothing() {
    let config = test_config();
    let provider = Arc::new(MockProvider::new_success("s"));
    let harness = Harness::at_fixed_time(&config, provider.clone(), "2024-03-02 23:30:00");
    harness.seed(1, "2024-03-01 09:00:00", 10).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = harness
        .scheduler(&config)
        .run_daily_batch(date("2024-03-01"), &cancel)
        .await
        .unwrap();

    assert_eq!(report.active, 1);
    assert_eq!(report.generated, 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_generated_summary_is_delivered_to_report_chat() {
    let config = chat_digest::config::Config {
        send_summary_to_chat: true,
        summary_report_chat_id: Some(-999),
        ..test_config()
    };
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(MockProvider::new_success("- all good")),
        "2024-03-02 23:30:00",
    );
    harness.seed(1, "2024-03-01 09:00:00", 10).await;

    let mut delivery = MockDelivery::new();
    delivery
        .expect_deliver()
        .withf(|target, text| {
            *target == -999 && text.contains("Group 1 - 2024-03-01") && text.contains("- all good")
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let scheduler = SummaryScheduler::new(
        harness.orchestrator.clone(),
        ScheduleSettings::from_config(&config),
        Some(Arc::new(delivery)),
    );
    let report = scheduler
        .run_daily_batch(date("2024-03-01"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.generated, 1);
}

#[tokio::test]
async fn test_delivery_failure_does_not_fail_batch() {
    let config = chat_digest::config::Config {
        send_summary_to_chat: true,
        ..test_config()
    };
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(MockProvider::new_success("s")),
        "2024-03-02 23:30:00",
    );
    harness.seed(5, "2024-03-01 09:00:00", 10).await;

    let mut delivery = MockDelivery::new();
    delivery
        .expect_deliver()
        .withf(|target, _| *target == 5)
        .times(1)
        .returning(|_, _| {
            Err(DeliveryError::Rejected {
                status: 403,
                message: "bot was kicked".to_string(),
            })
        });

    let scheduler = SummaryScheduler::new(
        harness.orchestrator.clone(),
        ScheduleSettings::from_config(&config),
        Some(Arc::new(delivery)),
    );
    let report = scheduler
        .run_daily_batch(date("2024-03-01"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.generated, 1);
    assert!(report.failed.is_empty());
    assert!(harness.archive.get(5, date("2024-03-01")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_manual_summary_defaults_to_yesterday() {
    let config = test_config();
    let harness = Harness::at_fixed_time(
        &config,
        Arc::new(MockProvider::new_success("s")),
        "2024-03-02 10:00:00",
    );
    harness.seed(1, "2024-03-01 09:00:00", 10).await;

    let outcome = harness.scheduler(&config).manual_summary(1, None).await.unwrap();
    assert_eq!(outcome.artifact().unwrap().date, date("2024-03-01"));
}

#[tokio::test(start_paused = true)]
async fn test_loop_error_backs_off_then_reanchors() {
    let config = chat_digest::config::Config {
        error_backoff_secs: 600,
        ..test_config()
    };
    let provider = Arc::new(MockProvider::new_success("s"));
    let clock = Arc::new(TokioClock::starting_at(at("2024-03-02 23:29:00")));
    let harness = Harness::with_blobs(
        &config,
        provider.clone(),
        clock,
        Arc::new(UnlistableStore::default()),
    );

    let scheduler = harness.scheduler(&config);
    scheduler.start();
    scheduler.start_async().await;
    settle().await;
    assert_eq!(scheduler.next_fire(), Some(at("2024-03-02 23:30:00")));

    // The batch fails at 23:30 and the loop is backing off.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(scheduler.has_timer());
    assert!(scheduler.is_running());
    assert!(scheduler.next_fire().is_none());
    assert!(scheduler.last_report().is_none());

    // After the backoff the loop waits for the next calendar slot.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(scheduler.has_timer());
    assert_eq!(scheduler.next_fire(), Some(at("2024-03-03 23:30:00")));
    assert_eq!(provider.calls(), 0);

    scheduler.stop_and_wait().await;
    assert!(!scheduler.has_timer());
}

#[tokio::test(start_paused = true)]
async fn test_batch_spaces_conversations_by_delay() {
    let config = chat_digest::config::Config {
        inter_conversation_delay_secs: 30,
        ..test_config()
    };
    let provider = Arc::new(TimedProvider::default());
    let harness = Harness::at_fixed_time(&config, provider.clone(), "2024-03-02 23:30:00");
    for id in 1..=3 {
        harness.seed(id, "2024-03-01 09:00:00", 10).await;
    }

    let started = Instant::now();
    let report = harness
        .scheduler(&config)
        .run_daily_batch(date("2024-03-01"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.generated, 3);

    let calls = provider.started.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    // No pause before the first conversation.
    assert!(calls[0] - started < Duration::from_secs(1));
    for pair in calls.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_secs(30) && gap < Duration::from_secs(31),
            "gap was {:?}",
            gap
        );
    }
}
