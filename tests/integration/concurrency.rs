// tests/integration/concurrency.rs
use super::{message, test_config, Arc, Harness};
use async_trait::async_trait;
use chat_digest::config::Config;
use chat_digest::models::internal::{DayKey, Message};
use chat_digest::orchestrator::SummaryOutcome;
use chat_digest::services::summary_provider::{ProviderError, SummaryProvider};
use chat_digest::services::FixedClock;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct SlowProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl SummaryProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate_summary(&self, _: &[Message], _: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("slow summary".to_string())
    }
}

#[tokio::test]
async fn test_concurrent_appends_lose_nothing() {
    let config = Config {
        max_messages_per_partition: 5,
        ..test_config()
    };
    let harness = Arc::new(Harness::new(
        &config,
        Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
        }),
        Arc::new(FixedClock(super::at("2024-07-02 00:00:00"))),
    ));

    let mut handles = vec![];
    for i in 0..20 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let ts = format!("2024-07-01 12:00:{:02}", i);
            harness.store.append(&message(9, i, &ts, "m")).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    let messages = harness.retriever.by_calendar_date(9, date).await;
    assert_eq!(messages.len(), 20);

    let partitions = harness
        .store
        .partitions_for(&DayKey::new(9, date))
        .await
        .unwrap();
    assert_eq!(partitions.len(), 4);
}

#[tokio::test]
async fn test_same_key_generation_is_not_duplicated() {
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
    });
    let harness = Harness::at_fixed_time(&test_config(), provider.clone(), "2024-07-02 09:00:00");
    harness.seed(9, "2024-07-01 10:00:00", 10).await;
    let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();

    let (first, second) = tokio::join!(
        harness.orchestrator.summarize_date(9, date),
        harness.orchestrator.summarize_date(9, date),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.is_generated()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SummaryOutcome::InProgress))
            .count(),
        1
    );
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // The lease is released afterwards.
    let again = harness.orchestrator.summarize_date(9, date).await.unwrap();
    assert!(again.is_generated());
}

#[tokio::test]
async fn test_different_days_run_in_parallel() {
    let provider = Arc::new(SlowProvider {
        calls: AtomicUsize::new(0),
    });
    let harness = Harness::at_fixed_time(&test_config(), provider.clone(), "2024-07-03 09:00:00");
    harness.seed(9, "2024-07-01 10:00:00", 10).await;
    harness.seed(9, "2024-07-02 10:00:00", 10).await;

    let (first, second) = tokio::join!(
        harness
            .orchestrator
            .summarize_date(9, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()),
        harness
            .orchestrator
            .summarize_date(9, NaiveDate::from_ymd_opt(2024, 7, 2).unwrap()),
    );

    assert!(first.unwrap().is_generated());
    assert!(second.unwrap().is_generated());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}
