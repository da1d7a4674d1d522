//! Daily summary timer.
//!
//! `start()` only marks the scheduler as enabled; the timer task is created by
//! `start_async()` once a runtime is available. Every cycle re-anchors the next
//! fire time to the calendar, so late wake-ups and long batches never
//! accumulate drift.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::internal::{ConversationId, SummaryArtifact, TIME_FORMAT};
use crate::orchestrator::{format_summary, SummaryError, SummaryOrchestrator, SummaryOutcome};
use crate::services::delivery::SummaryDelivery;
use crate::storage::StorageError;

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub fire_time: NaiveTime,
    pub allowed_conversations: Vec<ConversationId>,
    pub send_to_chat: bool,
    pub report_chat_id: Option<ConversationId>,
    pub inter_conversation_delay: Duration,
    pub error_backoff: Duration,
}

impl ScheduleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.summarization_enabled,
            fire_time: config.fire_time(),
            allowed_conversations: config.allowed_conversations.clone(),
            send_to_chat: config.send_summary_to_chat,
            report_chat_id: config.summary_report_chat_id,
            inter_conversation_delay: config.inter_conversation_delay(),
            error_backoff: config.error_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedConversation {
    pub conversation_id: ConversationId,
    pub error: String,
}

/// What one scheduled batch did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub date: NaiveDate,
    pub active: usize,
    pub generated: usize,
    pub skipped: usize,
    pub in_progress: usize,
    pub failed: Vec<FailedConversation>,
}

impl BatchReport {
    fn new(date: NaiveDate, active: usize) -> Self {
        Self {
            date,
            active,
            generated: 0,
            skipped: 0,
            in_progress: 0,
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub enabled: bool,
    pub provider: String,
    pub auto_summary_time: String,
    pub send_to_chat: bool,
    pub min_messages: usize,
    pub running: bool,
    pub next_fire: Option<String>,
    pub total_summaries: usize,
    pub last_report: Option<BatchReport>,
}

struct RunningTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    next_fire: Option<NaiveDateTime>,
    task: Option<RunningTask>,
    last_report: Option<BatchReport>,
}

enum CycleControl {
    Fired(NaiveDateTime),
    Stop,
}

/// First fire time strictly after `now`, anchored to the calendar.
pub fn next_fire_time(now: NaiveDateTime, fire_time: NaiveTime) -> NaiveDateTime {
    let candidate = now.date().and_time(fire_time);
    if candidate <= now {
        candidate + ChronoDuration::days(1)
    } else {
        candidate
    }
}

struct SchedulerInner {
    orchestrator: Arc<SummaryOrchestrator>,
    delivery: Option<Arc<dyn SummaryDelivery>>,
    settings: ScheduleSettings,
    state: Mutex<SchedulerState>,
}

#[derive(Clone)]
pub struct SummaryScheduler {
    inner: Arc<SchedulerInner>,
}

impl SummaryScheduler {
    pub fn new(
        orchestrator: Arc<SummaryOrchestrator>,
        settings: ScheduleSettings,
        delivery: Option<Arc<dyn SummaryDelivery>>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                orchestrator,
                delivery,
                settings,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Stopped → Running. Does not schedule anything yet.
    pub fn start(&self) {
        let mut state = self.inner.state();
        if state.running {
            return;
        }
        state.running = true;
        tracing::info!("Summary scheduler started");
    }

    /// Spawns the daily timer task. Returns false when the scheduler is not
    /// running, summaries are disabled, or a timer is already outstanding.
    pub async fn start_async(&self) -> bool {
        let mut state = self.inner.state();
        if !state.running {
            return false;
        }
        if !self.inner.settings.enabled {
            tracing::info!("Summarization disabled, daily summary timer not scheduled");
            return false;
        }
        if state
            .task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
        {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(daily_loop(self.inner.clone(), cancel.clone()));
        state.task = Some(RunningTask { handle, cancel });
        tracing::info!("Daily summary timer scheduled");
        true
    }

    /// Running → Stopped. Cancels the timer at its next suspension point and
    /// clears state. Returns the timer task so callers may await it.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let mut state = self.inner.state();
        if !state.running {
            return None;
        }
        tracing::info!("Stopping summary scheduler...");
        state.running = false;
        state.next_fire = None;
        let task = state.task.take()?;
        task.cancel.cancel();
        Some(task.handle)
    }

    pub async fn stop_and_wait(&self) {
        if let Some(handle) = self.stop() {
            if let Err(e) = handle.await {
                tracing::warn!("Summary timer task ended abnormally: {}", e);
            }
        }
        tracing::info!("Summary scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    pub fn has_timer(&self) -> bool {
        self.inner
            .state()
            .task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn next_fire(&self) -> Option<NaiveDateTime> {
        self.inner.state().next_fire
    }

    pub fn last_report(&self) -> Option<BatchReport> {
        self.inner.state().last_report.clone()
    }

    /// Manual trigger; `date` defaults to yesterday.
    pub async fn manual_summary(
        &self,
        conversation_id: ConversationId,
        date: Option<NaiveDate>,
    ) -> Result<SummaryOutcome, SummaryError> {
        let date = date.unwrap_or_else(|| {
            self.inner.orchestrator.clock().now().date() - ChronoDuration::days(1)
        });
        self.inner
            .orchestrator
            .summarize_date(conversation_id, date)
            .await
    }

    /// Rolling-24h summary saved under today's date.
    pub async fn today_summary(
        &self,
        conversation_id: ConversationId,
    ) -> Result<SummaryOutcome, SummaryError> {
        self.inner
            .orchestrator
            .summarize_last_24h(conversation_id)
            .await
    }

    /// Summarizes every active conversation of `date`, one at a time.
    pub async fn run_daily_batch(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, StorageError> {
        self.inner.run_daily_batch(date, cancel).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let total_summaries = match self.inner.orchestrator.archive().count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Failed to count stored summaries: {}", e);
                0
            }
        };
        let state = self.inner.state();
        SchedulerStats {
            enabled: self.inner.settings.enabled,
            provider: self.inner.orchestrator.provider_name().to_string(),
            auto_summary_time: self.inner.settings.fire_time.format("%H:%M").to_string(),
            send_to_chat: self.inner.settings.send_to_chat,
            min_messages: self.inner.orchestrator.min_messages(),
            running: state.running,
            next_fire: state
                .next_fire
                .map(|t| t.format(TIME_FORMAT).to_string()),
            total_summaries,
            last_report: state.last_report.clone(),
        }
    }
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn wait_for_next_fire(
        &self,
        last_fired: Option<NaiveDateTime>,
        cancel: &CancellationToken,
    ) -> CycleControl {
        let now = self.orchestrator.clock().now();
        let mut next = next_fire_time(now, self.settings.fire_time);
        // A wake-up a hair early must not fire the same slot twice.
        if Some(next) == last_fired {
            next += ChronoDuration::days(1);
        }
        self.state().next_fire = Some(next);
        tracing::info!("Next automatic summary at {}", next.format(TIME_FORMAT));

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => CycleControl::Stop,
            _ = tokio::time::sleep(wait) => CycleControl::Fired(next),
        }
    }

    async fn run_daily_batch(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, StorageError> {
        let active = self
            .orchestrator
            .retriever()
            .active_conversations(
                date,
                self.orchestrator.min_messages(),
                &self.settings.allowed_conversations,
            )
            .await?;

        tracing::info!(
            "Starting daily summary for {} ({} active conversations)",
            date,
            active.len()
        );
        let mut report = BatchReport::new(date, active.len());

        for (index, (conversation_id, _)) in active.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Daily summary cancelled after {} conversations", index);
                break;
            }
            // Space out backend calls to stay under provider rate limits.
            if index > 0 && !self.settings.inter_conversation_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.inter_conversation_delay) => {}
                }
            }

            match self.orchestrator.summarize_date(conversation_id, date).await {
                Ok(SummaryOutcome::Generated { artifact, title }) => {
                    report.generated += 1;
                    tracing::info!("Conversation {} summary complete", conversation_id);
                    self.deliver(&artifact, &title).await;
                }
                Ok(SummaryOutcome::Skipped { .. }) => report.skipped += 1,
                Ok(SummaryOutcome::InProgress) => report.in_progress += 1,
                Err(e) => {
                    tracing::error!("Conversation {} summary failed: {}", conversation_id, e);
                    report.failed.push(FailedConversation {
                        conversation_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Daily summary for {} finished: {} generated, {} skipped, {} failed",
            date,
            report.generated,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn deliver(&self, artifact: &SummaryArtifact, title: &str) {
        if !self.settings.send_to_chat {
            return;
        }
        let Some(delivery) = &self.delivery else {
            tracing::warn!("send_summary_to_chat is set but no delivery target is configured");
            return;
        };

        let target = self
            .settings
            .report_chat_id
            .unwrap_or(artifact.conversation_id);
        let text = format_summary(artifact, title);
        match delivery.deliver(target, &text).await {
            Ok(()) if target != artifact.conversation_id => tracing::info!(
                "Summary of {} sent to report conversation {}",
                artifact.conversation_id,
                target
            ),
            Ok(()) => tracing::info!("Summary sent to conversation {}", target),
            Err(e) => tracing::error!(
                "Failed to deliver summary (source conversation {}): {}",
                artifact.conversation_id,
                e
            ),
        }
    }
}

async fn daily_loop(inner: Arc<SchedulerInner>, cancel: CancellationToken) {
    tracing::info!(
        "Daily summary loop started, firing at {}",
        inner.settings.fire_time.format("%H:%M")
    );
    let mut last_fired = None;

    while !cancel.is_cancelled() {
        let fired_at = match inner.wait_for_next_fire(last_fired, &cancel).await {
            CycleControl::Fired(at) => at,
            CycleControl::Stop => break,
        };
        last_fired = Some(fired_at);
        if !inner.state().running {
            break;
        }

        let target = fired_at.date() - ChronoDuration::days(1);
        match inner.run_daily_batch(target, &cancel).await {
            Ok(report) => {
                inner.state().last_report = Some(report);
            }
            Err(e) => {
                tracing::error!(
                    "Daily summary loop error: {}. Retrying in {}s",
                    e,
                    inner.settings.error_backoff.as_secs()
                );
                // The slot that failed is gone; the next one is computed after the backoff.
                inner.state().next_fire = None;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.settings.error_backoff) => {}
                }
            }
        }
    }

    tracing::info!("Daily summary loop exited");
}
