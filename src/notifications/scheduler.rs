//! Periodic reminder dispatch.
//!
//! Ticks are aligned just past each minute boundary. A tick reads the clock in
//! the reference offset, truncates it to the minute, and evaluates every
//! minute since the last evaluated one up to now, each exactly once. For each
//! minute it asks the due matcher for untaken doses and pushes one reminder
//! per medication to its owner's device. A tick that is still running when the
//! next one fires causes that next tick to be skipped, never queued; the
//! following tick picks up the minutes it would have covered.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{stream, StreamExt};
use time::OffsetDateTime;
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::push::{Priority, PushError, PushMessage};
use crate::{
    error::AppResult,
    medications::{
        due::{find_due, DueMedication},
        Medication, TimeOfDay,
    },
    state::AppState,
};

pub const REMINDER_TITLE: &str = "Medication Reminder";
pub const REMINDER_TYPE: &str = "medication_reminder";

/// Longest backlog one tick catches up on after a stall or clock jump.
const MAX_CATCH_UP_MINUTES: i64 = 60;
const BOUNDARY_MARGIN: Duration = Duration::from_secs(1);

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub minutes: usize,
    pub due: usize,
    pub sent: usize,
    pub skipped_no_address: usize,
    pub failed: usize,
}

impl TickReport {
    fn absorb(&mut self, other: TickReport) {
        self.minutes += other.minutes;
        self.due += other.due;
        self.sent += other.sent;
        self.skipped_no_address += other.skipped_no_address;
        self.failed += other.failed;
    }
}

struct Inner {
    state: AppState,
    period: Duration,
    in_progress: AtomicBool,
    skipped: AtomicU64,
    last_evaluated: Mutex<Option<OffsetDateTime>>,
}

fn truncate_to_minute(t: OffsetDateTime) -> OffsetDateTime {
    t - time::Duration::seconds(i64::from(t.second()))
        - time::Duration::nanoseconds(i64::from(t.nanosecond()))
}

/// Minutes still to evaluate, oldest first, given the last evaluated minute
/// and the current one.
fn pending_minutes(last: Option<OffsetDateTime>, now: OffsetDateTime) -> Vec<OffsetDateTime> {
    match last {
        Some(last) if now == last => Vec::new(),
        Some(last) if now > last => {
            let oldest = now - time::Duration::minutes(MAX_CATCH_UP_MINUTES - 1);
            let mut minute = (last + time::Duration::MINUTE).max(oldest);
            let mut out = Vec::new();
            while minute <= now {
                out.push(minute);
                minute += time::Duration::MINUTE;
            }
            out
        }
        // First tick, or the clock moved backwards.
        _ => vec![now],
    }
}

/// Wait until just after the next minute boundary.
fn delay_to_next_minute(now: OffsetDateTime) -> Duration {
    let into_minute = Duration::new(u64::from(now.second()), now.nanosecond());
    Duration::from_secs(60) - into_minute + BOUNDARY_MARGIN
}

#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

/// Clears the in-progress flag when a tick ends, including by panic.
struct TickGuard(Arc<Inner>);

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.0.in_progress.store(false, Ordering::Release);
    }
}

pub fn reminder_message(med: &Medication, address: String) -> PushMessage {
    let data = BTreeMap::from([
        ("medicationId".to_string(), med.id.to_string()),
        ("type".to_string(), REMINDER_TYPE.to_string()),
        ("name".to_string(), med.name.clone()),
        ("dose".to_string(), med.dose.clone()),
    ]);
    PushMessage {
        address,
        title: REMINDER_TITLE.to_string(),
        body: format!("Time to take {}", med.name),
        data,
        priority: Priority::High,
    }
}

impl ReminderScheduler {
    pub fn new(state: AppState) -> Self {
        let period = Duration::from_secs(state.config.scheduler.tick_secs.max(1));
        Self::with_period(state, period)
    }

    pub fn with_period(state: AppState, period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                period,
                in_progress: AtomicBool::new(false),
                skipped: AtomicU64::new(0),
                last_evaluated: Mutex::new(None),
            }),
        }
    }

    /// Ticks dropped because the previous one was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Runs one tick now, then ticks just after every minute boundary until
    /// the returned task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let now = self
                .inner
                .state
                .clock
                .now()
                .to_offset(self.inner.state.config.scheduler.reference_offset);
            let delay = delay_to_next_minute(now);
            info!(
                period_secs = self.inner.period.as_secs(),
                first_aligned_in_ms = delay.as_millis() as u64,
                "reminder scheduler started"
            );

            // Detached; each tick reports its own outcome.
            let _ = self.try_tick();
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + delay, self.inner.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let _ = self.try_tick();
            }
        })
    }

    /// Starts a tick on its own task unless one is already running.
    ///
    /// Returns `None` when the tick was skipped.
    pub fn try_tick(&self) -> Option<JoinHandle<AppResult<TickReport>>> {
        if self
            .inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.inner.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(skipped, "previous reminder tick still running; skipping");
            return None;
        }

        let guard = TickGuard(self.inner.clone());
        let this = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            let res = this.run_tick().await;
            if let Err(e) = &res {
                error!(error = %e, "reminder tick aborted");
            }
            res
        }))
    }

    /// One full tick: every minute not yet evaluated, up to the current one.
    ///
    /// A minute is recorded as evaluated only after its reminders went out, so
    /// a tick aborted by a store failure is retried by the next tick.
    #[instrument(skip(self))]
    pub async fn run_tick(&self) -> AppResult<TickReport> {
        let st = &self.inner.state;
        let now = truncate_to_minute(
            st.clock
                .now()
                .to_offset(st.config.scheduler.reference_offset),
        );

        let mut last_evaluated = self.inner.last_evaluated.lock().await;
        if let Some(last) = *last_evaluated {
            let gap = (now - last).whole_minutes();
            if gap > MAX_CATCH_UP_MINUTES {
                warn!(
                    dropped_minutes = gap - MAX_CATCH_UP_MINUTES,
                    "reminder backlog too old; skipping the oldest minutes"
                );
            }
        }

        let mut report = TickReport::default();
        for minute in pending_minutes(*last_evaluated, now) {
            let date = minute.date();
            let time = TimeOfDay::from(minute.time());
            debug!(%date, %time, "evaluating reminder minute");

            let due = find_due(st, time, date).await?;
            report.absorb(self.dispatch(due).await);
            report.minutes += 1;
            *last_evaluated = Some(minute);
        }

        info!(
            minutes = report.minutes,
            due = report.due,
            sent = report.sent,
            skipped_no_address = report.skipped_no_address,
            failed = report.failed,
            skipped_ticks = self.skipped_ticks(),
            "reminder tick finished"
        );
        Ok(report)
    }

    async fn dispatch(&self, due: Vec<DueMedication>) -> TickReport {
        let st = &self.inner.state;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        let mut messages = Vec::with_capacity(due.len());
        for item in due {
            match item.owner.push_address {
                Some(address) => {
                    messages.push((item.medication.id, reminder_message(&item.medication, address)))
                }
                None => {
                    warn!(
                        medication_id = %item.medication.id,
                        owner_id = %item.owner.id,
                        owner = %item.owner.name,
                        "owner has no push address; skipping reminder"
                    );
                    report.skipped_no_address += 1;
                }
            }
        }

        let concurrency = st.config.scheduler.dispatch_concurrency.max(1);
        let results: Vec<(Uuid, Result<(), PushError>)> = stream::iter(messages)
            .map(|(medication_id, msg)| {
                let push = st.push.clone();
                async move { (medication_id, push.send(&msg).await) }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (medication_id, res) in results {
            match res {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(%medication_id, error = %e, "reminder delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
