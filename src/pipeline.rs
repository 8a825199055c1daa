//! Deduplicating ingest pipeline
//!
//! A poller is a single tokio task that walks an explicit state machine:
//!
//! ```text
//! Idle ──Start──▶ Polling ──Tick──▶ Fetching ──FetchSucceeded──▶ Processing
//!                    ▲                 │  │                          │
//!                    └──FetchFailed────┘  └─AuthFailed─▶ Idle        │
//!                    └──────────────ProcessingDone───────────────────┘
//!
//! any ──StopRequested / StorageFailed──▶ Stopped (terminal)
//! ```
//!
//! Operator commands arrive over an mpsc channel, progress goes out over a
//! broadcast channel, and the current state is published on a watch channel.
//! A stop request cancels an in-flight fetch but never interrupts a write:
//! the batch and its cursor are committed together or not at all.

use crate::error::{Result, TalonError};
use crate::filter::{self, FilterConfig};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::session::{Session, SessionManager};
use crate::source::{AlertSource, FetchCursor};
use crate::store::AlertStore;
use crate::types::{Alert, PollCursor, UpsertOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Shortest accepted polling interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted lookback (one year)
pub const MAX_LOOKBACK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Poller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Fetching,
    Processing,
    Stopped,
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInput {
    Start,
    Tick,
    FetchSucceeded,
    FetchFailed,
    AuthFailed,
    StorageFailed,
    ProcessingDone,
    StopRequested,
}

/// Next state for `input` in `state`
///
/// Inputs that have no meaning in the current state leave it unchanged.
/// `Stopped` is terminal.
pub fn transition(state: PollState, input: PollInput) -> PollState {
    use PollInput as I;
    use PollState as S;

    match (state, input) {
        (S::Stopped, _) => S::Stopped,
        (_, I::StopRequested) | (_, I::StorageFailed) => S::Stopped,
        (S::Idle, I::Start) => S::Polling,
        (S::Polling, I::Tick) => S::Fetching,
        (S::Fetching, I::FetchSucceeded) => S::Processing,
        (S::Fetching, I::FetchFailed) => S::Polling,
        (S::Fetching, I::AuthFailed) => S::Idle,
        (S::Processing, I::ProcessingDone) => S::Polling,
        (s, _) => s,
    }
}

/// Commands accepted by a running poller
#[derive(Debug, Clone)]
pub enum PollerCommand {
    Stop,
    SetFilter(FilterConfig),
    SetInterval(Duration),
}

/// Summary of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Lower bound the cycle fetched from
    pub since: DateTime<Utc>,
    /// Distinct alerts fetched
    pub fetched: usize,
    /// Alerts that passed the filter
    pub matched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Cursor watermark after the cycle
    pub watermark: Option<DateTime<Utc>>,
}

/// Poller events for display and monitoring
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// Poller task started
    Started {
        profile_id: String,
        since: DateTime<Utc>,
    },
    StateChanged {
        from: PollState,
        to: PollState,
    },
    /// New or changed alerts of one cycle that passed the filter and were
    /// stored, oldest first
    Alerts(Vec<(Alert, UpsertOutcome)>),
    CycleCompleted(CycleReport),
    /// Fetch failed; the poller keeps going
    CycleFailed {
        error: String,
    },
    /// A fetch is being retried after a retryable error
    Retrying {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Credentials were rejected; the poller returned to idle
    AuthFailed {
        error: String,
    },
    /// The store rejected a batch; the poller stopped
    StorageFailed {
        error: String,
    },
    /// Poller task exited
    Finished {
        state: PollState,
    },
}

/// Per-run poller settings
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    /// How far before the cursor the first fetch of a run reaches back
    pub lookback: Duration,
    pub filter: FilterConfig,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            lookback: Duration::from_secs(10 * 60),
            filter: FilterConfig::default(),
        }
    }
}

impl PollerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_INTERVAL {
            return Err(TalonError::validation(
                "polling interval",
                format!("must be at least {}s", MIN_INTERVAL.as_secs()),
            ));
        }
        if self.lookback > MAX_LOOKBACK {
            return Err(TalonError::validation(
                "lookback",
                format!("must be at most {} minutes", MAX_LOOKBACK.as_secs() / 60),
            ));
        }
        self.filter.validate()
    }
}

/// Fetch, filter, and persist alerts for one profile
pub struct IngestPipeline {
    source: Arc<dyn AlertSource>,
    store: Arc<dyn AlertStore>,
    sessions: Arc<SessionManager>,
    retry: RetryPolicy,
    events: broadcast::Sender<PollerEvent>,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn AlertSource>,
        store: Arc<dyn AlertStore>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            source,
            store,
            sessions,
            retry: RetryPolicy::default(),
            events,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribe to poller events
    pub fn subscribe(&self) -> broadcast::Receiver<PollerEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Lower bound for the first fetch of a run, and the persisted watermark
    ///
    /// The first fetch reaches `lookback` before the watermark, or before now
    /// when the profile has never been polled.
    pub async fn starting_point(
        &self,
        profile_id: &str,
        lookback: Duration,
    ) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        let watermark = self
            .store
            .load_cursor(profile_id)
            .await?
            .map(|c| c.watermark);
        let since = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|delta| watermark.unwrap_or_else(Utc::now).checked_sub_signed(delta))
            .ok_or_else(|| TalonError::validation("lookback", "out of range"))?;
        Ok((since, watermark))
    }

    /// Fetch every page of alerts created at or after `since`
    ///
    /// Refreshes the session before each page and retries each page under
    /// the pipeline's retry policy.
    pub async fn fetch_since(
        &self,
        session: &mut Session,
        since: DateTime<Utc>,
        hint: &FilterConfig,
    ) -> Result<Vec<Alert>> {
        let mut cursor = FetchCursor::starting_at(since);
        let mut alerts = Vec::new();
        let mut pages = 0usize;

        loop {
            *session = self.sessions.ensure_valid(session.clone()).await?;
            let current: &Session = session;

            let page = retry_with_backoff(
                &self.retry,
                || self.source.fetch_page(current, &cursor, hint),
                |attempt, delay, err| {
                    tracing::warn!(
                        source = self.source.name(),
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Fetch failed, backing off"
                    );
                    let _ = self.events.send(PollerEvent::Retrying {
                        attempt,
                        delay,
                        error: err.to_string(),
                    });
                },
            )
            .await?;

            pages += 1;
            let next = cursor.next(&page);
            alerts.extend(page.alerts);
            match next {
                Some(c) => cursor = c,
                None => break,
            }
        }

        tracing::debug!(since = %since, pages, fetched = alerts.len(), "Fetch complete");
        Ok(alerts)
    }

    /// Filter a fetched batch, persist it, and advance the cursor atomically
    ///
    /// The new watermark is the latest timestamp among all fetched alerts,
    /// matching or not, and never moves backwards from `previous`. Only
    /// inserted or updated alerts are announced.
    pub async fn process(
        &self,
        profile_id: &str,
        since: DateTime<Utc>,
        fetched: Vec<Alert>,
        filter: &FilterConfig,
        previous: Option<DateTime<Utc>>,
    ) -> Result<CycleReport> {
        let fetched = dedup_latest(fetched);
        let mut report = CycleReport {
            since,
            fetched: fetched.len(),
            matched: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            watermark: previous,
        };
        let Some(latest) = fetched.iter().map(|a| a.timestamp).max() else {
            return Ok(report);
        };
        let watermark = previous.map_or(latest, |p| p.max(latest));

        let mut matched: Vec<Alert> = fetched
            .into_iter()
            .filter(|a| filter::matches(a, filter))
            .collect();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        report.matched = matched.len();

        let cursor = PollCursor::new(profile_id, watermark);
        let outcomes = self.store.ingest(&matched, Some(&cursor)).await?;
        report.watermark = Some(watermark);

        let mut announced = Vec::new();
        for (alert, outcome) in matched.into_iter().zip(outcomes) {
            match outcome {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => {
                    report.unchanged += 1;
                    continue;
                }
            }
            announced.push((alert, outcome));
        }
        if !announced.is_empty() {
            let _ = self.events.send(PollerEvent::Alerts(announced));
        }

        Ok(report)
    }

    /// Start a poller task for `session`
    pub fn spawn(self: &Arc<Self>, session: Session, settings: PollerSettings) -> Result<PollerHandle> {
        settings.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(PollState::Idle);
        let poller = PollLoop {
            pipeline: self.clone(),
            session,
            settings,
            cmd_rx,
            state_tx,
            state: PollState::Idle,
        };
        let task = tokio::spawn(poller.run());

        Ok(PollerHandle {
            cmd_tx,
            state_rx,
            task,
        })
    }
}

/// Keep one entry per id, the last one seen winning, in first-seen order
fn dedup_latest(alerts: Vec<Alert>) -> Vec<Alert> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(alerts.len());
    let mut out: Vec<Alert> = Vec::with_capacity(alerts.len());
    for alert in alerts {
        match index.get(&alert.id) {
            Some(&i) => out[i] = alert,
            None => {
                index.insert(alert.id.clone(), out.len());
                out.push(alert);
            }
        }
    }
    out
}

fn ticker(period: Duration, first_at: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(first_at, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Control handle for a running poller
pub struct PollerHandle {
    cmd_tx: mpsc::Sender<PollerCommand>,
    state_rx: watch::Receiver<PollState>,
    task: JoinHandle<PollState>,
}

impl PollerHandle {
    /// Current state
    pub fn state(&self) -> PollState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<PollState> {
        self.state_rx.clone()
    }

    /// Whether the poller task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the poller to stop at its next suspension point
    pub async fn stop(&self) {
        self.send(PollerCommand::Stop).await;
    }

    /// Replace the filter; takes effect from the next cycle
    pub async fn set_filter(&self, filter: FilterConfig) -> Result<()> {
        filter.validate()?;
        self.send(PollerCommand::SetFilter(filter)).await;
        Ok(())
    }

    /// Change the polling interval; the next tick is one full interval away
    pub async fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval < MIN_INTERVAL {
            return Err(TalonError::validation(
                "polling interval",
                format!("must be at least {}s", MIN_INTERVAL.as_secs()),
            ));
        }
        self.send(PollerCommand::SetInterval(interval)).await;
        Ok(())
    }

    /// Wait for the poller task to exit, returning its final state
    pub async fn join(self) -> PollState {
        self.task.await.unwrap_or(PollState::Stopped)
    }

    async fn send(&self, cmd: PollerCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            tracing::debug!("Poller already exited, command dropped");
        }
    }
}

struct PollLoop {
    pipeline: Arc<IngestPipeline>,
    session: Session,
    settings: PollerSettings,
    cmd_rx: mpsc::Receiver<PollerCommand>,
    state_tx: watch::Sender<PollState>,
    state: PollState,
}

impl PollLoop {
    fn apply(&mut self, input: PollInput) {
        let next = transition(self.state, input);
        if next == self.state {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, ?input, "Poller state changed");
        let _ = self.pipeline.events.send(PollerEvent::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
        let _ = self.state_tx.send(next);
    }

    fn configure(&mut self, cmd: PollerCommand, ticker_slot: &mut Interval) {
        match cmd {
            PollerCommand::SetFilter(filter) => {
                tracing::info!(filter = %filter, "Poller filter updated");
                self.settings.filter = filter;
            }
            PollerCommand::SetInterval(period) => {
                tracing::info!(interval_secs = period.as_secs(), "Poller interval updated");
                self.settings.interval = period;
                *ticker_slot = ticker(period, Instant::now() + period);
            }
            PollerCommand::Stop => self.apply(PollInput::StopRequested),
        }
    }

    async fn run(mut self) -> PollState {
        let profile_id = self.session.profile_id.clone();
        let events = self.pipeline.events.clone();

        let (mut since, mut watermark) = match self
            .pipeline
            .starting_point(&profile_id, self.settings.lookback)
            .await
        {
            Ok(start) => start,
            Err(e) => {
                tracing::error!(profile = %profile_id, error = %e, "Failed to load poll cursor");
                let _ = events.send(PollerEvent::StorageFailed {
                    error: e.to_string(),
                });
                self.apply(PollInput::StorageFailed);
                let _ = events.send(PollerEvent::Finished { state: self.state });
                return self.state;
            }
        };

        tracing::info!(profile = %profile_id, since = %since, "Poller started");
        let _ = events.send(PollerEvent::Started {
            profile_id: profile_id.clone(),
            since,
        });
        self.apply(PollInput::Start);

        let mut ticks = ticker(self.settings.interval, Instant::now());
        let mut deferred: Vec<PollerCommand> = Vec::new();

        while self.state == PollState::Polling {
            tokio::select! {
                _ = ticks.tick() => {}
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::Stop) | None => self.apply(PollInput::StopRequested),
                        Some(other) => self.configure(other, &mut ticks),
                    }
                    continue;
                }
            }

            self.apply(PollInput::Tick);
            let filter = self.settings.filter.clone();

            let fetched = {
                let fetch = self.pipeline.fetch_since(&mut self.session, since, &filter);
                tokio::pin!(fetch);
                loop {
                    tokio::select! {
                        res = &mut fetch => break Some(res),
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(PollerCommand::Stop) | None => break None,
                            Some(other) => deferred.push(other),
                        },
                    }
                }
            };

            for cmd in deferred.drain(..) {
                self.configure(cmd, &mut ticks);
            }

            let Some(fetched) = fetched else {
                tracing::info!(profile = %profile_id, "Stop requested during fetch");
                self.apply(PollInput::StopRequested);
                break;
            };

            match fetched {
                Err(e) if e.is_auth() => {
                    tracing::error!(profile = %profile_id, error = %e, "Authentication failed");
                    let _ = events.send(PollerEvent::AuthFailed {
                        error: e.to_string(),
                    });
                    self.apply(PollInput::AuthFailed);
                }
                Err(e) => {
                    tracing::warn!(profile = %profile_id, error = %e, "Fetch cycle failed");
                    let _ = events.send(PollerEvent::CycleFailed {
                        error: e.to_string(),
                    });
                    self.apply(PollInput::FetchFailed);
                }
                Ok(alerts) => {
                    self.apply(PollInput::FetchSucceeded);
                    match self
                        .pipeline
                        .process(&profile_id, since, alerts, &filter, watermark)
                        .await
                    {
                        Ok(report) => {
                            if let Some(w) = report.watermark {
                                since = w;
                                watermark = Some(w);
                            }
                            tracing::debug!(
                                profile = %profile_id,
                                fetched = report.fetched,
                                inserted = report.inserted,
                                updated = report.updated,
                                "Cycle complete"
                            );
                            let _ = events.send(PollerEvent::CycleCompleted(report));
                            self.apply(PollInput::ProcessingDone);
                        }
                        Err(e) => {
                            tracing::error!(profile = %profile_id, error = %e, "Failed to persist batch");
                            let _ = events.send(PollerEvent::StorageFailed {
                                error: e.to_string(),
                            });
                            self.apply(PollInput::StorageFailed);
                        }
                    }
                }
            }
        }

        tracing::info!(profile = %profile_id, state = %self.state, "Poller exited");
        let _ = events.send(PollerEvent::Finished { state: self.state });
        self.state
    }
}
