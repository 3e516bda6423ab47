//! Attendance monitor: the fixed-interval sampling loop.
//!
//! Each tick grabs a frame, analyzes it, matches every face against the
//! enrolled profile and feeds the aggregate into [`policy::advance`]. Frame
//! and analyzer failures never stop the loop; they count as an empty tick.

use crate::capability::{
    AnalyzerError, DetectOptions, FaceAnalyzer, FrameSource, Notifier, SourceError,
};
use crate::matcher::FaceMatcher;
use crate::policy::{self, AlertMode, MonitorState, TickOutcome};
use crate::types::{BoundingBox, EnrolledProfile, ExpressionScores, MatchResult, Observation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

/// Alert raised while the miss streak is above the threshold.
pub const ABSENCE_ALERT: &str = "Absence limit exceeded, please leave the room";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("sample interval must be greater than zero")]
    ZeroSampleInterval,
    #[error("miss threshold must be greater than zero")]
    ZeroMissThreshold,
    #[error("match distance threshold must be in (0, 1], got {0}")]
    DistanceThreshold(f32),
    #[error("tick timeout must be greater than zero")]
    ZeroTickTimeout,
}

#[derive(Error, Debug)]
pub enum TickFailure {
    #[error("frame source: {0}")]
    Source(#[from] SourceError),
    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("monitor task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between ticks.
    pub sample_interval: Duration,
    /// Streak length that may be reached without alerting; one more miss alerts.
    pub miss_threshold: u32,
    /// Faces strictly closer than this to a reference embedding match.
    pub match_distance_threshold: f32,
    /// Upper bound on one tick's frame + analysis calls.
    pub tick_timeout: Duration,
    pub alert_mode: AlertMode,
    /// Display duration passed to the notifier.
    pub notify_duration: Duration,
    pub detect_options: DetectOptions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(5000),
            miss_threshold: 10,
            match_distance_threshold: 0.7,
            tick_timeout: Duration::from_millis(4000),
            alert_mode: AlertMode::Level,
            notify_duration: Duration::from_millis(2000),
            detect_options: DetectOptions::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.miss_threshold == 0 {
            return Err(ConfigError::ZeroMissThreshold);
        }
        let t = self.match_distance_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(ConfigError::DistanceThreshold(t));
        }
        if self.tick_timeout.is_zero() {
            return Err(ConfigError::ZeroTickTimeout);
        }
        Ok(())
    }
}

/// A face region with its match, for whoever draws overlays.
#[derive(Debug, Clone, Serialize)]
pub struct LabeledRegion {
    pub region: BoundingBox,
    pub result: MatchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<ExpressionScores>,
}

/// What happened on one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub outcome: TickOutcome,
    pub miss_streak: u32,
    /// Whether the absence alert was raised on this tick.
    pub alert: bool,
    pub regions: Vec<LabeledRegion>,
    /// Set when the tick's frame or analysis failed (counted as no face).
    pub failure: Option<String>,
}

/// Latest monitor state, published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub session: Uuid,
    pub label: String,
    pub state: MonitorState,
    pub phase: policy::MonitorPhase,
    pub last_report: Option<TickReport>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl MonitorSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

pub struct AttendanceMonitor {
    session: Uuid,
    config: MonitorConfig,
    matcher: FaceMatcher,
    source: Arc<dyn FrameSource>,
    analyzer: Arc<dyn FaceAnalyzer>,
    notifier: Arc<dyn Notifier>,
    state: MonitorState,
}

impl AttendanceMonitor {
    pub fn new(
        config: MonitorConfig,
        profile: &EnrolledProfile,
        source: Arc<dyn FrameSource>,
        analyzer: Arc<dyn FaceAnalyzer>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if profile.is_empty() {
            tracing::warn!(
                label = %profile.label,
                "enrolled profile has no embeddings; every tick will count as a miss"
            );
        }
        Ok(Self {
            session: Uuid::new_v4(),
            matcher: FaceMatcher::new(profile, config.match_distance_threshold),
            config,
            source,
            analyzer,
            notifier,
            state: MonitorState::default(),
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn snapshot(&self, last_report: Option<TickReport>) -> MonitorSnapshot {
        MonitorSnapshot {
            session: self.session,
            label: self.matcher.label().to_string(),
            state: self.state,
            phase: self.state.phase(),
            last_tick_at: last_report.as_ref().map(|_| Utc::now()),
            last_report,
        }
    }

    /// Run a single tick: observe, match, decide, notify.
    pub async fn tick(&mut self) -> TickReport {
        let tick = self.state.ticks + 1;

        let (observations, failure) =
            match time::timeout(self.config.tick_timeout, self.observe()).await {
                Ok(Ok(observations)) => (observations, None),
                Ok(Err(err)) => {
                    tracing::warn!(tick, error = %err, "tick failed; counting as no face");
                    (Vec::new(), Some(err))
                }
                Err(_) => {
                    let err = TickFailure::TimedOut(self.config.tick_timeout);
                    tracing::warn!(tick, error = %err, "tick timed out; counting as no face");
                    (Vec::new(), Some(err))
                }
            };

        let regions: Vec<LabeledRegion> = observations
            .into_iter()
            .map(|observation| LabeledRegion {
                result: self.matcher.best_match(&observation.embedding),
                region: observation.region,
                expressions: observation.expressions,
            })
            .collect();

        let outcome = policy::assess(regions.iter().map(|r| &r.result), self.matcher.label());
        let (state, alert) = policy::advance(
            self.state,
            &outcome,
            self.config.miss_threshold,
            self.config.alert_mode,
        );
        self.state = state;

        tracing::debug!(
            tick,
            faces = regions.len(),
            outcome = ?outcome,
            miss_streak = state.miss_streak,
            "tick complete"
        );

        self.notifier
            .notify(&outcome.notice(), self.config.notify_duration);
        if alert {
            tracing::warn!(
                tick,
                miss_streak = state.miss_streak,
                miss_threshold = self.config.miss_threshold,
                "absence threshold exceeded"
            );
            self.notifier.notify(ABSENCE_ALERT, self.config.notify_duration);
        }

        TickReport {
            tick,
            outcome,
            miss_streak: state.miss_streak,
            alert,
            regions,
            failure: failure.map(|e| e.to_string()),
        }
    }

    async fn observe(&self) -> Result<Vec<Observation>, TickFailure> {
        let frame = self.source.current_frame().await?;
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "dark frame, skipping analysis");
            return Ok(Vec::new());
        }
        let faces = self
            .analyzer
            .detect_faces(&frame, &self.config.detect_options)
            .await?;
        Ok(faces.into_iter().map(Observation::from).collect())
    }

    /// Start the sampling loop on the tokio runtime.
    ///
    /// The first tick fires one interval after the call. The loop runs until
    /// [`MonitorHandle::stop`] is called or every stop handle is dropped.
    pub fn spawn(self) -> MonitorHandle {
        let (stopper, stop_rx) = Stopper::pair();
        let (snapshot_tx, snapshot_rx) = watch::channel(self.snapshot(None));
        let span = tracing::info_span!("monitor", session = %self.session);
        let task = tokio::spawn(self.run(stop_rx, snapshot_tx).instrument(span));

        MonitorHandle {
            stopper,
            snapshots: snapshot_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut stop: watch::Receiver<bool>,
        snapshots: watch::Sender<MonitorSnapshot>,
    ) -> MonitorState {
        let period = self.config.sample_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            label = %self.matcher.label(),
            interval_ms = period.as_millis() as u64,
            miss_threshold = self.config.miss_threshold,
            "monitor started"
        );

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    snapshots.send_replace(self.snapshot(Some(report)));
                }
            }
        }

        tracing::info!(
            ticks = self.state.ticks,
            miss_streak = self.state.miss_streak,
            "monitor stopped"
        );
        self.state
    }
}

/// Cloneable stop switch for a running monitor.
#[derive(Clone)]
pub struct Stopper(Arc<watch::Sender<bool>>);

impl Stopper {
    /// A fresh switch plus the receiver the loop watches.
    pub fn pair() -> (Stopper, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Stopper(Arc::new(tx)), rx)
    }

    /// Ask the monitor to stop. A tick in progress finishes first.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to a spawned [`AttendanceMonitor`].
pub struct MonitorHandle {
    stopper: Stopper,
    snapshots: watch::Receiver<MonitorSnapshot>,
    task: JoinHandle<MonitorState>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the loop to exit and return its final state.
    pub async fn join(self) -> Result<MonitorState, MonitorError> {
        let MonitorHandle { stopper, task, .. } = self;
        let result = task.await;
        drop(stopper);
        result.map_err(|e| MonitorError::TaskFailed(e.to_string()))
    }
}
