//! Cooldown-gated person notifier.
//!
//! The notifier is a two-state machine:
//!
//! - `Armed`: no successful notification within the cooldown window. The
//!   first qualifying detection in a batch triggers one delivery attempt.
//! - `Cooling`: a notification succeeded less than `cooldown` ago. Batches
//!   are dropped without looking at their detections.
//!
//! Only a successful delivery moves the notifier to `Cooling`. A failed
//! attempt leaves it `Armed`, so the next qualifying batch tries again.

use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::detection::DetectionBatch;
use crate::sink::NotificationSink;

/// Gate parameters, fixed for the lifetime of a notifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NotifierSettings {
    /// Minimum spacing between successful notifications.
    pub cooldown: Duration,
    /// Bounding-box area a person must exceed.
    pub area_threshold: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifierState {
    Armed,
    Cooling,
}

/// What a single batch led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Dropped by the cooldown gate; detections were not inspected.
    CoolingDown,
    /// No detection qualified.
    NoMatch,
    /// One notification was delivered.
    Delivered,
    /// The delivery attempt failed; cooldown not consumed.
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifierStats {
    pub batches_seen: u64,
    pub batches_gated: u64,
    pub dispatch_attempts: u64,
    pub dispatch_failures: u64,
    pub notifications_delivered: u64,
}

pub struct Notifier<S, C> {
    settings: NotifierSettings,
    sink: S,
    clock: C,
    last_success: Option<Instant>,
    stats: NotifierStats,
}

impl<S: NotificationSink, C: Clock> Notifier<S, C> {
    pub fn new(settings: NotifierSettings, sink: S, clock: C) -> Self {
        Self {
            settings,
            sink,
            clock,
            last_success: None,
            stats: NotifierStats::default(),
        }
    }

    pub fn settings(&self) -> &NotifierSettings {
        &self.settings
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Instant of the last successful delivery; `None` until one succeeds.
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn stats(&self) -> NotifierStats {
        self.stats
    }

    pub fn state_at(&self, now: Instant) -> NotifierState {
        if self.in_cooldown(now) {
            NotifierState::Cooling
        } else {
            NotifierState::Armed
        }
    }

    /// Handle a batch at the injected clock's current time.
    pub fn on_detection_batch(&mut self, batch: &DetectionBatch) -> BatchOutcome {
        let now = self.clock.now();
        self.on_detection_batch_at(batch, now)
    }

    /// Handle a batch observed at `now`.
    ///
    /// At most one delivery is attempted per call, for the first qualifying
    /// detection in batch order.
    pub fn on_detection_batch_at(&mut self, batch: &DetectionBatch, now: Instant) -> BatchOutcome {
        self.stats.batches_seen += 1;
        if self.in_cooldown(now) {
            self.stats.batches_gated += 1;
            return BatchOutcome::CoolingDown;
        }

        match batch.first_qualifying(self.settings.area_threshold) {
            Some(detection) => {
                log::debug!(
                    "qualifying detection: score={:.2} area={:.0} id={:?}",
                    detection.score,
                    detection.bbox.area(),
                    detection.id
                );
                if self.dispatch(now) {
                    BatchOutcome::Delivered
                } else {
                    BatchOutcome::Failed
                }
            }
            None => BatchOutcome::NoMatch,
        }
    }

    /// Make one delivery attempt. Returns true on success.
    ///
    /// `last_success` is only written here, and only when the sink reports
    /// success.
    pub fn dispatch(&mut self, now: Instant) -> bool {
        log::info!("Person detected, notifying {}", self.sink.endpoint());
        self.stats.dispatch_attempts += 1;
        match self.sink.notify() {
            Ok(()) => {
                self.last_success = Some(now);
                self.stats.notifications_delivered += 1;
                true
            }
            Err(e) => {
                self.stats.dispatch_failures += 1;
                log::error!("Error while notifying {}: {}", self.sink.endpoint(), e);
                false
            }
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        match self.last_success {
            Some(last) => now.saturating_duration_since(last) < self.settings.cooldown,
            None => false,
        }
    }
}
