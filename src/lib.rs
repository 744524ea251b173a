//! Person Notifier
//!
//! Watches a stream of object-detection batches and calls an HTTP endpoint
//! when a person is close to the camera, at most once per cooldown window.
//!
//! # Module Structure
//!
//! - `detection`: Detection batches and the person predicate
//! - `notifier`: Cooldown gate and dispatch (the core state machine)
//! - `sink`: Outbound delivery (HTTP GET with a fixed timeout)
//! - `source`: Detection sources (MQTT, JSON lines) and broker/TLS resolution
//! - `queue`: Bounded hand-off between a source and the worker
//! - `config`, `runtime`: Startup parameters and process wiring

pub mod clock;
pub mod config;
pub mod detection;
pub mod notifier;
pub mod queue;
pub mod runtime;
pub mod sink;
pub mod source;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::NotifierConfig;
pub use detection::{BoundingBox, Detection, DetectionBatch, MIN_SCORE, PERSON_LABEL};
pub use notifier::{BatchOutcome, Notifier, NotifierSettings, NotifierState, NotifierStats};
pub use queue::{BatchQueue, Overflow};
pub use runtime::{run, run_until, QUEUE_DEPTH};
pub use sink::{DeliveryError, HttpSink, NotificationSink, REQUEST_TIMEOUT};
pub use source::{BatchHandler, DetectionSource, JsonLinesSource, MqttSource, Subscription};
