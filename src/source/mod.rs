//! Detection sources.
//!
//! A source delivers decoded [`DetectionBatch`] values to a handler from its
//! own thread:
//! - `MqttSource`: JSON detection arrays published on an MQTT topic
//! - `JsonLinesSource`: one JSON batch per line from any reader (stdin)
//!
//! Sources MUST NOT:
//! - Call the handler concurrently with itself
//! - Forward payloads that failed to decode

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detection::DetectionBatch;
use crate::queue::Overflow;

pub mod broker;
pub mod lines;
pub mod mqtt;

pub use broker::{Broker, TlsFiles};
pub use lines::JsonLinesSource;
pub use mqtt::{MqttSettings, MqttSource};

/// Receives every decoded batch, in arrival order.
pub type BatchHandler = Box<dyn FnMut(DetectionBatch) + Send + 'static>;

/// How long `Subscription::stop` waits for the source thread to exit.
const STOP_GRACE: Duration = Duration::from_secs(2);

pub trait DetectionSource {
    /// Start delivering batches to `handler`. The subscription stays active
    /// until stopped or until the source runs out of input.
    fn subscribe(&mut self, handler: BatchHandler) -> Result<Subscription>;

    /// Queueing policy when the worker falls behind this source.
    fn overflow(&self) -> Overflow {
        Overflow::DropOldest
    }
}

/// Handle to a running source thread.
pub struct Subscription {
    name: &'static str,
    stop: Arc<AtomicBool>,
    wake: Option<Box<dyn FnOnce() + Send>>,
    join: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(stop_thread))?;
        Ok(Self {
            name,
            stop,
            wake: None,
            join: Some(join),
        })
    }

    /// Run `wake` on stop, after the flag is set, to unblock a source thread
    /// waiting on I/O.
    pub(crate) fn on_stop(mut self, wake: impl FnOnce() + Send + 'static) -> Self {
        self.wake = Some(Box::new(wake));
        self
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Signal the source thread to exit and wait briefly for it.
    ///
    /// A thread blocked on input that never arrives (e.g. an idle stdin) is
    /// left detached rather than holding up shutdown.
    pub fn stop(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(wake) = self.wake.take() {
            wake();
        }
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + STOP_GRACE;
        while !join.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if join.is_finished() {
            if join.join().is_err() {
                log::warn!("{} source thread panicked", self.name);
            }
        } else {
            log::warn!("{} source still blocked on input; detaching", self.name);
        }
        Ok(())
    }
}
