//! Process wiring: source → bounded queue → single notifier worker.
//!
//! Batches are handled strictly one at a time on the calling thread, which
//! owns the notifier. Sources push into a queue of [`QUEUE_DEPTH`]; when the
//! worker falls behind (e.g. blocked on a slow endpoint) a live source loses
//! its oldest pending batches, while a replay source waits for room.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::config::NotifierConfig;
use crate::detection::DetectionBatch;
use crate::notifier::{Notifier, NotifierStats};
use crate::queue::{BatchQueue, Pop};
use crate::sink::NotificationSink;
use crate::source::DetectionSource;

/// Pending batches buffered between a source and the worker.
pub const QUEUE_DEPTH: usize = 10;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Held by the source's handler; the queue closes when the source drops it.
struct QueueProducer(Arc<BatchQueue<DetectionBatch>>);

impl QueueProducer {
    fn push(&self, batch: DetectionBatch) {
        self.0.push(batch);
    }
}

impl Drop for QueueProducer {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Run until Ctrl-C (or until the source runs dry).
pub fn run<K: NotificationSink>(
    config: &NotifierConfig,
    source: &mut dyn DetectionSource,
    sink: K,
) -> Result<NotifierStats> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    run_until(config, source, sink, MonotonicClock, shutdown)
}

/// Run until `shutdown` is set or the source finishes.
pub fn run_until<K: NotificationSink, C: Clock>(
    config: &NotifierConfig,
    source: &mut dyn DetectionSource,
    sink: K,
    clock: C,
    shutdown: Arc<AtomicBool>,
) -> Result<NotifierStats> {
    let queue = Arc::new(BatchQueue::new(QUEUE_DEPTH, source.overflow()));
    let producer = QueueProducer(queue.clone());
    let subscription = source.subscribe(Box::new(move |batch: DetectionBatch| {
        producer.push(batch);
    }))?;

    let mut notifier = Notifier::new(config.notifier_settings(), sink, clock);
    log::info!(
        "person notifier running: url={} cooldown={:.3}s area_threshold={}",
        config.notify_url,
        config.notify_timeout.as_secs_f64(),
        config.area_threshold
    );

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown signal received");
            break;
        }
        match queue.pop_timeout(SHUTDOWN_POLL) {
            Pop::Item(batch) => {
                notifier.on_detection_batch(&batch);
            }
            Pop::Empty => continue,
            Pop::Closed => {
                log::info!("detection source finished");
                break;
            }
        }
    }

    // Release a source blocked on a full queue before waiting for it.
    queue.close();
    subscription.stop()?;
    let stats = notifier.stats();
    log::info!(
        "batches={} gated={} attempts={} failures={} delivered={} dropped={}",
        stats.batches_seen,
        stats.batches_gated,
        stats.dispatch_attempts,
        stats.dispatch_failures,
        stats.notifications_delivered,
        queue.dropped()
    );
    Ok(stats)
}
