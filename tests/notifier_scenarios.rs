//! End-to-end behaviour of the person notifier.
//!
//! These tests verify that:
//! 1. The cooldown gate holds across long batch sequences
//! 2. Failed deliveries never consume the cooldown
//! 3. The runtime serialises batches from a source into one notifier
//! 4. The HTTP sink is called with a GET on the configured URL

use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use person_notifier::{
    run_until, BatchOutcome, DeliveryError, Detection, DetectionBatch, HttpSink, JsonLinesSource,
    ManualClock, NotificationSink, Notifier, NotifierConfig, NotifierSettings, REQUEST_TIMEOUT,
};

/// Records every delivery attempt; fails when the shared flag is set.
#[derive(Clone, Default)]
struct RecordingSink {
    calls: Arc<Mutex<u32>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl NotificationSink for RecordingSink {
    fn endpoint(&self) -> &str {
        "recording://sink"
    }

    fn notify(&self) -> Result<(), DeliveryError> {
        *self.calls.lock().unwrap() += 1;
        if self.failing.load(Ordering::SeqCst) {
            Err(DeliveryError::Timeout(REQUEST_TIMEOUT))
        } else {
            Ok(())
        }
    }
}

fn settings() -> NotifierSettings {
    NotifierSettings {
        cooldown: Duration::from_millis(500),
        area_threshold: 100_000.0,
    }
}

fn person() -> DetectionBatch {
    DetectionBatch::new(vec![Detection::new("person", 0.8, 400.0, 300.0)])
}

#[test]
fn scenarios_a_through_c() {
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let mut notifier = Notifier::new(settings(), sink.clone(), clock.clone());

    // A: first qualifying batch at t=0 dispatches and records t=0.
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.0)),
        BatchOutcome::Delivered
    );
    assert_eq!(notifier.last_success(), Some(clock.at(0.0)));

    // B: t=0.3 is inside the cooldown.
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.3)),
        BatchOutcome::CoolingDown
    );

    // C: t=0.6 is past it.
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.6)),
        BatchOutcome::Delivered
    );
    assert_eq!(sink.calls(), 2);
}

#[test]
fn scenario_d_low_score_never_qualifies() {
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let mut notifier = Notifier::new(settings(), sink.clone(), clock.clone());
    let batch = DetectionBatch::new(vec![Detection::new("person", 0.5, 400.0, 300.0)]);

    for step in 0..20 {
        let outcome = notifier.on_detection_batch_at(&batch, clock.at(step as f64));
        assert_eq!(outcome, BatchOutcome::NoMatch);
    }
    assert_eq!(sink.calls(), 0);
}

#[test]
fn scenario_e_failure_allows_immediate_retry() {
    let sink = RecordingSink::default();
    sink.failing.store(true, Ordering::SeqCst);
    let clock = ManualClock::new();
    let mut notifier = Notifier::new(settings(), sink.clone(), clock.clone());

    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.0)),
        BatchOutcome::Failed
    );
    assert_eq!(notifier.last_success(), None);

    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.1)),
        BatchOutcome::Failed
    );
    assert_eq!(sink.calls(), 2);

    sink.failing.store(false, Ordering::SeqCst);
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.2)),
        BatchOutcome::Delivered
    );
    assert_eq!(notifier.last_success(), Some(clock.at(0.2)));
}

#[test]
fn successful_dispatches_are_never_closer_than_cooldown() {
    let sink = RecordingSink::default();
    let clock = ManualClock::new();
    let mut notifier = Notifier::new(settings(), sink.clone(), clock.clone());
    let cooldown = settings().cooldown;

    // Batches every 70ms with a failure every fifth attempt.
    let mut successes: Vec<Instant> = Vec::new();
    for step in 0u32..200 {
        let now = clock.origin() + Duration::from_millis(70) * step;
        sink.failing
            .store(sink.calls() % 5 == 4, Ordering::SeqCst);
        if notifier.on_detection_batch_at(&person(), now) == BatchOutcome::Delivered {
            successes.push(now);
        }
    }

    assert!(successes.len() > 10);
    for pair in successes.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= cooldown);
    }
    let stats = notifier.stats();
    assert_eq!(stats.notifications_delivered as usize, successes.len());
    assert_eq!(
        stats.dispatch_attempts,
        stats.notifications_delivered + stats.dispatch_failures
    );
}

#[test]
fn runtime_drains_source_through_single_notifier() {
    let lines = [
        r#"{"detections":[{"class_name":"person","score":0.9,"bbox":{"size":{"x":400,"y":300}}}]}"#,
        r#"{"detections":[{"class_name":"person","score":0.9,"bbox":{"size":{"x":400,"y":300}}}]}"#,
        "not json",
        r#"{"detections":[{"class_name":"car","score":0.99,"bbox":{"size":{"x":900,"y":900}}}]}"#,
    ]
    .join("\n");
    let mut source = JsonLinesSource::new(Cursor::new(lines.into_bytes()));
    let sink = RecordingSink::default();
    let cfg = NotifierConfig::default();

    let stats = run_until(
        &cfg,
        &mut source,
        sink.clone(),
        ManualClock::new(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("runtime");

    // The clock never moves, so only the first person batch gets through.
    assert_eq!(stats.batches_seen, 3);
    assert_eq!(stats.batches_gated, 2);
    assert_eq!(stats.notifications_delivered, 1);
    assert_eq!(sink.calls(), 1);
}

/// Fails every delivery after holding the worker for `delay`.
struct SlowFailingSink {
    delay: Duration,
    calls: Arc<Mutex<u32>>,
}

impl NotificationSink for SlowFailingSink {
    fn endpoint(&self) -> &str {
        "slow://sink"
    }

    fn notify(&self) -> Result<(), DeliveryError> {
        *self.calls.lock().unwrap() += 1;
        std::thread::sleep(self.delay);
        Err(DeliveryError::Status(503))
    }
}

#[test]
fn replayed_lines_survive_a_slow_endpoint() {
    let person = r#"{"detections":[{"class_name":"person","score":0.9,"bbox":{"size":{"x":400,"y":300}}}]}"#;
    let car = r#"{"detections":[{"class_name":"car","score":0.99,"bbox":{"size":{"x":900,"y":900}}}]}"#;
    let mut lines = vec![person];
    lines.extend(std::iter::repeat(car).take(28));
    lines.push(person);
    let mut source = JsonLinesSource::new(Cursor::new(lines.join("\n").into_bytes()));

    let calls = Arc::new(Mutex::new(0));
    let sink = SlowFailingSink {
        delay: Duration::from_millis(50),
        calls: calls.clone(),
    };
    let stats = run_until(
        &NotifierConfig::default(),
        &mut source,
        sink,
        ManualClock::new(),
        Arc::new(AtomicBool::new(false)),
    )
    .expect("runtime");

    // Every line reaches the notifier, including the trailing person batch,
    // which is tried again because the first attempt failed.
    assert_eq!(stats.batches_seen, 30);
    assert_eq!(stats.dispatch_attempts, 2);
    assert_eq!(stats.dispatch_failures, 2);
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[test]
fn runtime_stops_on_shutdown_flag() {
    // A reader that never yields data keeps the source alive.
    struct Idle;
    impl Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(50));
            Err(std::io::ErrorKind::Interrupted.into())
        }
    }

    let mut source = JsonLinesSource::new(Idle);
    let shutdown = Arc::new(AtomicBool::new(false));
    let trigger = shutdown.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.store(true, Ordering::SeqCst);
    });

    let started = Instant::now();
    let stats = run_until(
        &NotifierConfig::default(),
        &mut source,
        RecordingSink::default(),
        ManualClock::new(),
        shutdown,
    )
    .expect("runtime");
    assert_eq!(stats.batches_seen, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn http_sink_drives_notifier_against_live_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::thread::spawn(move || {
        let mut paths = Vec::new();
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            paths.push(request.lines().next().unwrap_or_default().to_string());
            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .unwrap();
        }
        paths
    });

    let sink = HttpSink::new(format!("http://{}/start_conversation", addr));
    let clock = ManualClock::new();
    let mut notifier = Notifier::new(settings(), sink, clock.clone());

    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.0)),
        BatchOutcome::Delivered
    );
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.2)),
        BatchOutcome::CoolingDown
    );
    assert_eq!(
        notifier.on_detection_batch_at(&person(), clock.at(0.7)),
        BatchOutcome::Delivered
    );

    let paths = server.join().unwrap();
    assert_eq!(paths.len(), 2);
    for line in paths {
        assert!(line.starts_with("GET /start_conversation HTTP/1.1"), "{}", line);
    }
}
