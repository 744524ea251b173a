//! MQTT detection subscriber.
//!
//! Subscribes to the detector's output topic and decodes every publish as a
//! JSON detection batch. The connection is re-established after errors until
//! the subscription is stopped.

use anyhow::{anyhow, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::broker::{Broker, TlsFiles};
use super::{BatchHandler, DetectionSource, Subscription};
use crate::detection::DetectionBatch;

pub const DEFAULT_TOPIC: &str = "yolo/detections";

/// Pending requests/events buffered by the MQTT client.
const CLIENT_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub broker: Broker,
    pub tls: TlsFiles,
    /// Accept a broker outside the loopback interface.
    pub allow_remote: bool,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
}

impl MqttSettings {
    /// Plain, loopback-only settings for `addr` on the default topic.
    pub fn new(addr: &str, client_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            broker: Broker::parse(addr, false)?,
            tls: TlsFiles::default(),
            allow_remote: false,
            client_id: client_id.into(),
            username: None,
            password: None,
            topic: DEFAULT_TOPIC.to_string(),
        })
    }
}

pub struct MqttSource {
    settings: MqttSettings,
}

impl MqttSource {
    /// Check the settings and build the source. Fails on a remote broker
    /// unless `allow_remote` is set, an empty topic, or unusable TLS files.
    pub fn new(settings: MqttSettings) -> Result<Self> {
        if !settings.broker.is_loopback() {
            if !settings.allow_remote {
                return Err(anyhow!(
                    "MQTT broker {} is not on loopback; pass --allow-remote-mqtt to use it",
                    settings.broker
                ));
            }
            log::warn!("Remote MQTT enabled - ensure broker is in a trusted network");
        }
        if settings.topic.trim().is_empty() {
            return Err(anyhow!("detections topic must not be empty"));
        }
        settings.tls.transport_for(&settings.broker)?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }
}

type SharedClient = Arc<Mutex<Option<Client>>>;

fn lock(client: &SharedClient) -> MutexGuard<'_, Option<Client>> {
    client.lock().unwrap_or_else(|e| e.into_inner())
}

impl DetectionSource for MqttSource {
    fn subscribe(&mut self, mut handler: BatchHandler) -> Result<Subscription> {
        let settings = self.settings.clone();
        let current: SharedClient = Arc::default();
        let current_thread = current.clone();

        let subscription = Subscription::spawn("mqtt", move |stop| {
            while !stop.load(Ordering::SeqCst) {
                match connect(&settings) {
                    Ok((client, mut connection)) => {
                        *lock(&current_thread) = Some(client.clone());
                        // Stop may have run before the client was published.
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        match client.subscribe(settings.topic.as_str(), QoS::AtMostOnce) {
                            Ok(()) => pump(&mut connection, &settings.topic, &mut handler, &stop),
                            Err(e) => {
                                log::error!("MQTT subscribe to {} failed: {}", settings.topic, e)
                            }
                        }
                        lock(&current_thread).take();
                    }
                    Err(e) => log::error!("MQTT setup failed: {:#}", e),
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!(
                    "MQTT connection lost. Reconnecting in {}s...",
                    RECONNECT_DELAY.as_secs()
                );
                sleep_unless_stopped(RECONNECT_DELAY, &stop);
            }
            log::debug!("MQTT source stopped");
        })?;

        Ok(subscription.on_stop(move || {
            if let Some(client) = lock(&current).take() {
                if let Err(e) = client.disconnect() {
                    log::debug!("MQTT disconnect on stop: {}", e);
                }
            }
        }))
    }
}

fn connect(settings: &MqttSettings) -> Result<(Client, Connection)> {
    let broker = &settings.broker;
    let mut options = MqttOptions::new(&settings.client_id, &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_start(true);
    if let Some(user) = &settings.username {
        options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
    }
    options.set_transport(settings.tls.transport_for(broker)?);

    log::info!(
        "Connecting to MQTT broker {} (auth: {})",
        broker,
        settings.username.is_some()
    );
    Ok(Client::new(options, CLIENT_CAPACITY))
}

/// Drive the connection until it fails or the subscription is stopped.
///
/// `Subscription::stop` disconnects the client, which surfaces here as an
/// outgoing disconnect or a connection error, so the stop flag is re-checked
/// after every event.
fn pump(connection: &mut Connection, topic: &str, handler: &mut BatchHandler, stop: &AtomicBool) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => log::info!("Connected to MQTT broker"),
            Ok(Event::Incoming(Incoming::SubAck(_))) => log::info!("Subscribed to {}", topic),
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                match DetectionBatch::from_json(&publish.payload) {
                    Ok(batch) => handler(batch),
                    Err(e) => log::warn!(
                        "Skipping payload on {}: {:#}",
                        String::from_utf8_lossy(&publish.topic),
                        e
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => {
                if !stop.load(Ordering::SeqCst) {
                    log::error!("MQTT connection error: {}", e);
                }
                return;
            }
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let mut waited = Duration::ZERO;
    while waited < total && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(STOP_POLL);
        waited += STOP_POLL;
    }
}
