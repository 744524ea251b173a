//! person_notifier - Call an endpoint when a person is detected.
//!
//! 1. Subscribes to detection batches (MQTT topic or JSON lines on stdin)
//! 2. Filters for large, confident "person" detections
//! 3. Calls the configured endpoint, at most once per cooldown window
//! 4. Runs until Ctrl-C

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use person_notifier::config::ConfigOverrides;
use person_notifier::source::mqtt::DEFAULT_TOPIC;
use person_notifier::source::{Broker, MqttSettings, TlsFiles};
use person_notifier::{DetectionSource, HttpSink, JsonLinesSource, MqttSource, NotifierConfig};

const CLIENT_NAME: &str = "person_notifier";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Subscribe to an MQTT topic.
    Mqtt,
    /// Read one JSON batch per line from stdin.
    Stdin,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Notify an endpoint when a person is detected")]
struct Args {
    /// JSON config file (notify_url, notify_timeout, area_threshold).
    #[arg(long, env = "NOTIFIER_CONFIG")]
    config: Option<PathBuf>,

    /// Endpoint to call on a person detection.
    #[arg(long)]
    notify_url: Option<String>,

    /// Seconds between successful notifications.
    #[arg(long)]
    notify_timeout: Option<f64>,

    /// Minimum bounding-box area (pixels) for a person to count.
    #[arg(long)]
    area_threshold: Option<f64>,

    /// Where detection batches come from.
    #[arg(long, value_enum, default_value_t = SourceKind::Mqtt)]
    source: SourceKind,

    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT brokers.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by mqtts:// addresses).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// PEM CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// PEM client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// PEM client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// Topic carrying detection batches.
    #[arg(long, env = "DETECTIONS_TOPIC", default_value = DEFAULT_TOPIC)]
    topic: String,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = CLIENT_NAME)]
    mqtt_client_id: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            notify_url: self.notify_url.clone(),
            notify_timeout: self.notify_timeout,
            area_threshold: self.area_threshold,
        }
    }

    fn mqtt_settings(&self) -> Result<MqttSettings> {
        Ok(MqttSettings {
            broker: Broker::parse(&self.mqtt_broker_addr, self.mqtt_use_tls)?,
            tls: TlsFiles {
                ca: self.mqtt_tls_ca_path.clone(),
                client_cert: self.mqtt_tls_client_cert_path.clone(),
                client_key: self.mqtt_tls_client_key_path.clone(),
            },
            allow_remote: self.allow_remote_mqtt,
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            topic: self.topic.clone(),
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = NotifierConfig::load_from(args.config.as_deref())?;
    cfg.apply_overrides(&args.overrides())?;
    let sink = HttpSink::new(cfg.notify_url.clone());

    log::info!("Person notifier starting");
    log::info!("  Notify URL: {}", cfg.notify_url);
    log::info!("  Cooldown: {:.3}s", cfg.notify_timeout.as_secs_f64());
    log::info!("  Request timeout: {}ms", sink.timeout().as_millis());
    log::info!("  Area threshold: {}", cfg.area_threshold);

    let mut source = build_source(&args)?;
    person_notifier::run(&cfg, source.as_mut(), sink)?;
    Ok(())
}

fn build_source(args: &Args) -> Result<Box<dyn DetectionSource>> {
    match args.source {
        SourceKind::Stdin => {
            log::info!("  Source: stdin (JSON lines)");
            Ok(Box::new(JsonLinesSource::stdin()))
        }
        SourceKind::Mqtt => {
            let source = MqttSource::new(args.mqtt_settings()?)?;
            let settings = source.settings();
            log::info!("  Source: {} topic={}", settings.broker, settings.topic);
            Ok(Box::new(source))
        }
    }
}
