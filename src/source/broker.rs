//! Broker address and TLS resolution for the MQTT source.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use url::{Host, Url};

pub const PLAIN_PORT: u16 = 1883;
pub const TLS_PORT: u16 = 8883;

/// Where the detector's broker lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Broker {
    /// Resolve `host[:port]` or `scheme://host[:port]`.
    ///
    /// `mqtts`/`ssl` imply TLS; `mqtt`/`tcp` use TLS only when `force_tls`.
    /// A missing port falls back to the scheme's well-known port.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let url = if addr.contains("://") {
            Url::parse(addr)
        } else {
            Url::parse(&format!("mqtt://{}", addr))
        }
        .with_context(|| format!("invalid broker address '{}'", addr))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => force_tls,
            "mqtts" | "ssl" => true,
            other => {
                return Err(anyhow!(
                    "broker scheme '{}' is not one of mqtt, mqtts, tcp, ssl",
                    other
                ))
            }
        };
        let host = match url.host() {
            Some(Host::Domain(name)) if !name.is_empty() => name.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(anyhow!("broker address '{}' has no host", addr)),
        };
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(anyhow!("broker address '{}' must not carry a path", addr));
        }
        let port = url
            .port()
            .unwrap_or(if tls { TLS_PORT } else { PLAIN_PORT });
        Ok(Self { host, port, tls })
    }

    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }
}

impl std::fmt::Display for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// PEM files for MQTT TLS. Read on every connect so rotated certificates
/// are picked up by the next reconnect.
#[derive(Clone, Debug, Default)]
pub struct TlsFiles {
    pub ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsFiles {
    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.client_cert.is_none() && self.client_key.is_none()
    }

    pub fn transport_for(&self, broker: &Broker) -> Result<Transport> {
        if !broker.tls {
            if !self.is_empty() {
                return Err(anyhow!(
                    "TLS files given for plain broker {}; use an mqtts:// address or --mqtt-use-tls",
                    broker
                ));
            }
            return Ok(Transport::tcp());
        }

        let client_auth = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "MQTT client certificate and key must be given together"
                ))
            }
        };
        match (&self.ca, client_auth) {
            (None, None) => Ok(Transport::tls_with_default_config()),
            (Some(ca), client_auth) => Ok(Transport::tls(
                read_pem(ca, "CA certificate")?,
                client_auth,
                None,
            )),
            (None, Some(_)) => Err(anyhow!(
                "MQTT client authentication needs a CA certificate (--mqtt-tls-ca-path)"
            )),
        }
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read MQTT {} {}", what, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_is_plain() {
        let broker = Broker::parse("127.0.0.1:1884", false).unwrap();
        assert_eq!(
            broker,
            Broker {
                host: "127.0.0.1".to_string(),
                port: 1884,
                tls: false,
            }
        );
        assert_eq!(broker.to_string(), "mqtt://127.0.0.1:1884");
    }

    #[test]
    fn scheme_selects_tls_and_default_port() {
        let broker = Broker::parse("mqtts://broker.lan", false).unwrap();
        assert!(broker.tls);
        assert_eq!(broker.port, TLS_PORT);

        assert_eq!(Broker::parse("broker.lan", false).unwrap().port, PLAIN_PORT);
        assert!(Broker::parse("tcp://broker.lan:1883", true).unwrap().tls);
    }

    #[test]
    fn ipv6_literal() {
        let broker = Broker::parse("[::1]:1883", false).unwrap();
        assert_eq!(broker.host, "::1");
        assert!(broker.is_loopback());
        assert_eq!(broker.to_string(), "mqtt://[::1]:1883");
    }

    #[test]
    fn rejects_unusable_addresses() {
        for addr in ["ws://broker:80", "broker:notaport", "mqtt://:1883", "broker:1883/topic"] {
            assert!(Broker::parse(addr, false).is_err(), "{}", addr);
        }
    }

    #[test]
    fn loopback_detection() {
        for addr in ["localhost:1883", "LOCALHOST", "127.0.0.1", "127.1.2.3:1883"] {
            assert!(Broker::parse(addr, false).unwrap().is_loopback(), "{}", addr);
        }
        assert!(!Broker::parse("192.168.1.10:1883", false).unwrap().is_loopback());
        assert!(!Broker::parse("core-mosquitto", false).unwrap().is_loopback());
    }

    #[test]
    fn plain_broker_refuses_tls_files() {
        let files = TlsFiles {
            ca: Some(PathBuf::from("/etc/ssl/ca.pem")),
            ..Default::default()
        };
        let broker = Broker::parse("localhost:1883", false).unwrap();
        assert!(files.transport_for(&broker).is_err());
        assert!(TlsFiles::default().transport_for(&broker).is_ok());
    }

    #[test]
    fn client_cert_without_key_is_rejected() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let files = TlsFiles {
            client_cert: Some(cert.path().to_path_buf()),
            ..Default::default()
        };
        let broker = Broker::parse("mqtts://localhost", false).unwrap();
        let err = files.transport_for(&broker).err().unwrap();
        assert!(err.to_string().contains("given together"));
    }

    #[test]
    fn missing_ca_file_names_the_path() {
        let files = TlsFiles {
            ca: Some(PathBuf::from("/nonexistent/person_notifier_ca.pem")),
            ..Default::default()
        };
        let broker = Broker::parse("mqtts://localhost", false).unwrap();
        let err = files.transport_for(&broker).err().unwrap();
        assert!(err.to_string().contains("person_notifier_ca.pem"));
    }
}
