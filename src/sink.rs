//! Outbound notification delivery.
//!
//! A [`NotificationSink`] performs exactly one delivery attempt per call.
//! The HTTP implementation issues a GET with a fixed request timeout that is
//! unrelated to the notifier's cooldown.

use std::time::Duration;

/// Upper bound on a single outbound notification call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Why a notification could not be delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// No response within the request timeout.
    Timeout(Duration),
    /// Connection refused, DNS failure, broken response, etc.
    Transport(String),
    /// Endpoint answered with a non-2xx status.
    Status(u16),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Timeout(after) => {
                write!(f, "request timed out after {}ms", after.as_millis())
            }
            DeliveryError::Transport(msg) => write!(f, "transport error: {}", msg),
            DeliveryError::Status(code) => write!(f, "endpoint returned HTTP {}", code),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Destination for person-presence notifications.
pub trait NotificationSink {
    /// Human-readable destination, used in log lines.
    fn endpoint(&self) -> &str;

    /// Attempt a single delivery. No retries.
    fn notify(&self) -> Result<(), DeliveryError>;
}

impl<T: NotificationSink + ?Sized> NotificationSink for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn notify(&self) -> Result<(), DeliveryError> {
        (**self).notify()
    }
}

/// HTTP GET sink.
pub struct HttpSink {
    url: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            url: url.into(),
            timeout: REQUEST_TIMEOUT,
            agent,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl NotificationSink for HttpSink {
    fn endpoint(&self) -> &str {
        &self.url
    }

    fn notify(&self) -> Result<(), DeliveryError> {
        match self.agent.get(&self.url).call() {
            Ok(response) => {
                let status = response.status();
                if (200..300).contains(&status) {
                    Ok(())
                } else {
                    Err(DeliveryError::Status(status))
                }
            }
            Err(ureq::Error::Status(code, _)) => Err(DeliveryError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                if is_timeout(&transport) {
                    Err(DeliveryError::Timeout(self.timeout))
                } else {
                    Err(DeliveryError::Transport(transport.to_string()))
                }
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error;

    let mut source = transport.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        source = cause.source();
    }
    false
}
