use std::io::ErrorKind;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Result of a single liveness probe. Probe failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "camelCase")]
pub enum ProbeOutcome {
    Reachable,
    Unreachable(String),
    TimedOut,
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

/// Whether something already holds `port`, tested by binding throwaway
/// listeners on the IPv4 and IPv6 wildcard addresses and dropping them
/// immediately. A server on `[::1]` only shows up in the IPv6 bind.
pub async fn is_port_in_use(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => drop(listener),
        Err(_) => return true,
    }

    // Hosts without IPv6 fail this bind with something other than AddrInUse.
    match TcpListener::bind(("::", port)).await {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(e) => e.kind() == ErrorKind::AddrInUse,
    }
}

/// Open a raw TCP connection to `localhost:port`.
pub async fn probe_port(port: u16, limit: Duration) -> ProbeOutcome {
    match timeout(limit, TcpStream::connect(("localhost", port))).await {
        Ok(Ok(_stream)) => ProbeOutcome::Reachable,
        Ok(Err(e)) => ProbeOutcome::Unreachable(e.to_string()),
        Err(_) => ProbeOutcome::TimedOut,
    }
}

/// HEAD-request prober. Any 2xx or 3xx answer counts as reachable;
/// redirects are not followed.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    limit: Duration,
}

impl HttpProbe {
    pub fn new(limit: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("devdeck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, limit })
    }

    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let request = self.client.head(url).timeout(self.limit).send();
        match timeout(self.limit, request).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    ProbeOutcome::Reachable
                } else {
                    ProbeOutcome::Unreachable(format!("HTTP {status}"))
                }
            }
            Ok(Err(e)) if e.is_timeout() => ProbeOutcome::TimedOut,
            Ok(Err(e)) => ProbeOutcome::Unreachable(e.to_string()),
            Err(_) => ProbeOutcome::TimedOut,
        }
    }
}
