use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::services;
use crate::types::{PortResult, PortState};

/// Attempt one TCP connect to `address:port`, bounded by `timeout`, and classify it.
///
/// - Connected: `OPEN`, annotated with the well-known service name if any.
/// - Refused, reset or timed out: `CLOSED`.
/// - Any other transport failure: `ERROR`, with the error text in `detail`.
///
/// The stream is dropped before returning, and on timeout the pending connect future is
/// dropped with its socket, so no exit path keeps a socket alive.
pub async fn probe(address: IpAddr, port: u16, timeout: Duration) -> PortResult {
    let addr = SocketAddr::new(address, port);
    let start = Instant::now();
    let outcome = time::timeout(timeout, TcpStream::connect(addr)).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let (state, detail) = match outcome {
        Ok(Ok(stream)) => {
            drop(stream);
            (PortState::Open, None)
        }
        Ok(Err(e)) => classify_io_error(&e),
        Err(_elapsed) => (PortState::Closed, None),
    };

    log::trace!(
        "[prober] probe: addr={} state={} latency_ms={}",
        addr,
        state,
        latency_ms
    );

    PortResult {
        port,
        state,
        service: service_for(port, state),
        latency_ms,
        detail,
    }
}

/// Only open ports carry a service name.
fn service_for(port: u16, state: PortState) -> Option<String> {
    match state {
        PortState::Open => services::lookup(port).map(str::to_string),
        PortState::Closed | PortState::Error => None,
    }
}

fn classify_io_error(e: &io::Error) -> (PortState, Option<String>) {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::TimedOut => (PortState::Closed, None),
        _ => (PortState::Error, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let r = probe(LOCALHOST, port, Duration::from_millis(500)).await;
        assert_eq!(r.state, PortState::Open);
        assert_eq!(r.port, port);
        assert!(r.detail.is_none());
    }

    #[tokio::test]
    async fn dropped_listener_port_is_closed() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let r = probe(LOCALHOST, port, Duration::from_millis(500)).await;
        assert_eq!(r.state, PortState::Closed);
        assert!(r.service.is_none());
    }

    #[test]
    fn open_well_known_port_gets_service_name() {
        assert_eq!(service_for(80, PortState::Open).as_deref(), Some("HTTP"));
        assert_eq!(service_for(80, PortState::Closed), None);
        assert_eq!(service_for(80, PortState::Error), None);
        assert_eq!(service_for(40_000, PortState::Open), None);
    }

    #[tokio::test]
    async fn open_port_80_is_annotated_http() {
        // Needs the privilege to bind :80 and a free port; skip otherwise.
        let listener = match TcpListener::bind("127.0.0.1:80").await {
            Ok(l) => l,
            Err(e) => {
                assert!(
                    matches!(
                        e.kind(),
                        io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse
                    ),
                    "unexpected bind error: {e}"
                );
                return;
            }
        };
        let r = probe(LOCALHOST, 80, Duration::from_millis(500)).await;
        drop(listener);
        assert_eq!(r.state, PortState::Open);
        assert_eq!(r.service.as_deref(), Some("HTTP"));
    }

    #[test]
    fn refused_and_timeout_are_closed() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_io_error(&refused).0, PortState::Closed);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify_io_error(&timed_out).0, PortState::Closed);
    }

    #[test]
    fn other_failures_are_errors_with_detail() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let (state, detail) = classify_io_error(&denied);
        assert_eq!(state, PortState::Error);
        assert_eq!(detail.as_deref(), Some("denied"));
    }
}
