use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ValidationError;

/// Connect timeout used when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// What to scan: one target, an inclusive port range and the per-connection timeout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub start_port: u16,
    pub end_port: u16,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>, start_port: u16, end_port: u16) -> Self {
        Self {
            target: target.into(),
            start_port,
            end_port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check `1 <= start_port <= end_port <= 65535` and a non-zero timeout.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start_port == 0 {
            return Err(ValidationError::PortOutOfRange(u32::from(self.start_port)));
        }
        if self.start_port > self.end_port {
            return Err(ValidationError::InvertedRange {
                start: self.start_port,
                end: self.end_port,
            });
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }

    /// Number of ports in the range, never less than 1.
    pub fn total_ports(&self) -> u32 {
        let span = u32::from(self.end_port).saturating_sub(u32::from(self.start_port)) + 1;
        span.max(1)
    }
}

/// The target after resolution: what the user typed and the address we connect to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub hostname: String,
    pub address: IpAddr,
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname == self.address.to_string() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.hostname, self.address)
        }
    }
}

/// Probe outcome classification.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortState {
    Open,
    Closed,
    Error,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "OPEN",
            PortState::Closed => "CLOSED",
            PortState::Error => "ERROR",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub state: PortState,
    pub service: Option<String>,
    pub latency_ms: u64,
    /// Transport error text, only set for `ERROR` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PortResult {
    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Progress counters, recomputed after every probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanProgress {
    pub scanned: u32,
    pub total: u32,
    pub percent: u8,
}

impl ScanProgress {
    pub fn new(total: u32) -> Self {
        Self {
            scanned: 0,
            total: total.max(1),
            percent: 0,
        }
    }

    /// Count one more examined port and return the new percentage.
    pub fn advance(&mut self) -> u8 {
        self.scanned = (self.scanned + 1).min(self.total);
        self.percent = percent_of(self.scanned, self.total);
        self.percent
    }
}

/// `floor(scanned / total * 100)` in integer arithmetic.
pub fn percent_of(scanned: u32, total: u32) -> u8 {
    let total = u64::from(total.max(1));
    let pct = u64::from(scanned) * 100 / total;
    pct.min(100) as u8
}

/// Lifecycle of one scan. Only the scan worker moves between these.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
    Done,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Stopped | ScanState::Done | ScanState::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::Stopping => "stopping",
            ScanState::Stopped => "stopped",
            ScanState::Done => "done",
            ScanState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything the engine tells its consumers, in emission order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ScanEvent {
    Resolved(ResolvedTarget),
    Scanning(u16),
    Progress(u8),
    Found(PortResult),
    ResolveFailed(String),
    Completed,
    Stopped,
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::ResolveFailed(_) | ScanEvent::Completed | ScanEvent::Stopped
        )
    }
}

/// Snapshot handed back when a scan worker finishes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub request: ScanRequest,
    pub target: Option<ResolvedTarget>,
    pub state: ScanState,
    pub progress: ScanProgress,
    pub results: Vec<PortResult>,
    pub started_at: String,
    pub finished_at: String,
}

impl ScanReport {
    pub fn open_ports(&self) -> impl Iterator<Item = &PortResult> {
        self.results.iter().filter(|r| r.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.open_ports().count()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_inverted_range() {
        let req = ScanRequest::new("127.0.0.1", 100, 10);
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvertedRange { start: 100, end: 10 })
        ));
    }

    #[test]
    fn validate_rejects_port_zero_and_zero_timeout() {
        assert!(ScanRequest::new("h", 0, 10).validate().is_err());
        let req = ScanRequest::new("h", 1, 10).with_timeout(Duration::ZERO);
        assert_eq!(req.validate(), Err(ValidationError::ZeroTimeout));
    }

    #[test]
    fn total_ports_counts_inclusive_range() {
        assert_eq!(ScanRequest::new("h", 1, 65535).total_ports(), 65535);
        assert_eq!(ScanRequest::new("h", 80, 80).total_ports(), 1);
    }

    #[test]
    fn percent_is_floored() {
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 66);
        assert_eq!(percent_of(3, 3), 100);
        assert_eq!(percent_of(0, 0), 0);
    }

    #[test]
    fn progress_never_passes_total() {
        let mut p = ScanProgress::new(2);
        assert_eq!(p.advance(), 50);
        assert_eq!(p.advance(), 100);
        assert_eq!(p.advance(), 100);
        assert_eq!(p.scanned, 2);
    }

    #[test]
    fn event_json_shape() {
        let json = serde_json::to_string(&ScanEvent::Scanning(22)).unwrap();
        assert_eq!(json, r#"{"event":"scanning","data":22}"#);
        let json = serde_json::to_string(&ScanEvent::Completed).unwrap();
        assert_eq!(json, r#"{"event":"completed"}"#);
    }
}
