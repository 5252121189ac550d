use std::net::IpAddr;
use std::time::Instant;

use ::time::{format_description::well_known, OffsetDateTime};
use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ScanError, ValidationError};
use crate::prober;
use crate::resolver;
use crate::types::{
    PortResult, ResolvedTarget, ScanEvent, ScanProgress, ScanReport, ScanRequest, ScanState,
};

/// Upper bound for the probe window, whatever the caller asks for.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Knobs that do not change what is scanned, only how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Probes in flight at once. `1` scans strictly one port after another.
    pub concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl ScanOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }
}

/// Requests cancellation of a running scan. Cheap to clone, safe to call from any
/// thread, and calling it more than once has no further effect.
#[derive(Debug, Clone, Default)]
pub struct ScanCanceller {
    token: CancellationToken,
}

impl ScanCanceller {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl From<CancellationToken> for ScanCanceller {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

/// A scan running on its own task: its event stream, its cancel switch and its result.
#[derive(Debug)]
pub struct ScanHandle {
    events: mpsc::UnboundedReceiver<ScanEvent>,
    canceller: ScanCanceller,
    task: JoinHandle<ScanReport>,
}

impl ScanHandle {
    /// Next event, `None` once the worker is done and the stream is drained.
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    pub fn canceller(&self) -> ScanCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the worker and return its report. Undelivered events are discarded.
    pub async fn wait(self) -> Result<ScanReport, ScanError> {
        drop(self.events);
        Ok(self.task.await?)
    }

    /// Drain every event, then return them together with the report.
    pub async fn collect(mut self) -> Result<(Vec<ScanEvent>, ScanReport), ScanError> {
        let mut events = Vec::new();
        while let Some(ev) = self.events.recv().await {
            events.push(ev);
        }
        let report = self.task.await?;
        Ok((events, report))
    }

    /// Split into the raw parts for callers that consume events on another task.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedReceiver<ScanEvent>,
        ScanCanceller,
        JoinHandle<ScanReport>,
    ) {
        (self.events, self.canceller, self.task)
    }
}

/// Validate `request` and start scanning it on a new tokio task.
///
/// Fails with a `ValidationError` before any network activity. Must be called from
/// within a tokio runtime.
pub fn start(request: ScanRequest, options: ScanOptions) -> Result<ScanHandle, ValidationError> {
    start_with_cancel(request, options, CancellationToken::new())
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
pub fn start_with_cancel(
    request: ScanRequest,
    options: ScanOptions,
    cancel: CancellationToken,
) -> Result<ScanHandle, ValidationError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut controller = ScanController::new(request, options, cancel.clone(), tx);
    controller.begin()?;
    let task = tokio::spawn(controller.run());
    Ok(ScanHandle {
        events: rx,
        canceller: ScanCanceller::from(cancel),
        task,
    })
}

/// Run a scan on the current task, writing events to `events`.
pub async fn scan(
    request: ScanRequest,
    options: ScanOptions,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ScanEvent>,
) -> Result<ScanReport, ValidationError> {
    let mut controller = ScanController::new(request, options, cancel, events);
    controller.begin()?;
    Ok(controller.run().await)
}

/// Owns one scan from validation to its terminal state. It is the only writer of the
/// scan state and progress; the outside world sees them through events.
struct ScanController {
    request: ScanRequest,
    options: ScanOptions,
    state: ScanState,
    progress: ScanProgress,
    target: Option<ResolvedTarget>,
    results: Vec<PortResult>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ScanEvent>,
    started_at: String,
    started: Instant,
}

impl ScanController {
    fn new(
        request: ScanRequest,
        options: ScanOptions,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<ScanEvent>,
    ) -> Self {
        let progress = ScanProgress::new(request.total_ports());
        Self {
            request,
            options: ScanOptions::with_concurrency(options.concurrency),
            state: ScanState::Idle,
            progress,
            target: None,
            results: Vec::new(),
            cancel,
            events,
            started_at: now_iso_like(),
            started: Instant::now(),
        }
    }

    /// IDLE -> RUNNING, or a validation error with nothing sent on the network.
    fn begin(&mut self) -> Result<(), ValidationError> {
        if let Err(e) = self.request.validate() {
            log::warn!("[scanner] invalid_request: target={} error={}", self.request.target, e);
            return Err(e);
        }
        self.transition(ScanState::Running);
        Ok(())
    }

    async fn run(mut self) -> ScanReport {
        log::info!(
            "[scanner] scan_started: target={} ports={}-{} total={} timeout_ms={} concurrency={}",
            self.request.target,
            self.request.start_port,
            self.request.end_port,
            self.progress.total,
            self.request.timeout.as_millis(),
            self.options.concurrency
        );

        let target = match resolver::resolve(&self.request.target).await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[scanner] resolve_failed: {}", e);
                self.transition(ScanState::Failed);
                self.emit(ScanEvent::ResolveFailed(e.to_string()));
                return self.finish();
            }
        };
        let address = target.address;
        self.target = Some(target.clone());
        self.emit(ScanEvent::Resolved(target));

        let cancelled = if self.options.concurrency <= 1 {
            self.scan_sequential(address).await
        } else {
            self.scan_windowed(address).await
        };

        if cancelled {
            self.transition(ScanState::Stopping);
            self.transition(ScanState::Stopped);
            self.emit(ScanEvent::Stopped);
        } else {
            self.transition(ScanState::Done);
            self.emit(ScanEvent::Completed);
        }
        self.finish()
    }

    /// One probe at a time. Returns `true` if cancellation stopped the loop.
    async fn scan_sequential(&mut self, address: IpAddr) -> bool {
        for port in self.request.start_port..=self.request.end_port {
            if self.cancel.is_cancelled() {
                return true;
            }
            self.emit(ScanEvent::Scanning(port));
            let result = prober::probe(address, port, self.request.timeout).await;
            self.record(result);
        }
        false
    }

    /// Up to `concurrency` probes in flight; results come back in port order and each
    /// port's events are emitted together. Cancelling stops dispatching new ports, but
    /// every port already dispatched is allowed to finish and is reported.
    async fn scan_windowed(&mut self, address: IpAddr) -> bool {
        let timeout = self.request.timeout;
        let cancel = self.cancel.clone();
        let mut probes = stream::iter(self.request.start_port..=self.request.end_port)
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .map(move |port| prober::probe(address, port, timeout))
            .buffered(self.options.concurrency);

        while let Some(result) = probes.next().await {
            self.emit(ScanEvent::Scanning(result.port));
            self.record(result);
        }
        self.progress.scanned < self.progress.total
    }

    fn record(&mut self, result: PortResult) {
        let percent = self.progress.advance();
        self.emit(ScanEvent::Progress(percent));
        if result.is_open() {
            log::info!(
                "[scanner] open: port={} service={}",
                result.port,
                result.service.as_deref().unwrap_or("-")
            );
        }
        self.emit(ScanEvent::Found(result.clone()));
        self.results.push(result);
    }

    fn transition(&mut self, next: ScanState) {
        log::debug!("[scanner] state: {} -> {}", self.state, next);
        self.state = next;
    }

    fn emit(&self, event: ScanEvent) {
        // A consumer that went away does not stop the scan.
        let _ = self.events.send(event);
    }

    fn finish(self) -> ScanReport {
        let open = self.results.iter().filter(|r| r.is_open()).count();
        log::info!(
            "[scanner] scan_finished: target={} state={} scanned={}/{} open={} elapsed_ms={}",
            self.request.target,
            self.state,
            self.progress.scanned,
            self.progress.total,
            open,
            self.started.elapsed().as_millis()
        );
        ScanReport {
            request: self.request,
            target: self.target,
            state: self.state,
            progress: self.progress,
            results: self.results,
            started_at: self.started_at,
            finished_at: now_iso_like(),
        }
    }
}

fn now_iso_like() -> String {
    // RFC3339 UTC timestamp
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(ScanOptions::with_concurrency(0).concurrency, 1);
        assert_eq!(ScanOptions::with_concurrency(1_000_000).concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn canceller_is_idempotent() {
        let c = ScanCanceller::default();
        c.cancel();
        c.cancel();
        assert!(c.is_cancelled());
    }

    #[tokio::test]
    async fn inverted_range_never_starts() {
        let req = ScanRequest::new("127.0.0.1", 10, 5);
        let err = start(req, ScanOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvertedRange { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_first_port_stops_with_no_results() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let req = ScanRequest::new("127.0.0.1", 1, 10).with_timeout(Duration::from_millis(50));
        let report = scan(req, ScanOptions::default(), cancel, tx).await.unwrap();
        assert_eq!(report.state, ScanState::Stopped);
        assert!(report.results.is_empty());

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(matches!(events.first(), Some(ScanEvent::Resolved(_))));
        assert_eq!(events.last(), Some(&ScanEvent::Stopped));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn resolve_failure_marks_scan_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = ScanRequest::new("bad\u{0}host", 1, 10);
        let report = scan(req, ScanOptions::default(), CancellationToken::new(), tx)
            .await
            .unwrap();
        assert_eq!(report.state, ScanState::Failed);
        assert!(report.target.is_none());
        assert!(matches!(rx.try_recv(), Ok(ScanEvent::ResolveFailed(_))));
        assert!(rx.try_recv().is_err());
    }
}
