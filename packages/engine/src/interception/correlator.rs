// packages/engine/src/interception/correlator.rs
//! Request-lifecycle correlator
//!
//! Merges the three independently delivered phase events of each exchange
//! into one record. Events for different keys may interleave arbitrarily;
//! each key's pending record is only touched under its own shard lock in
//! the [`InFlightStore`], so unrelated requests proceed independently.
//!
//! # State machine (per key)
//!
//! ```text
//! ABSENT ──phase1──▶ PENDING ──phase2──▶ PENDING ──phase3──▶ FINALIZED ──▶ ABSENT
//!    ▲  (gate open, domain                 (optional)          (returned,
//!    │   not excluded)                                          removed)
//!    └── phase2 / phase3 without a pending record: no-op
//! ```

use crate::interception::domain_filter::DomainFilter;
use crate::interception::in_flight::InFlightStore;
use crate::interception::phase::{
    header_value, serialize_headers, BodySample, Header, HeadersReceived, RequestCompleted,
    RequestInitiated,
};
use crate::interception::request_url::RequestUrl;
use crate::observability::{IN_FLIGHT, ORPHANS_SWEPT, PHASES_RECEIVED, RECORDS_FINALIZED, REQUESTS_FILTERED};
use crate::recording::record::{fill, RequestRecord};
use chrono::Utc;
use metrics::{counter, gauge};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Characters of the response body kept as a preview
pub const PREVIEW_CHARS: usize = 16;

/// Monitoring gate shared between the control surface and the correlator
#[derive(Debug)]
pub struct MonitorState {
    monitoring: AtomicBool,
}

impl MonitorState {
    pub fn new(monitoring: bool) -> Self {
        Self {
            monitoring: AtomicBool::new(monitoring),
        }
    }

    /// Open the gate; returns `true` if it was closed
    pub fn start(&self) -> bool {
        !self.monitoring.swap(true, Ordering::SeqCst)
    }

    /// Close the gate; returns `true` if it was open
    pub fn stop(&self) -> bool {
        self.monitoring.swap(false, Ordering::SeqCst)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Why a phase event produced no state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The monitoring gate is closed
    MonitoringStopped,
    /// The request's domain is excluded
    DomainExcluded,
    /// Phase 1 for a key that is already pending
    DuplicateKey,
    /// Phase 2 or 3 for a key with no pending record
    UnknownKey,
}

/// Result of handling a phase-1 or phase-2 event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Accepted,
    Ignored(IgnoreReason),
}

impl PhaseOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PhaseOutcome::Accepted)
    }
}

#[derive(Default)]
struct Counters {
    phase1: AtomicU64,
    phase2: AtomicU64,
    phase3: AtomicU64,
    created: AtomicU64,
    gated: AtomicU64,
    filtered: AtomicU64,
    duplicates: AtomicU64,
    unknown_keys: AtomicU64,
    finalized: AtomicU64,
    swept: AtomicU64,
}

/// Correlator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub phase1_received: u64,
    pub phase2_received: u64,
    pub phase3_received: u64,
    pub created: u64,
    pub gated: u64,
    pub filtered: u64,
    pub duplicates: u64,
    pub unknown_keys: u64,
    pub finalized: u64,
    pub swept: u64,
    pub in_flight: usize,
}

/// Merges phase events into finalized records
pub struct Correlator {
    state: Arc<MonitorState>,
    filter: Arc<DomainFilter>,
    in_flight: InFlightStore,
    pending_ttl: Duration,
    counters: Counters,
}

impl Correlator {
    /// Create a correlator over a shared gate and domain filter
    pub fn new(state: Arc<MonitorState>, filter: Arc<DomainFilter>, pending_ttl: Duration) -> Self {
        Self {
            state,
            filter,
            in_flight: InFlightStore::new(),
            pending_ttl,
            counters: Counters::default(),
        }
    }

    /// Phase 1: create the pending record
    pub fn on_phase1(&self, key: &str, event: RequestInitiated) -> PhaseOutcome {
        counter!(PHASES_RECEIVED, "phase" => "request_initiated").increment(1);
        self.counters.phase1.fetch_add(1, Ordering::Relaxed);

        if !self.state.is_monitoring() {
            self.counters.gated.fetch_add(1, Ordering::Relaxed);
            return PhaseOutcome::Ignored(IgnoreReason::MonitoringStopped);
        }

        let url = RequestUrl::parse(&event.url);
        if self.filter.is_excluded(&url.domain) {
            debug!("Skipping {} for excluded domain {}", key, url.domain);
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            counter!(REQUESTS_FILTERED).increment(1);
            return PhaseOutcome::Ignored(IgnoreReason::DomainExcluded);
        }

        if self.in_flight.contains(key) {
            return self.duplicate(key);
        }

        let mut record = RequestRecord::pending(event.method, event.url, Utc::now());
        record.protocol = Some(url.protocol);
        record.port = url.port;
        record.filename = Some(url.filename);
        record.domain = Some(url.domain);
        record.tab_id = event.tab_id;
        record.window_id = event.window_id;
        record.request_headers = Some(serialize_headers(&event.request_headers));

        if !self.in_flight.create(key, record) {
            return self.duplicate(key);
        }

        self.counters.created.fetch_add(1, Ordering::Relaxed);
        gauge!(IN_FLIGHT).set(self.in_flight.len() as f64);
        PhaseOutcome::Accepted
    }

    /// Phase 2: merge response-side fields into the pending record
    pub fn on_phase2(&self, key: &str, event: HeadersReceived) -> PhaseOutcome {
        counter!(PHASES_RECEIVED, "phase" => "headers_received").increment(1);
        self.counters.phase2.fetch_add(1, Ordering::Relaxed);

        if self.in_flight.merge(key, |record| apply_response(record, &event)) {
            PhaseOutcome::Accepted
        } else {
            self.unknown(key, "headers-received");
            PhaseOutcome::Ignored(IgnoreReason::UnknownKey)
        }
    }

    /// Phase 3: merge final request fields, remove and return the finalized record
    pub fn on_phase3(&self, key: &str, event: RequestCompleted) -> Option<RequestRecord> {
        counter!(PHASES_RECEIVED, "phase" => "completed").increment(1);
        self.counters.phase3.fetch_add(1, Ordering::Relaxed);

        if !self.in_flight.contains(key) {
            self.unknown(key, "completed");
            return None;
        }

        // Digest before removal so the finalized record carries the body outcome.
        let (preview, checksum) = body_fields(key, event.body.as_ref());

        let Some(mut record) = self.in_flight.remove(key) else {
            self.unknown(key, "completed");
            return None;
        };

        apply_completion(&mut record, &event.request_headers);
        record.response_preview = preview;
        record.response_checksum = checksum;

        self.counters.finalized.fetch_add(1, Ordering::Relaxed);
        counter!(RECORDS_FINALIZED).increment(1);
        gauge!(IN_FLIGHT).set(self.in_flight.len() as f64);
        debug!("Finalized {} {} {}", key, record.method, record.url);

        Some(record)
    }

    /// Copy of the pending record for `key`, if any
    pub fn pending(&self, key: &str) -> Option<RequestRecord> {
        self.in_flight.get(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Reclaim pending records older than the configured TTL
    pub fn sweep_orphans(&self) -> usize {
        self.sweep_orphans_at(Instant::now())
    }

    /// Reclaim pending records older than the TTL as seen from `now`
    pub fn sweep_orphans_at(&self, now: Instant) -> usize {
        let evicted = self.in_flight.evict_expired(now, self.pending_ttl);
        if evicted > 0 {
            info!("Swept {} orphaned pending requests", evicted);
            self.counters.swept.fetch_add(evicted as u64, Ordering::Relaxed);
            counter!(ORPHANS_SWEPT).increment(evicted as u64);
            gauge!(IN_FLIGHT).set(self.in_flight.len() as f64);
        }
        evicted
    }

    /// Run the orphan sweep every `interval` until `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let correlator = Arc::clone(self);

        tokio::spawn(async move {
            info!(
                "Orphan sweeper running every {:?} (ttl {:?})",
                interval, correlator.pending_ttl
            );
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Orphan sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        correlator.sweep_orphans();
                    }
                }
            }
        })
    }

    /// Correlator statistics
    pub fn stats(&self) -> CorrelatorStats {
        let c = &self.counters;
        CorrelatorStats {
            phase1_received: c.phase1.load(Ordering::Relaxed),
            phase2_received: c.phase2.load(Ordering::Relaxed),
            phase3_received: c.phase3.load(Ordering::Relaxed),
            created: c.created.load(Ordering::Relaxed),
            gated: c.gated.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            unknown_keys: c.unknown_keys.load(Ordering::Relaxed),
            finalized: c.finalized.load(Ordering::Relaxed),
            swept: c.swept.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }

    fn duplicate(&self, key: &str) -> PhaseOutcome {
        debug!("Duplicate request-initiated for {}", key);
        self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
        PhaseOutcome::Ignored(IgnoreReason::DuplicateKey)
    }

    fn unknown(&self, key: &str, phase: &str) {
        debug!("No pending request for {} ({})", key, phase);
        self.counters.unknown_keys.fetch_add(1, Ordering::Relaxed);
    }
}

fn apply_response(record: &mut RequestRecord, event: &HeadersReceived) {
    let headers = &event.response_headers;

    if let Some(code) = event.status_code {
        fill(&mut record.response_code, code);
    }
    fill(&mut record.response_message, event.status_line.clone());
    fill(&mut record.response_headers, serialize_headers(headers));
    fill(&mut record.content_type, header_value(headers, "content-type").to_string());
    // Unparsable lengths degrade to 0.
    fill(
        &mut record.content_length,
        header_value(headers, "content-length").trim().parse().unwrap_or(0),
    );
    fill(&mut record.server, header_value(headers, "server").to_string());
    fill(&mut record.date, header_value(headers, "date").to_string());
    fill(&mut record.location, header_value(headers, "location").to_string());
    fill(&mut record.vary, header_value(headers, "vary").to_string());
}

fn apply_completion(record: &mut RequestRecord, headers: &[Header]) {
    if !headers.is_empty() {
        record.request_headers = Some(serialize_headers(headers));
    }
    fill(&mut record.user_agent, header_value(headers, "user-agent").to_string());
    fill(&mut record.referer, header_value(headers, "referer").to_string());
    fill(&mut record.origin, header_value(headers, "origin").to_string());
    fill(&mut record.cookie, header_value(headers, "cookie").to_string());
    fill(
        &mut record.x_forwarded_for,
        header_value(headers, "x-forwarded-for").to_string(),
    );
}

/// Preview and checksum for a body sample; both absent when no body was obtained
fn body_fields(key: &str, body: Option<&BodySample>) -> (Option<String>, Option<String>) {
    match body {
        Some(BodySample::Captured(bytes)) => {
            let head = &bytes[..bytes.len().min(PREVIEW_CHARS * 4)];
            let preview: String = String::from_utf8_lossy(head).chars().take(PREVIEW_CHARS).collect();
            let checksum = hex::encode(Sha256::digest(bytes));
            (Some(preview), Some(checksum))
        }
        Some(BodySample::Unavailable(reason)) => {
            debug!("Body unavailable for {}: {}", key, reason);
            (None, None)
        }
        None => (None, None),
    }
}
