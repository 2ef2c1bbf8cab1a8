// packages/engine/src/interception/mod.rs
//! Request lifecycle interception
//!
//! Browser-side hooks report each request in three phases keyed by an
//! opaque request id. This module correlates them into one record:
//!
//! - **Phase**: Event payloads for the three phases
//! - **Request URL**: Protocol, domain, port and filename parsing
//! - **Domain Filter**: Persisted set of excluded domains
//! - **In-Flight Store**: Partially built records awaiting completion
//! - **Correlator**: Phase handling, finalization and orphan sweeping
//!
//! # Architecture
//!
//! ```text
//! phase 1 (initiated) ─┐
//! phase 2 (headers)  ──┼─→ Correlator ─→ InFlightStore ─→ RequestRecord
//! phase 3 (completed) ─┘        │
//!                          DomainFilter
//! ```

pub mod correlator;
pub mod domain_filter;
pub mod in_flight;
pub mod phase;
pub mod request_url;

// Re-export commonly used types
pub use correlator::{Correlator, CorrelatorStats, IgnoreReason, MonitorState, PhaseOutcome};
pub use domain_filter::DomainFilter;
pub use in_flight::InFlightStore;
pub use phase::{BodySample, Header, HeadersReceived, RequestCompleted, RequestInitiated};
pub use request_url::RequestUrl;
