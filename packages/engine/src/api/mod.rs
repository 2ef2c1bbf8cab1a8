// packages/engine/src/api/mod.rs
//! HTTP API
//!
//! JSON-over-HTTP transport for the inbound phase events and the control
//! surface of the [`Monitor`](crate::monitor::Monitor).

pub mod http_server;

pub use http_server::HttpServer;
