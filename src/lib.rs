//! Turnstile - Request Admission Control
//!
//! This crate implements the layered admission-control subsystem protecting
//! the dating API: fixed-window throttling middleware keyed by principal or
//! network origin, a counter store with a shared (networked) and a local
//! (per-instance) implementation, privileged-identity bypass, and the
//! client-side protocol that cooperates with rejections (one forced
//! credential refresh and retry on a stale-credential response).

pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod store;
