//! HTTP surface for the `dfdetect` inference library.
//!
//! The gateway is a thin axum layer: it owns readiness, extracts image
//! bytes from uploads, and maps the library's error taxonomy onto HTTP
//! statuses. All pipeline behavior lives in `dfdetect`.

pub mod api;
pub mod gateway;
