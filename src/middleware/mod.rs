//! # Middleware
//!
//! Cross-cutting request handling wrapped around every route.

pub mod tracking;

pub use tracking::RequestTracking;
