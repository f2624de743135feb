//! AI Response Validation
//!
//! Tolerant JSON extraction followed by strict per-stage schema checks.
//! Extraction repairs formatting noise; it never invents content.
//! Every rejection is a `Format` error, which the retry policy retries
//! without backoff.

mod batch;
mod json_repair;

pub use batch::{BatchResults, BatchSchema};
pub use json_repair::{extract_json, extract_json_from_response};
