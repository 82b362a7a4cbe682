//! Resilience helpers.
//!
//! # Design Decisions
//! - Accept failures (fd exhaustion and the like) are usually temporary, so
//!   the serve loop backs off and retries instead of giving up

pub mod backoff;
