//! # Segmerge
//!
//! Segment merge and document reclaim for append-only search indexes.
//!
//! ## Features
//!
//! - Old-to-new doc id remapping with deleted and superseded documents dropped
//! - Pluggable split strategies for spreading documents over target segments
//! - Attribute, inverted index and stored document reducers
//! - Top-K truncated index copies ranked by a sort attribute
//! - Memory-bounded task scheduling and resumable plans
//! - Pluggable storage backends

pub mod cli;
pub mod config;
pub mod error;
pub mod merge;
pub mod segment;
pub mod storage;
pub mod truncate;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
