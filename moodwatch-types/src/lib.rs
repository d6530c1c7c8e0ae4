//! # moodwatch-types
//!
//! Core types shared by every moodwatch crate: the persisted [`Sample`], its
//! directional [`Status`], the [`SampleEvent`] pushed to live subscribers and
//! the [`Aggregate`] returned by statistical queries.
//!
//! ## Features
//!
//! - `serde`: JSON serialization of samples, events and aggregates
//!
//! ## Example
//!
//! ```rust
//! use moodwatch_types::{classify, Status};
//!
//! assert_eq!(classify(None, 42.0), Status::Same);
//! assert_eq!(classify(Some(40.0), 42.0), Status::Up);
//! assert_eq!(classify(Some(45.0), 42.0), Status::Down);
//! ```

mod aggregate;
mod sample;
mod status;
pub mod time;

pub use aggregate::*;
pub use sample::*;
pub use status::*;

/// Value reported to new subscribers before any sample has been stored.
pub const SENTINEL_VALUE: f64 = 50.0;
