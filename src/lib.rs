//! # venue_hindex
//!
//! Per-volume h-index of conference proceedings, from dblp listings and
//! Google Scholar citation counts.
//!
//! ## Modules
//!
//! - [`settings`] - Scrape settings file parser
//! - [`dblp`] - Volume resolution and paper extraction
//! - [`scholar`] - Citation lookup over a browser session
//! - [`challenge`] - CAPTCHA solver state machine
//! - [`store`] - Raw dataset persistence
//! - [`hindex`] - H-index aggregation
//! - [`pipeline`] - Scrape driver
//! - [`session`], [`http`], [`chrome`], [`transcribe`] - I/O capabilities
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use venue_hindex::hindex;
//!
//! fn main() -> venue_hindex::Result<()> {
//!     let stats = hindex::run(Path::new("raw_data.csv"), Path::new("conferences_h_indices.csv"))?;
//!     println!("{} volumes", stats.len());
//!     Ok(())
//! }
//! ```

pub mod challenge;
pub mod chrome;
pub mod dblp;
pub mod error;
pub mod hindex;
pub mod http;
pub mod pacing;
pub mod pipeline;
pub mod scholar;
pub mod session;
pub mod settings;
pub mod store;
pub mod transcribe;

pub use error::{HindexError, Result};
