//! Output writers for batch results.
//!
//! # Submodules
//!
//! - [`json`]: Writes `Vec<ProcessingResult>` as a JSON array to a file or stdout
//!
//! # Output Structure
//!
//! ```text
//! [
//!   {"url": "...", "record": {...}, "status": "success", "strategy_used": "full_scrape"},
//!   {"url": "...", "record": null, "status": "error_fetch", "strategy_used": "full_scrape",
//!    "error_detail": "..."}
//! ]
//! ```

pub mod json;
