//! # Hawser Platform
//!
//! Core platform types for the Hawser SSH stack.
//!
//! This crate provides the unified error type (`HawserError`,
//! `HawserResult`) shared by every Hawser crate.
//!
//! # Examples
//!
//! ```
//! use hawser_platform::{HawserError, HawserResult};
//!
//! fn example_function() -> HawserResult<String> {
//!     Ok("Hello, Hawser!".to_string())
//! }
//!
//! # fn main() -> HawserResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, Hawser!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{HawserError, HawserResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
