//! Result type alias for supervisor operations.
//!
//! ```rust
//! use brood::Result;
//!
//! fn my_function() -> Result<u32> {
//!     Ok(7)
//! }
//! ```

/// Convenience alias for `std::result::Result<T, crate::Error>`.
pub type Result<T, E = crate::Error> = std::result::Result<T, E>;
