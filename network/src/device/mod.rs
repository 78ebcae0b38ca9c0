//! Device definitions.
//!
//! Register maps for the NICs whose accesses are intercepted.

pub mod registers;
