//! Shared runtime pieces for vpnshim.
//!
//! Everything here runs inside the hypervisor, so the crate is `no_std` and
//! never allocates.

#![cfg_attr(not(test), no_std)]

pub mod logger;

pub use logger::{get_last_n_logs, get_logs_iter, init, log_count, total_log_count, LogEntry};
