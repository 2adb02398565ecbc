//! Low-level utilities shared across triage crates.
//!
//! Provides atomic file-write helpers used by the session ledger and unix-time
//! helpers used by rate-limit bookkeeping and record timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{read_text_if_exists, remove_stale_staging_files, write_text_atomic};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, millis_until_unix_ms};
