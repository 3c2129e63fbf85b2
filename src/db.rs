//! Submitted job descriptions are recorded in a SQLite database next to the generated scripts

/// Connect to a SQLite database
pub mod open;
/// Record and load submissions
pub mod submission;
