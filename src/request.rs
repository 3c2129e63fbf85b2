//! Read what the user asks to run: command files, sample lists and dataset folders

/// Parse command files and sample lists, list dataset folders
pub mod read;
