use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::{glob_with, GlobError, MatchOptions, Pattern};
use log::info;

/// Sorted paths below `dir` matching a glob pattern
///
/// Like a shell glob, a wildcard never matches the leading dot of a hidden entry.
pub fn glob_paths(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{pattern}", Pattern::escape(&dir.to_string_lossy()));
    let options = MatchOptions { require_literal_leading_dot: true, ..MatchOptions::new() };
    let mut paths = glob_with(&full, options)
        .with_context(|| format!("Invalid glob pattern {full}"))?
        .collect::<Result<Vec<PathBuf>, GlobError>>()?;
    paths.sort();
    Ok(paths)
}

/// Read a command file into command sets
///
/// One command per line, blank lines separate sets and `#` starts a comment line.
pub fn read_command_sets(path: &Path) -> Result<Vec<Vec<String>>> {
    info!("Reading commands from {}", path.display());
    let content = fs::read_to_string(path).with_context(|| format!("Can't read command file {}", path.display()))?;
    Ok(parse_command_sets(&content))
}

fn parse_command_sets(content: &str) -> Vec<Vec<String>> {
    let mut sets = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                sets.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(line.to_string());
    }
    if !current.is_empty() {
        sets.push(current);
    }
    sets
}

/// Read dataset names from a sample list
///
/// Empty lines and lines starting with `#` are skipped, only the first word of a line is kept.
pub fn read_sample_list(path: &Path) -> Result<Vec<String>> {
    info!("Reading sample list {}", path.display());
    let content = fs::read_to_string(path).with_context(|| format!("Can't read sample list {}", path.display()))?;
    Ok(parse_sample_list(&content))
}

fn parse_sample_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
