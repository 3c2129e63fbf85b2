use std::path::Path;

use log::debug;

use crate::condor::ClusterError;

/// Maximum number appended before giving up
pub static MAX_UNIQUE: usize = 2500;

/// Make a file name unique within a folder by appending a number to the stem
///
/// `test.txt` becomes `test0.txt`, or `test1.txt` if that already exists, and so on. A number is
/// always appended, even when the bare name is free, so names stay consistent across submissions.
pub fn make_unique(file_name: &str, folder: &Path) -> Result<String, ClusterError> {
    let path = Path::new(file_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    for n in 0..MAX_UNIQUE {
        let candidate = format!("{stem}{n}{ext}");
        if !folder.join(&candidate).exists() {
            debug!("Unique name for {file_name}: {candidate}");
            return Ok(candidate);
        }
    }

    Err(ClusterError::NamesExhausted { name: file_name.to_string(), limit: MAX_UNIQUE })
}
