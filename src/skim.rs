//! Turn a list of NanoAOD datasets into batched skimming commands
//!
//! Each dataset gets a timestamped output directory. Every NanoAOD file in the dataset becomes
//! one processor command, and the commands are batched so that one condor job handles
//! `batch_size` files before copying its results from the node's scratch space.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone};
use log::{info, warn};

use crate::request::read::glob_paths;

/// Job name used for every skimming cluster
pub static SKIM_JOB_NAME: &str = "SkimNano";

#[derive(Debug, Clone)]
pub struct SkimRequest {
    /// Python script run on each file
    pub processor: String,
    pub output_base: PathBuf,
    /// Number of entries to process per file, -1 for all
    pub nentries: i64,
    /// Number of files processed in each job
    pub batch_size: usize,
}

/// Batched commands for one dataset
#[derive(Debug)]
pub struct DatasetJob {
    pub dataset: String,
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub command_sets: Vec<Vec<String>>,
}

impl SkimRequest {
    /// Create the output directory for a dataset and build its command sets
    pub fn prepare(&self, dataset: &str, datestring: &str) -> Result<DatasetJob> {
        if self.batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        let dataset = dataset.trim_end_matches('/');
        let short_name = Path::new(dataset)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .with_context(|| format!("Can't determine dataset name for {dataset}"))?;

        let output_dir = self.output_base.join(&short_name).join(datestring);
        if !output_dir.exists() {
            info!("Creating output directory {}", output_dir.display());
            fs::create_dir_all(&output_dir).with_context(|| format!("Can't create {}", output_dir.display()))?;
        }

        let files = find_nanoaod_files(Path::new(dataset))?;
        info!("Found {} NanoAOD files in {dataset}", files.len());

        let commands: Vec<String> = files
            .iter()
            .map(|file| format!("python {} -i {} -n {}", self.processor, file.display(), self.nentries))
            .collect();
        // results are written to the node's scratch space first
        let copy = format!("cp $TMPDIR/* {}/", output_dir.display());
        let command_sets = batch(&commands, self.batch_size, &copy);

        Ok(DatasetJob { dataset: dataset.to_string(), output_dir, files, command_sets })
    }
}

/// Timestamp used to keep output directories of separate submissions apart
pub fn datestring<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Find the NanoAOD files of a dataset
///
/// Datasets may contain an arbitrarily deep chain of sub folders with a single entry at each
/// level. The chain is followed (first entry when sorted) until a level holds files.
pub fn find_nanoaod_files(dataset: &Path) -> Result<Vec<PathBuf>> {
    if !dataset.is_dir() {
        bail!("Dataset {} is not a directory", dataset.display());
    }
    let mut dir = dataset.to_path_buf();
    let mut content = glob_paths(&dir, "*")?;
    while let Some(first) = content.first().filter(|p| p.is_dir()).cloned() {
        if content.len() > 1 {
            warn!("{} has more than one entry, only following {}", dir.display(), first.display());
        }
        dir = first;
        content = glob_paths(&dir, "*")?;
    }

    let files = glob_paths(&dir, "*NanoAOD*.root")?;
    Ok(files.into_iter().filter(|p| p.is_file()).collect())
}

/// Split commands into groups of `size`, appending `tail` to every group
pub fn batch(commands: &[String], size: usize, tail: &str) -> Vec<Vec<String>> {
    commands
        .chunks(size.max(1))
        .map(|chunk| {
            let mut set = chunk.to_vec();
            set.push(tail.to_string());
            set
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn batches_end_with_copy() {
        let commands: Vec<String> = (0..5).map(|i| format!("cmd {i}")).collect();
        let sets = batch(&commands, 2, "cp");
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0], vec!["cmd 0", "cmd 1", "cp"]);
        assert_eq!(sets[2], vec!["cmd 4", "cp"]);
        assert!(batch(&[], 2, "cp").is_empty());
    }

    #[test]
    fn follows_single_folder_chain() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("TTTo2L2Nu");
        fs::create_dir_all(dataset.join(".snapshot/old")).unwrap();
        let leaf = dataset.join("crab_TTTo2L2Nu/230101_120000/0000");
        touch(&leaf.join("tree_NanoAODv9_1.root"));
        touch(&leaf.join("tree_NanoAODv9_2.root"));
        touch(&leaf.join("log_NanoAOD.tar.gz"));
        touch(&leaf.join("other.root"));
        touch(&leaf.join(".tree_NanoAODv9_3.root"));

        let files = find_nanoaod_files(&dataset).unwrap();
        assert_eq!(files, vec![leaf.join("tree_NanoAODv9_1.root"), leaf.join("tree_NanoAODv9_2.root")]);
    }

    #[test]
    fn empty_dataset() {
        let dir = TempDir::new().unwrap();
        assert!(find_nanoaod_files(dir.path()).unwrap().is_empty());
        assert!(find_nanoaod_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn prepare_dataset() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("input/DoubleMuon");
        touch(&dataset.join("a_NanoAOD.root"));
        touch(&dataset.join("b_NanoAOD.root"));
        touch(&dataset.join("c_NanoAOD.root"));

        let request = SkimRequest {
            processor: "condor/condorrun.py".to_string(),
            output_base: dir.path().join("output"),
            nentries: -1,
            batch_size: 2,
        };
        let job = request.prepare(&format!("{}/", dataset.display()), "20240101_000000").unwrap();

        let output_dir = dir.path().join("output/DoubleMuon/20240101_000000");
        assert!(output_dir.is_dir());
        assert_eq!(job.output_dir, output_dir);
        assert_eq!(job.files.len(), 3);
        assert_eq!(job.command_sets.len(), 2);
        assert_eq!(
            job.command_sets[0][0],
            format!("python condor/condorrun.py -i {} -n -1", dataset.join("a_NanoAOD.root").display())
        );
        assert_eq!(job.command_sets[1].last().unwrap(), &format!("cp $TMPDIR/* {}/", output_dir.display()));
    }

    #[test]
    fn zero_batch_size() {
        let dir = TempDir::new().unwrap();
        let request = SkimRequest {
            processor: "run.py".to_string(),
            output_base: dir.path().to_path_buf(),
            nentries: -1,
            batch_size: 0,
        };
        assert!(request.prepare("/some/dataset", "x").is_err());
    }

    #[test]
    fn datestring_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(datestring(&now), "20240307_090501");
    }
}
