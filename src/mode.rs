use std::fmt;
use clap::ValueEnum;

/// How the commands of a command file are grouped into condor jobs
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum GroupingMode {
    /// Every command in one job
    Job,
    /// One job per command set
    Jobs,
    /// One cluster, one job per command (same executable and argument count)
    Cluster,
    /// One cluster, one job per command set
    Sets,
}

impl fmt::Display for GroupingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GroupingMode::Job => write!(f, "job"),
            GroupingMode::Jobs => write!(f, "jobs"),
            GroupingMode::Cluster => write!(f, "cluster"),
            GroupingMode::Sets => write!(f, "sets"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_cli_names() {
        for mode in GroupingMode::value_variants() {
            let parsed = GroupingMode::from_str(&mode.to_string(), false).unwrap();
            assert_eq!(&parsed, mode);
        }
    }
}
