//! Derive year, data type and campaign from a sample name
//!
//! Not guaranteed to be complete, extend the tag tables when encountering more exotic sample
//! names. Matching is case insensitive.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("could not determine {field} for sample {sample}, found candidates {candidates:?}")]
    Ambiguous { field: &'static str, sample: String, candidates: Vec<String> },
    #[error("could not determine run period for sample {0}; make sure sample names for data follow the Run[YEAR][PERIOD] format with period a single capital letter for the era")]
    RunPeriod(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleParams {
    pub year: String,
    pub dtype: String,
    pub campaign: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runperiod: Option<char>,
}

/// How the tags of a rule are combined
#[derive(Clone, Copy)]
enum Match {
    All,
    Any,
}

struct Rule {
    tags: &'static [&'static str],
    mode: Match,
    year: &'static str,
    dtype: &'static str,
    campaign: &'static str,
}

static RULES: &[Rule] = &[
    // Run-2 ultra-legacy data
    Rule { tags: &["HIPM_UL2016", "Run2016"], mode: Match::All, year: "2016PreVFP", dtype: "data", campaign: "run2ul" },
    Rule { tags: &["-UL2016", "Run2016"], mode: Match::All, year: "2016PreVFP", dtype: "data", campaign: "run2ul" },
    Rule { tags: &["UL2017", "Run2017"], mode: Match::All, year: "2017", dtype: "data", campaign: "run2ul" },
    Rule { tags: &["UL2018", "Run2018"], mode: Match::All, year: "2018", dtype: "data", campaign: "run2ul" },
    // Run-2 ultra-legacy simulation
    Rule {
        tags: &["RunIISummer20UL16APV", "Run2SIM_UL2016PreVFP", "PreVFP"],
        mode: Match::Any,
        year: "2016PreVFP",
        dtype: "sim",
        campaign: "run2ul",
    },
    Rule {
        tags: &["RunIISummer20UL16NanoAOD", "Run2SIM_UL2016PostVFP", "Run2SIM_UL2016Mini", "PostVFP"],
        mode: Match::Any,
        year: "2016PostVFP",
        dtype: "sim",
        campaign: "run2ul",
    },
    Rule { tags: &["RunIISummer20UL17", "Run2SIM_UL2017"], mode: Match::Any, year: "2017", dtype: "sim", campaign: "run2ul" },
    Rule { tags: &["RunIISummer20UL18", "Run2SIM_UL2018"], mode: Match::Any, year: "2018", dtype: "sim", campaign: "run2ul" },
    // Run-2 pre-ultra-legacy simulation
    Rule { tags: &["RunIISummer16NanoAOD"], mode: Match::Any, year: "2016", dtype: "sim", campaign: "run2preul" },
    Rule { tags: &["RunIIFall17NanoAOD"], mode: Match::Any, year: "2017", dtype: "sim", campaign: "run2preul" },
    Rule { tags: &["RunIIAutumn18NanoAOD"], mode: Match::Any, year: "2018", dtype: "sim", campaign: "run2preul" },
];

impl Rule {
    fn matches(&self, sample: &str) -> bool {
        let mut tags = self.tags.iter().map(|tag| sample.contains(&tag.to_lowercase()));
        match self.mode {
            Match::All => tags.all(|m| m),
            Match::Any => tags.any(|m| m),
        }
    }
}

impl SampleParams {
    pub fn from_name(sample: &str) -> Result<SampleParams, SampleError> {
        let lower = sample.to_lowercase();
        let matched: Vec<&Rule> = RULES.iter().filter(|rule| rule.matches(&lower)).collect();

        let year = unique(sample, "year", matched.iter().map(|r| r.year))?;
        let dtype = unique(sample, "data type", matched.iter().map(|r| r.dtype))?;
        let campaign = unique(sample, "campaign", matched.iter().map(|r| r.campaign))?;

        let runperiod = match dtype.as_str() {
            "data" => Some(run_period(sample)?),
            _ => None,
        };

        Ok(SampleParams { year, dtype, campaign, runperiod })
    }
}

/// Require exactly one distinct candidate
fn unique<'a>(
    sample: &str,
    field: &'static str,
    candidates: impl Iterator<Item = &'a str>,
) -> Result<String, SampleError> {
    let distinct: BTreeSet<&str> = candidates.collect();
    match distinct.len() {
        1 => Ok(distinct.into_iter().next().unwrap_or_default().to_string()),
        _ => Err(SampleError::Ambiguous {
            field,
            sample: sample.to_string(),
            candidates: distinct.into_iter().map(str::to_string).collect(),
        }),
    }
}

/// The era letter following the four year digits after the last `Run`, e.g. `Run2017B` -> `B`
fn run_period(sample: &str) -> Result<char, SampleError> {
    let after_run = sample.rsplit("Run").next().unwrap_or_default();
    match after_run.chars().nth(4) {
        Some(period) if period.is_ascii_uppercase() => Ok(period),
        _ => Err(SampleError::RunPeriod(sample.to_string())),
    }
}
