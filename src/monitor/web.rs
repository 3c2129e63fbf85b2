use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::monitor::status::TaskStatus;

/// Progress bar colours, stacked left to right in this order
static BAR_COLORS: [(&str, &str); 4] = [
    ("finished", "lightgreen"),
    ("transferring", "turquoise"),
    ("running", "deepskyblue"),
    ("failed", "crimson"),
];

/// Everything gathered in one monitoring pass
///
/// Sample keys are task folders relative to the crab directory: `production/sample/version`.
#[derive(Debug, Default, Serialize)]
pub struct MonitorData {
    pub meta: BTreeMap<String, String>,
    pub samples: BTreeMap<String, TaskStatus>,
}

/// Rendering context for the status page
#[derive(Serialize)]
struct PageContext {
    style: &'static str,
    updated: String,
    meta: Vec<MetaEntry>,
    samples: Vec<SampleRow>,
}

#[derive(Serialize)]
struct MetaEntry {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct SampleRow {
    short_name: String,
    short_version: String,
    summary: String,
    grafana: String,
    bars: Vec<Bar>,
}

#[derive(Serialize)]
struct Bar {
    left: f64,
    width: f64,
    color: &'static str,
}

/// Write `index.html` and a `status.json` snapshot to `web_path`
///
/// Refuses to overwrite the page when a sample's status can no longer be retrieved, unless
/// `force` is set, so that old submissions don't show up as 0% finished.
pub fn write_page(data: &MonitorData, web_path: &Path, force: bool, now: &DateTime<Local>) -> Result<PathBuf> {
    if !force {
        if let Some((sample, _)) = data.samples.iter().find(|(_, task)| task.is_irretrievable()) {
            bail!(
                "The status for sample {sample} seems to be irretrievable, perhaps the submission is too long ago? \
                 Will not update the webpage to avoid overwriting useful information (use --force to override)."
            );
        }
    }

    if !web_path.exists() {
        fs::create_dir_all(web_path).with_context(|| format!("Can't create {}", web_path.display()))?;
    }

    let page = render_page(data, now)?;
    let index = web_path.join("index.html");
    fs::write(&index, page).with_context(|| format!("Can't write {}", index.display()))?;
    info!("Sample status written to {}", index.display());

    let snapshot = web_path.join("status.json");
    fs::write(&snapshot, serde_json::to_string_pretty(data)?)
        .with_context(|| format!("Can't write {}", snapshot.display()))?;

    Ok(index)
}

/// Render the status page using TinyTemplate
fn render_page(data: &MonitorData, now: &DateTime<Local>) -> Result<String> {
    /// included page template
    static PAGE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/index.html"));
    /// included style sheet, kept out of the template because of its braces
    static STYLE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/style.css"));

    let mut tt = TinyTemplate::new();
    tt.add_formatter("unescaped", format_unescaped);
    tt.add_template("page", PAGE)?;

    let meta = data
        .meta
        .iter()
        .map(|(key, value)| MetaEntry { key: key.clone(), value: value.clone() })
        .collect();

    let mut keys: Vec<&String> = data.samples.keys().collect();
    keys.sort_by_key(|k| k.to_lowercase());
    let samples = keys.into_iter().map(|key| sample_row(key, &data.samples[key])).collect();

    let context = PageContext {
        style: STYLE,
        updated: now.format("%d/%m/%Y %H:%M:%S").to_string(),
        meta,
        samples,
    };
    Ok(tt.render("page", &context)?)
}

fn sample_row(key: &str, task: &TaskStatus) -> SampleRow {
    let parts: Vec<&str> = key.split('/').collect();
    let sample = parts.get(1).copied().unwrap_or(key);
    let version = parts.get(2).copied().unwrap_or_default();

    SampleRow {
        short_name: sample.split('_').next().unwrap_or(sample).to_string(),
        short_version: version.replace("crab_", "").split('-').next().unwrap_or_default().to_string(),
        summary: task.summary(),
        grafana: task.grafana.clone(),
        bars: progress_bars(task),
    }
}

/// Stack the known states as adjacent bars
fn progress_bars(task: &TaskStatus) -> Vec<Bar> {
    let mut left = 0.0;
    let mut bars = Vec::new();
    for (state, color) in BAR_COLORS {
        if !task.status.contains_key(state) {
            continue;
        }
        let width = task.fraction(state);
        bars.push(Bar { left, width, color });
        left += width;
    }
    bars
}
