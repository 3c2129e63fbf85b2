use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use rusqlite::Connection;

use crate::condor::cluster::{PartialSubmission, SubmittedJob, Submitter};
use crate::condor::submit::{CondorCli, DryRun, Scheduler};
use crate::condor::{JobLayout, OutputNames, Resources};
use crate::config::Environment;
use crate::db::open::{open_db, release_or_rollback};
use crate::db::submission::load::get_submissions;
use crate::mode::GroupingMode;
use crate::monitor::crab::CrabCli;
use crate::monitor::{run_loop, MonitorOptions};
use crate::request::read::{read_command_sets, read_sample_list};
use crate::sample::SampleParams;
use crate::skim::{datestring, SkimRequest, SKIM_JOB_NAME};

mod condor;
mod config;
mod db;
mod mode;
mod monitor;
mod request;
mod sample;
mod skim;

/// Generate, submit and monitor batch jobs for NanoAOD skimming
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit the commands in a file (one per line, blank lines separate sets) as condor jobs
    Submit {
        /// File with commands to run
        commands: PathBuf,
        /// Job name, used for script, description and log file names
        #[arg(short, long, default_value = "job")]
        name: String,
        /// How commands are grouped into jobs
        #[arg(short, long, value_enum, default_value_t = GroupingMode::Sets)]
        mode: GroupingMode,
        /// Directory jobs run in (sets mode only, default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Submit an existing executable script as a single condor job
    Script {
        script: PathBuf,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Skim the NanoAOD files of every dataset in a sample list
    Skim {
        /// File with dataset names to process, each a locally accessible path (e.g. on /pnfs)
        #[arg(short, long)]
        samplelist: PathBuf,
        /// Python script to run on each file
        #[arg(short, long, default_value = "condor/condorrun.py")]
        processor: String,
        /// Output directory (default: /pnfs/iihe/cms/store/user/$USER/nanoaodskims)
        #[arg(short, long)]
        outputdir: Option<PathBuf>,
        /// Number of entries to process per file, -1 for all
        #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
        nentries: i64,
        /// Number of files processed in each job
        #[arg(short, long, default_value_t = 50)]
        batchsize: usize,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Print year, data type, campaign and run period of sample names as JSON
    Sample {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Monitor crab tasks and publish their status to ~/public_html/<webpage>
    Monitor {
        /// Main crab folder containing the task folders of all samples
        #[arg(short, long)]
        crabdir: PathBuf,
        /// Resubmit failed jobs
        #[arg(short, long)]
        resubmit: bool,
        /// Path to your proxy (default: don't export a proxy explicitly)
        #[arg(short, long)]
        proxy: Option<PathBuf>,
        /// Name of the webpage where the results are displayed
        #[arg(short, long, default_value = "crab_status")]
        webpage: String,
        /// Only process one sample
        #[arg(short = 't', long)]
        test: bool,
        /// Write the web page even if the status of some samples could not be retrieved
        #[arg(short, long)]
        force: bool,
        /// Print raw output of the crab status command
        #[arg(long)]
        printraw: bool,
        /// Number of monitoring iterations
        #[arg(short = 'n', long, default_value_t = 1)]
        niterations: usize,
        /// Seconds between iterations
        #[arg(long, default_value_t = 3600)]
        tsleep: u64,
    },
    /// List recorded submissions, newest first
    History {
        #[arg(long, default_value = "Scripts/condor")]
        script_folder: PathBuf,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

/// Options shared by every command that writes and submits condor jobs
#[derive(Debug, Args)]
struct JobArgs {
    /// Folder for generated scripts, job descriptions and the submission database
    #[arg(long, default_value = "Scripts/condor")]
    script_folder: PathBuf,
    /// Folder for job output, error and log files, relative to the current directory
    #[arg(long)]
    log_folder: Option<PathBuf>,
    /// Override the job stdout file name
    #[arg(long)]
    stdout: Option<String>,
    /// Override the job stderr file name
    #[arg(long)]
    stderr: Option<String>,
    /// Override the condor log file name
    #[arg(long)]
    log: Option<String>,
    #[arg(long)]
    cpus: Option<u32>,
    /// Requested memory in MB
    #[arg(long)]
    memory: Option<u32>,
    /// Requested disk in KB
    #[arg(long)]
    disk: Option<u32>,
    /// Write scripts and descriptions but don't submit them
    #[arg(long)]
    dry_run: bool,
}

impl JobArgs {
    fn layout(&self, env: &Environment) -> JobLayout {
        let log_folder = self.log_folder.clone().unwrap_or_default();
        let mut layout = JobLayout::new(&self.script_folder, &log_folder, &env.cwd);
        layout.outputs = OutputNames { stdout: self.stdout.clone(), stderr: self.stderr.clone(), log: self.log.clone() };
        layout.resources = Resources { cpus: self.cpus, memory: self.memory, disk: self.disk };
        layout
    }

    fn scheduler(&self) -> Box<dyn Scheduler> {
        match self.dry_run {
            true => Box::new(DryRun),
            false => Box::new(CondorCli::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("condorskim starting up");

    let cli = Cli::parse();
    info!("Running with {:?}", &cli.command);
    let env = Environment::from_env()?;

    match cli.command {
        Command::Monitor { crabdir, resubmit, proxy, webpage, test, force, printraw, niterations, tsleep } => {
            if let Some(proxy) = &proxy {
                if !proxy.exists() {
                    bail!("Provided proxy {} does not exist", proxy.display());
                }
            }
            let crab = CrabCli { proxy, verbose: printraw, ..CrabCli::default() };
            let options = MonitorOptions {
                crab_dir: env.absolute(&crabdir),
                web_path: env.home.join("public_html").join(&webpage),
                resubmit,
                test,
                force,
                print_raw: printraw,
                meta: vec![
                    ("generating program".to_string(), format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
                    ("command-line arguments".to_string(), std::env::args().collect::<Vec<String>>().join(" ")),
                ],
            };
            run_loop(&crab, &options, niterations, Duration::from_secs(tsleep)).await
        }
        // condor_submit and the ledger block, keep them off the runtime threads
        command => tokio::task::spawn_blocking(move || run_blocking(&env, command)).await?,
    }
}

fn run_blocking(env: &Environment, command: Command) -> Result<()> {
    match command {
        Command::Submit { commands, name, mode, cwd, job } => {
            submit(env, &job, &commands, &name, mode, cwd.as_deref())
        }
        Command::Script { script, job } => submit_script(env, &job, &script),
        Command::Skim { samplelist, processor, outputdir, nentries, batchsize, job } => {
            let output_base = outputdir
                .unwrap_or_else(|| PathBuf::from(format!("/pnfs/iihe/cms/store/user/{}/nanoaodskims", env.user)));
            let request = SkimRequest { processor, output_base, nentries, batch_size: batchsize };
            skim(env, &job, &samplelist, &request)
        }
        Command::Sample { names } => print_samples(&names),
        Command::History { script_folder, limit } => print_history(&script_folder, limit),
        Command::Monitor { .. } => bail!("monitor runs on the async runtime"),
    }
}

fn submit(env: &Environment, job: &JobArgs, commands: &Path, name: &str, mode: GroupingMode, cwd: Option<&Path>) -> Result<()> {
    let sets = read_command_sets(commands)?;
    let all: Vec<String> = sets.concat();
    info!("Submitting {} commands in {} sets as {mode}", all.len(), sets.len());

    let layout = job.layout(env);
    let conn = open_db(&layout.script_folder)?;
    let scheduler = job.scheduler();
    let submitter = Submitter::new(&layout, env, scheduler.as_ref());

    let submitted = match mode {
        GroupingMode::Job if all.len() == 1 => submitter.submit_command_as_job(name, &all[0]),
        GroupingMode::Job => submitter.submit_commands_as_job(name, &all),
        GroupingMode::Jobs => submitter.submit_commands_as_jobs(name, &sets),
        GroupingMode::Cluster => submitter.submit_commands_as_cluster(name, &all),
        GroupingMode::Sets => submitter.submit_command_sets_as_cluster(name, &sets, cwd),
    };
    finish(&conn, submitted, job.dry_run)
}

fn submit_script(env: &Environment, job: &JobArgs, script: &Path) -> Result<()> {
    let layout = job.layout(env);
    let conn = open_db(&layout.script_folder)?;
    let scheduler = job.scheduler();
    let submitter = Submitter::new(&layout, env, scheduler.as_ref());
    let submitted = submitter.submit_script_as_job(script);
    finish(&conn, submitted, job.dry_run)
}

fn skim(env: &Environment, job: &JobArgs, samplelist: &Path, request: &SkimRequest) -> Result<()> {
    if !env.has_cmsenv() {
        warn!("CMSSW_BASE {} does not contain the current directory, jobs may not find your release", env.cmssw_base);
    }

    let datasets = read_sample_list(samplelist)?;
    info!("Found following datasets:");
    for dataset in &datasets {
        info!("  - {dataset}");
    }

    let layout = job.layout(env);
    let conn = open_db(&layout.script_folder)?;
    let scheduler = job.scheduler();
    let submitter = Submitter::new(&layout, env, scheduler.as_ref());

    let datestring = datestring(&Local::now());
    let mut submitted = Vec::new();
    for dataset in &datasets {
        match skim_dataset(&submitter, request, dataset, &datestring) {
            Ok(jobs) => submitted.extend(jobs),
            Err(err) => return finish(&conn, Err(PartialSubmission::wrap(submitted, err)), job.dry_run),
        }
    }
    finish(&conn, Ok(submitted), job.dry_run)
}

fn skim_dataset(submitter: &Submitter, request: &SkimRequest, dataset: &str, datestring: &str) -> Result<Vec<SubmittedJob>> {
    let dataset_job = request.prepare(dataset, datestring)?;
    if dataset_job.command_sets.is_empty() {
        warn!("No NanoAOD files found for {}, skipping", dataset_job.dataset);
        return Ok(Vec::new());
    }
    info!("Writing output of {} to {}", dataset_job.dataset, dataset_job.output_dir.display());
    submitter.submit_command_sets_as_cluster(SKIM_JOB_NAME, &dataset_job.command_sets, None)
}

/// Record the submitted jobs, including those accepted before a failure
fn finish(conn: &Connection, submitted: Result<Vec<SubmittedJob>>, dry_run: bool) -> Result<()> {
    match submitted {
        Ok(submitted) => record(conn, &submitted, dry_run),
        Err(err) => {
            let accepted = PartialSubmission::accepted(&err);
            if !accepted.is_empty() {
                warn!("Recording {} job description(s) accepted before the failure", accepted.len());
                record(conn, accepted, dry_run)?;
            }
            Err(err)
        }
    }
}

fn record(conn: &Connection, submitted: &[SubmittedJob], dry_run: bool) -> Result<()> {
    for job in submitted {
        job.record(conn)?;
    }
    release_or_rollback(conn, dry_run)?;
    info!("{} job description(s) handled", submitted.len());
    Ok(())
}

fn print_samples(names: &[String]) -> Result<()> {
    let mut failed = 0;
    for name in names {
        match SampleParams::from_name(name) {
            Ok(params) => println!("{}", serde_json::to_string(&params)?),
            Err(err) => {
                warn!("{err}");
                failed += 1;
            }
        }
    }
    match failed {
        0 => Ok(()),
        _ => bail!("{failed} of {} sample names could not be parsed", names.len()),
    }
}

fn print_history(script_folder: &Path, limit: usize) -> Result<()> {
    let conn = open_db(script_folder)?;
    let records = get_submissions(&conn, limit)?;
    release_or_rollback(&conn, false)?;
    if records.is_empty() {
        println!("No submissions recorded in {}", script_folder.display());
        return Ok(());
    }
    for r in records {
        let cluster = r.cluster_id.map(|id| id.to_string()).unwrap_or_else(|| "dry-run".to_string());
        println!("{}\t{}\t{}\t{} job(s)\t{}\t{}", r.submitted_at, r.batch_name, cluster, r.n_jobs, r.description, r.script);
    }
    Ok(())
}
