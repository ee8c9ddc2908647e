use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use chrono::Local;
use crosscheck_core::action;
use crosscheck_core::testing::{CancelToken, TestOrchestrator};

use crate::util;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Glob over case names, e.g. 'A/testfile1*'
    #[arg()] // positional argument
    pub filter: Option<String>,

    /// Only run cases of this library (dir relative to the test root)
    #[arg(short = 'l', long)]
    pub lib: Option<String>,

    /// Number of cases judged at once [default: judge.max_workers]
    #[arg(short = 'j', long)]
    pub jobs: Option<NonZeroUsize>,

    /// Per-process timeout in milliseconds [default: judge.timeout_ms]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Candidate project dir [default: project.dir]
    #[arg(short = 'p', long)]
    pub project: Option<PathBuf>,

    /// Write a JSON report of the run here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let mut cfg = util::load_config(global_args)?;
    if let Some(jobs) = args.jobs {
        cfg.judge.max_workers = jobs.get();
    }
    if let Some(ms) = args.timeout {
        cfg.judge.timeout_ms = ms;
    }

    let cases = action::find_cases(&cfg, args.lib.as_deref(), args.filter.as_deref())?;
    let max_workers = cfg.judge.max_workers;
    let orch = TestOrchestrator::for_project(cfg, args.project.as_ref().map(util::absolute))?;

    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted: waiting for running cases to finish");
                cancel.cancel();
            }
        }
    });

    let session = action::do_test(&orch, cases, max_workers, cancel).await?;

    if let Some(path) = &args.report {
        action::write_report(path, &orch, &session, Local::now())
            .with_context(|| format!("Cannot write report to {}", path.to_string_lossy()))?;
        log::info!("Report saved to {}", path.to_string_lossy());
    }

    if !session.build.as_ref().map_or(false, |b| b.success) {
        bail!("Candidate build failed");
    }
    if !session.all_passed() {
        bail!("{} of {} tests did not pass", session.summary.failed, session.summary.total());
    }
    Ok(())
}
