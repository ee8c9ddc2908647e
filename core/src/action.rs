pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use colored::Colorize;
use error::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::config::Config;
use crate::language::Language;
use crate::style;
use crate::testing::{
    BuildReport, CancelToken, Discovery, RunListener, RunSummary, TestCase, TestOrchestrator,
    TestResult,
};

/// Writes the example `crosscheck.toml` into `dir`.
pub fn init_config(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let path = dir.as_ref().join(Config::FILENAME);
    ensure!(!path.exists(), "Already exists: {}", path.to_string_lossy());
    fsutil::write_with_mkdir(&path, Config::example_toml())
        .context("Failed to write example config")?;
    Ok(path)
}

/// Cases under the configured test root, optionally narrowed to one library
/// and to names matching a glob.
pub fn find_cases(cfg: &Config, lib: Option<&str>, filter: Option<&str>) -> Result<Vec<TestCase>> {
    let root = cfg.testfiles_dir();
    let mut cases = Discovery::collect_all(&root)
        .with_context(|| format!("Failed to find test cases in {}", root.to_string_lossy()))?;

    if let Some(lib) = lib {
        let prefix = format!("{}/", lib.trim_end_matches('/'));
        cases.retain(|c| c.name.starts_with(&prefix));
    }
    if let Some(filter) = filter {
        let pat = glob::Pattern::new(filter)
            .with_context(|| format!("Invalid filter pattern '{}'", filter))?;
        cases.retain(|c| pat.matches(&c.name));
    }
    Ok(cases)
}

pub async fn do_build(orch: &TestOrchestrator) -> Result<BuildReport> {
    let report = orch.compile().await;
    if !report.success {
        style::print_build_failure(&report);
        bail!("Failed to build the candidate");
    }
    if !report.message.trim().is_empty() {
        log::debug!("build output:\n{}", report.message.trim_end());
    }
    Ok(report)
}

/// Everything one `test` invocation produced.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub build: Option<BuildReport>,
    pub summary: RunSummary,
    /// In discovery order.
    pub results: Vec<(String, TestResult)>,
}

impl TestSession {
    pub fn all_passed(&self) -> bool {
        self.build.as_ref().map_or(false, |b| b.success) && self.summary.failed == 0
    }
}

/// Shows live progress and keeps the results for the final report.
struct ProgressListener {
    bar: ProgressBar,
    build: Mutex<Option<BuildReport>>,
    results: Mutex<Vec<(String, TestResult)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunListener for ProgressListener {
    fn on_compile(&self, report: &BuildReport) {
        if report.success {
            self.bar.set_message("Running");
        }
        *lock(&self.build) = Some(report.clone());
    }

    fn on_result(&self, case: &TestCase, result: TestResult) {
        self.bar.println(style::result_line(&case.name, &result));
        lock(&self.results).push((case.name.clone(), result));
    }

    fn on_progress(&self, _fraction: f64, status: &str) {
        self.bar.inc(1);
        self.bar.set_message(status.to_owned());
    }
}

pub async fn do_test(
    orch: &TestOrchestrator,
    cases: Vec<TestCase>,
    max_workers: usize,
    cancel: CancelToken,
) -> Result<TestSession> {
    ensure!(!cases.is_empty(), "No test case matched");

    let style = ProgressStyle::default_bar()
        .template("{spinner} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .context("Invalid progress bar template")?
        .progress_chars("=> ");
    let bar = ProgressBar::new(cases.len() as u64)
        .with_style(style)
        .with_message("Building");
    bar.enable_steady_tick(Duration::from_millis(100));

    let order: Vec<String> = cases.iter().map(|c| c.name.clone()).collect();
    let listener = Arc::new(ProgressListener {
        bar: bar.clone(),
        build: Mutex::new(None),
        results: Mutex::new(Vec::new()),
    });

    log::info!("Testing {} cases with {} workers", cases.len(), max_workers);
    let summary = orch
        .run_all(cases, max_workers, listener.clone(), cancel.clone())
        .await;
    bar.finish_and_clear();

    let build = lock(&listener.build).take();
    let mut results = std::mem::take(&mut *lock(&listener.results));
    results.sort_by_key(|(name, _)| order.iter().position(|n| n == name));

    match &build {
        Some(b) if !b.success => style::print_build_failure(b),
        _ => {
            results
                .iter()
                .filter(|(_, r)| !r.passed())
                .for_each(|(name, r)| style::print_test_result_detail(name, r));
            if cancel.is_cancelled() {
                println!(
                    "{}",
                    format!("Cancelled: {} of {} cases ran", results.len(), order.len()).yellow()
                );
            }
            style::print_test_result_summary(&results);
        }
    }

    Ok(TestSession {
        build,
        summary,
        results,
    })
}

#[derive(Debug, Serialize)]
struct CaseReport<'a> {
    name: &'a str,
    #[serde(flatten)]
    result: &'a TestResult,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    generated_at: DateTime<Local>,
    project_dir: &'a Path,
    language: Language,
    build: Option<&'a BuildReport>,
    summary: RunSummary,
    cases: Vec<CaseReport<'a>>,
}

/// Writes `session` as JSON to `path`.
pub fn write_report(
    path: impl AsRef<Path>,
    orch: &TestOrchestrator,
    session: &TestSession,
    now: DateTime<Local>,
) -> Result<()> {
    let report = RunReport {
        generated_at: now,
        project_dir: orch.project_dir(),
        language: orch.language(),
        build: session.build.as_ref(),
        summary: session.summary,
        cases: session
            .results
            .iter()
            .map(|(name, result)| CaseReport { name, result })
            .collect(),
    };
    fsutil::write_json_with_mkdir(path.as_ref(), &report).context("Failed to write report")
}
