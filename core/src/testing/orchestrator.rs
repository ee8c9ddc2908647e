use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use tokio::sync::Mutex;

use super::{
    candidate::BuiltArtifact,
    case_runner::CaseRunner,
    pool::{run_pool, CancelToken, RunListener, RunSummary},
    testcase::TestCase,
};
use crate::config::Config;
use crate::language::{DetectError, Language};
use crate::process::{ProcessRunner, ProcessSpec};

/// Outcome of building the candidate. `message` holds the build's combined
/// stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub success: bool,
    pub message: String,
    pub artifact: Option<PathBuf>,
}

impl BuildReport {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            artifact: None,
        }
    }
}

/// Drives one or more sessions against a single candidate project.
pub struct TestOrchestrator {
    config: Config,
    project_dir: PathBuf,
    language: Language,
    runner: Arc<CaseRunner>,
    process: ProcessRunner,
    /// Held for a whole build, and by `run_all` until its last case is done.
    /// Keeps the artifact of the last good build.
    build_lock: Mutex<Option<BuiltArtifact>>,
}

impl TestOrchestrator {
    pub fn detect_language(project_dir: impl AsRef<Path>) -> Result<Language, DetectError> {
        Language::detect(project_dir)
    }

    pub fn new(config: Config, project_dir: PathBuf, language: Language) -> anyhow::Result<Self> {
        config.candidate_for(language)?;
        let runner = CaseRunner::new(&config).context("Invalid command template in config")?;
        Ok(Self {
            process: ProcessRunner::new(config.judge.capture_limits()),
            runner: Arc::new(runner),
            build_lock: Mutex::new(None),
            config,
            project_dir,
            language,
        })
    }

    /// Uses `project_dir`, falling back to `[project] dir`, and detects its
    /// language.
    pub fn for_project(config: Config, project_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let project_dir = project_dir
            .or_else(|| config.project_dir())
            .context("No candidate project given (use --project or set [project] dir)")?;
        let language = Self::detect_language(&project_dir)
            .with_context(|| format!("Cannot detect the language of {:?}", project_dir))?;
        log::info!("Candidate {:?} is written in {}", project_dir, language);
        Self::new(config, project_dir, language)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Artifact of the most recent successful build.
    pub async fn built_artifact(&self) -> Option<BuiltArtifact> {
        self.build_lock.lock().await.clone()
    }

    /// Builds the candidate. Overlapping calls run one after another, and a
    /// running session is never rebuilt under.
    pub async fn compile(&self) -> BuildReport {
        let mut last_good = self.build_lock.lock().await;
        self.build(&mut last_good).await.0
    }

    async fn build(
        &self,
        last_good: &mut Option<BuiltArtifact>,
    ) -> (BuildReport, Option<BuiltArtifact>) {
        let commands = match self.config.candidate_for(self.language) {
            Ok(c) => c.clone(),
            Err(e) => return (BuildReport::failure(e.to_string()), None),
        };
        let vars = match self.config.template_vars() {
            Ok(v) => v.with_path("projectDir", &self.project_dir),
            Err(e) => return (BuildReport::failure(e.to_string()), None),
        };
        let artifact = match vars.render_plain(&commands.artifact) {
            Ok(s) => fsutil::normalize_path(fsutil::resolve_against(&self.project_dir, s)),
            Err(e) => return (BuildReport::failure(e.to_string()), None),
        };
        let script = match vars.with_path("artifact", &artifact).render(&commands.build) {
            Ok(s) => s,
            Err(e) => return (BuildReport::failure(e.to_string()), None),
        };
        if let Some(parent) = artifact.parent() {
            if let Err(e) = fsutil::mkdir_all(parent) {
                return (BuildReport::failure(e.to_string()), None);
            }
        }

        log::info!("Building {} candidate", self.language);
        log::debug!("build: {}", script);
        let spec = ProcessSpec::shell(&self.config.judge.shell, script, self.config.judge.build_timeout())
            .working_dir(&self.project_dir);
        let out = match self.process.run(&spec).await {
            Ok(out) => out,
            Err(e) => return (BuildReport::failure(e.to_string()), None),
        };

        let mut message = out.stdout.clone();
        message.push_str(&out.stderr);
        if !out.succeeded() {
            let summary = format!("Build {}", out.failure_summary());
            let message = if message.is_empty() {
                summary
            } else {
                format!("{}\n{}", summary, message)
            };
            return (BuildReport::failure(message), None);
        }

        let built = BuiltArtifact {
            language: self.language,
            artifact: artifact.clone(),
            project_dir: self.project_dir.clone(),
            commands,
        };
        *last_good = Some(built.clone());
        log::info!("Build succeeded in {}ms", out.elapsed.as_millis());
        let report = BuildReport {
            success: true,
            message,
            artifact: Some(artifact),
        };
        (report, Some(built))
    }

    /// Builds, then judges `cases`. A failed build reports no case at all.
    pub async fn run_all(
        &self,
        cases: Vec<TestCase>,
        max_workers: usize,
        listener: Arc<dyn RunListener>,
        cancel: CancelToken,
    ) -> RunSummary {
        // the artifact stays as built until every case has run
        let mut last_good = self.build_lock.lock().await;
        let (report, built) = self.build(&mut last_good).await;
        listener.on_compile(&report);
        let Some(built) = built else {
            log::error!("Build failed, no case is run");
            return RunSummary::default();
        };

        let executor = Arc::new(self.runner.clone().bind(built));
        let summary = run_pool(executor, cases, max_workers, listener, cancel).await;
        drop(last_good);
        log::info!("{} passed, {} failed", summary.passed, summary.failed);
        summary
    }
}
