use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use anyhow::Context as _;
use rust_embed::RustEmbed;
use serde::Deserialize;

use crate::language::Language;
use crate::process::{CaptureLimits, ProcessOutcome};
use crate::str_interp::{InterpError, TemplateVars};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Directory that relative paths in the config resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    pub judge: JudgeConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub candidate: BTreeMap<Language, CandidateConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "JudgeConfig::default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "JudgeConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "JudgeConfig::default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    #[serde(default = "JudgeConfig::default_shell")]
    pub shell: PathBuf,
    #[serde(default = "JudgeConfig::default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "JudgeConfig::default_stdout_max")]
    pub stdout_capture_max_bytes: usize,
    #[serde(default = "JudgeConfig::default_stderr_max")]
    pub stderr_capture_max_bytes: usize,
    #[serde(default)]
    pub exit_code: ExitCodePolicy,
}

/// How a program's exit code takes part in judging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitCodePolicy {
    /// Nonzero exit is a runtime error.
    #[default]
    Crash,
    /// Nonzero exit is tolerated and the code is appended to stdout as its
    /// last line before comparison.
    Append,
}

impl ExitCodePolicy {
    pub fn tolerates_nonzero(self) -> bool {
        self == ExitCodePolicy::Append
    }

    /// The text that takes part in comparison.
    pub fn judged_output(self, out: &ProcessOutcome) -> String {
        match (self, out.exit_code) {
            (ExitCodePolicy::Append, Some(code)) => {
                let mut s = out.stdout.clone();
                if !s.is_empty() && !s.ends_with('\n') {
                    s.push('\n');
                }
                s.push_str(&code.to_string());
                s.push('\n');
                s
            }
            _ => out.stdout.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectConfig {
    /// Candidate project used when none is given on the command line.
    pub dir: Option<PathBuf>,
    #[serde(default = "ProjectConfig::default_testfiles")]
    pub testfiles: PathBuf,
}

/// Trusted toolchain. `compile` is optional for interpreted references.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReferenceConfig {
    pub compile: Option<String>,
    pub run: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandidateConfig {
    /// Run once per session inside the project dir.
    pub build: String,
    /// Path of the build output, referenced as `#{artifact}`.
    pub artifact: String,
    #[serde(default = "CandidateConfig::default_source_file_name")]
    pub source_file_name: String,
    /// Source → target code, run in the case dir without stdin.
    pub translate: Option<String>,
    /// Runs the target code with the case input; its stdout is judged.
    pub execute: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("judge.max_workers must be positive")]
    ZeroWorkers,

    #[error("judge.{0} must be positive")]
    ZeroTimeout(&'static str),

    #[error("No [candidate.{0}] section in config")]
    NoCandidateFor(Language),
}

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

impl Config {
    pub const FILENAME: &str = "crosscheck.toml";

    pub fn example_toml() -> String {
        match Asset::get(Self::FILENAME) {
            Some(file) => String::from_utf8_lossy(file.data.as_ref()).into_owned(),
            None => String::new(),
        }
    }

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let toml = fsutil::read_to_string(&filepath).context("Cannot read a file")?;
        let mut cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        cfg.base_dir = filepath
            .parent()
            .map(Path::to_owned)
            .unwrap_or_else(|| PathBuf::from("."));
        cfg.source_config_file = Some(filepath);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Find config file ancestor dirs, including current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let cur_dir = cur_dir.as_ref();
        cur_dir
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
            .with_context(|| {
                format!(
                    "Not in a crosscheck dir: Cannot find '{}' (run `crosscheck init`)",
                    Self::FILENAME
                )
            })
    }

    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_filepath = Config::find_file_in_ancestors(cur_dir)?;
        Self::from_toml_file(config_filepath)
    }

    pub fn validate(&self) -> StdResult<(), ConfigError> {
        if self.judge.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.judge.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("timeout_ms"));
        }
        if self.judge.build_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("build_timeout_ms"));
        }
        Ok(())
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        fsutil::normalize_path(fsutil::resolve_against(&self.base_dir, path))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.resolve(&self.judge.work_dir)
    }

    pub fn testfiles_dir(&self) -> PathBuf {
        self.resolve(&self.project.testfiles)
    }

    pub fn project_dir(&self) -> Option<PathBuf> {
        self.project.dir.as_ref().map(|d| self.resolve(d))
    }

    pub fn candidate_for(&self, lang: Language) -> StdResult<&CandidateConfig, ConfigError> {
        self.candidate
            .get(&lang)
            .ok_or(ConfigError::NoCandidateFor(lang))
    }

    /// `baseDir`, `workDir` and every `[vars]` entry. Values of `[vars]` may
    /// themselves refer to `baseDir` and `workDir`.
    pub fn template_vars(&self) -> StdResult<TemplateVars, InterpError> {
        let builtin = TemplateVars::new()
            .with_path("baseDir", &self.base_dir)
            .with_path("workDir", self.work_dir());
        let mut vars = builtin.clone();
        for (name, value) in &self.vars {
            vars.set(name.as_str(), builtin.render(value)?);
        }
        Ok(vars)
    }
}

impl JudgeConfig {
    fn default_max_workers() -> usize {
        4
    }

    fn default_timeout_ms() -> u64 {
        10_000
    }

    fn default_build_timeout_ms() -> u64 {
        300_000
    }

    fn default_shell() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn default_work_dir() -> PathBuf {
        PathBuf::from(".crosscheck")
    }

    fn default_stdout_max() -> usize {
        CaptureLimits::default().stdout_max_bytes
    }

    fn default_stderr_max() -> usize {
        CaptureLimits::default().stderr_max_bytes
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    pub fn capture_limits(&self) -> CaptureLimits {
        CaptureLimits {
            stdout_max_bytes: self.stdout_capture_max_bytes,
            stderr_max_bytes: self.stderr_capture_max_bytes,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dir: None,
            testfiles: Self::default_testfiles(),
        }
    }
}

impl ProjectConfig {
    fn default_testfiles() -> PathBuf {
        PathBuf::from("testfiles")
    }
}

impl CandidateConfig {
    fn default_source_file_name() -> String {
        "testfile.txt".to_owned()
    }
}
