use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, UNIX_EPOCH},
};

use tokio::sync::OnceCell;

use super::testcase::TestCase;
use crate::config::{Config, ExitCodePolicy, ReferenceConfig};
use crate::process::{ProcessError, ProcessRunner, ProcessSpec};
use crate::str_interp::{InterpError, TemplateVars};

/// Failure of the trusted toolchain. Always points at a broken test case or
/// environment, never at the candidate.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("Cannot read test files: {0}")]
    Io(String),

    #[error("Bad reference command: {0}")]
    Template(#[from] InterpError),

    #[error("Reference compile failed for '{0}':\n{1}")]
    Compile(PathBuf, String),

    #[error("Reference program {summary}: {stderr}")]
    Run { summary: String, stderr: String },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: PathBuf,
    stamp: fsutil::FileStamp,
}

impl CacheKey {
    fn artifact_name(&self) -> String {
        let mut h = DefaultHasher::new();
        self.source.hash(&mut h);
        self.stamp.len.hash(&mut h);
        self.stamp
            .modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .hash(&mut h);
        format!("ref-{:016x}", h.finish())
    }
}

type CompiledRef = Result<PathBuf, String>;

/// Produces the expected output of a case with the trusted toolchain.
#[derive(Debug)]
pub struct ReferenceEvaluator {
    cmd: ReferenceConfig,
    shell: PathBuf,
    timeout: Duration,
    exit_code: ExitCodePolicy,
    runner: ProcessRunner,
    vars: TemplateVars,
    cache_dir: PathBuf,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<CompiledRef>>>>,
}

impl ReferenceEvaluator {
    const CACHE_SUBDIR: &str = "reference";

    pub fn new(cfg: &Config) -> Result<Self, InterpError> {
        Ok(Self {
            cmd: cfg.reference.clone(),
            shell: cfg.judge.shell.clone(),
            timeout: cfg.judge.timeout(),
            exit_code: cfg.judge.exit_code,
            runner: ProcessRunner::new(cfg.judge.capture_limits()),
            vars: cfg.template_vars()?,
            cache_dir: cfg.work_dir().join(Self::CACHE_SUBDIR),
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Expected stdout of `case`.
    pub async fn evaluate(&self, case: &TestCase) -> Result<String, ReferenceError> {
        let input = case
            .read_input()
            .await
            .map_err(|e| ReferenceError::Io(e.to_string()))?;

        let mut vars = self.vars.clone();
        vars.set_path("source", &case.source_path);
        if let Some(path) = &case.input_path {
            vars.set_path("input", path);
        }
        if let Some(artifact) = self.ensure_compiled(&case.source_path).await? {
            vars.set_path("artifact", artifact);
        }

        let script = vars.render(&self.cmd.run)?;
        fsutil::mkdir_all(&self.cache_dir).map_err(|e| ReferenceError::Io(e.to_string()))?;
        let spec = ProcessSpec::shell(&self.shell, script, self.timeout)
            .stdin(input)
            .working_dir(&self.cache_dir)
            .tolerate_nonzero_exit(self.exit_code.tolerates_nonzero());

        let out = self.runner.run(&spec).await?;
        if !out.succeeded() {
            return Err(ReferenceError::Run {
                summary: out.failure_summary(),
                stderr: out.stderr,
            });
        }
        Ok(self.exit_code.judged_output(&out))
    }

    /// Path of the compiled reference binary for `source`, compiling it on
    /// first use. `None` when the reference needs no compile step.
    async fn ensure_compiled(&self, source: &Path) -> Result<Option<PathBuf>, ReferenceError> {
        let Some(compile) = &self.cmd.compile else {
            return Ok(None)
        };

        let key = CacheKey {
            source: fsutil::canonicalize_path(source)
                .map_err(|e| ReferenceError::Io(e.to_string()))?,
            stamp: fsutil::file_stamp(source).map_err(|e| ReferenceError::Io(e.to_string()))?,
        };
        let cell = {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cache.entry(key.clone()).or_default().clone()
        };

        let compiled = cell
            .get_or_init(|| async {
                let artifact = self.cache_dir.join(key.artifact_name());
                self.compile(compile, &key.source, &artifact)
                    .await
                    .map(|()| artifact)
            })
            .await;

        match compiled {
            Ok(artifact) => Ok(Some(artifact.clone())),
            Err(msg) => Err(ReferenceError::Compile(source.to_owned(), msg.clone())),
        }
    }

    async fn compile(&self, template: &str, source: &Path, artifact: &Path) -> Result<(), String> {
        fsutil::mkdir_all(&self.cache_dir).map_err(|e| e.to_string())?;

        let script = self
            .vars
            .clone()
            .with_path("source", source)
            .with_path("artifact", artifact)
            .render(template)
            .map_err(|e| e.to_string())?;
        log::debug!("reference compile: {}", script);

        let spec = ProcessSpec::shell(&self.shell, script, self.timeout).working_dir(&self.cache_dir);
        let out = self.runner.run(&spec).await.map_err(|e| e.to_string())?;
        if out.succeeded() {
            return Ok(());
        }
        let mut msg = out.failure_summary();
        for s in [&out.stdout, &out.stderr] {
            if !s.is_empty() {
                msg.push('\n');
                msg.push_str(s.trim_end());
            }
        }
        Err(msg)
    }
}
