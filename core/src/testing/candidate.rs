use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use tempfile::TempDir;

use super::testcase::TestCase;
use crate::config::{CandidateConfig, Config, ExitCodePolicy};
use crate::language::Language;
use crate::process::{ProcessError, ProcessOutcome, ProcessRunner, ProcessSpec};
use crate::str_interp::{InterpError, TemplateVars};

/// Result of a successful candidate build, shared by every case of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub language: Language,
    pub artifact: PathBuf,
    pub project_dir: PathBuf,
    pub commands: CandidateConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Step {
    Translate,
    Execute,
}

/// How the candidate toolchain ended on one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateRun {
    Completed {
        output: String,
    },
    TimedOut {
        step: Step,
        output: String,
        elapsed: Duration,
    },
    Crashed {
        step: Step,
        summary: String,
        stderr: String,
        output: String,
    },
}

/// The candidate could not even be started on a case.
#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("Cannot read test files: {0}")]
    Io(String),

    #[error("Cannot create a case dir in {0:?}: {1}")]
    Scratch(PathBuf, #[source] io::Error),

    #[error("Cannot prepare case dir {0:?}: {1}")]
    Prepare(PathBuf, fsutil::Error),

    #[error("Bad candidate command: {0}")]
    Template(#[from] InterpError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Runs the already built candidate against one case at a time.
#[derive(Debug, Clone)]
pub struct CandidateEvaluator {
    shell: PathBuf,
    timeout: Duration,
    exit_code: ExitCodePolicy,
    runner: ProcessRunner,
    vars: TemplateVars,
    cases_dir: PathBuf,
}

impl CandidateEvaluator {
    const CASES_SUBDIR: &str = "cases";

    pub fn new(cfg: &Config) -> Result<Self, InterpError> {
        Ok(Self {
            shell: cfg.judge.shell.clone(),
            timeout: cfg.judge.timeout(),
            exit_code: cfg.judge.exit_code,
            runner: ProcessRunner::new(cfg.judge.capture_limits()),
            vars: cfg.template_vars()?,
            cases_dir: cfg.work_dir().join(Self::CASES_SUBDIR),
        })
    }

    /// Creates a fresh scratch dir for `case` under `<workDir>/cases`. Every
    /// call gets its own dir, even for the same case. Removed on drop.
    pub fn case_dir(&self, case: &TestCase) -> Result<TempDir, CandidateError> {
        let readable: String = case
            .name
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' => c,
                _ => '_',
            })
            .collect();
        let scratch = |e| CandidateError::Scratch(self.cases_dir.clone(), e);
        std::fs::create_dir_all(&self.cases_dir).map_err(scratch)?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", readable))
            .tempdir_in(&self.cases_dir)
            .map_err(scratch)
    }

    pub async fn evaluate(
        &self,
        case: &TestCase,
        built: &BuiltArtifact,
    ) -> Result<CandidateRun, CandidateError> {
        let input = case
            .read_input()
            .await
            .map_err(|e| CandidateError::Io(e.to_string()))?;

        let case_dir = self.case_dir(case)?;
        let res = self.run_in(case_dir.path(), case, built, input).await;

        let path = case_dir.path().to_owned();
        if let Err(e) = case_dir.close() {
            log::warn!("Failed to clean up case dir {:?}: {}", path, e);
        }
        res
    }

    async fn run_in(
        &self,
        case_dir: &Path,
        case: &TestCase,
        built: &BuiltArtifact,
        input: Option<Vec<u8>>,
    ) -> Result<CandidateRun, CandidateError> {
        let source = case_dir.join(&built.commands.source_file_name);
        fsutil::copy_file(&case.source_path, &source)
            .map_err(|e| CandidateError::Prepare(case_dir.to_owned(), e))?;

        let mut vars = self.vars.clone();
        vars.set_path("projectDir", &built.project_dir)
            .set_path("artifact", &built.artifact)
            .set_path("source", &source)
            .set_path("caseDir", case_dir);
        if let Some(path) = &case.input_path {
            vars.set_path("input", path);
        }

        if let Some(translate) = &built.commands.translate {
            let script = vars.render(translate)?;
            let spec = ProcessSpec::shell(&self.shell, script, self.timeout).working_dir(case_dir);
            let out = self.runner.run(&spec).await?;
            if !out.succeeded() {
                return Ok(Self::unsuccessful(Step::Translate, out));
            }
        }

        let script = vars.render(&built.commands.execute)?;
        let spec = ProcessSpec::shell(&self.shell, script, self.timeout)
            .stdin(input)
            .working_dir(case_dir)
            .tolerate_nonzero_exit(self.exit_code.tolerates_nonzero());
        let out = self.runner.run(&spec).await?;
        if !out.succeeded() {
            return Ok(Self::unsuccessful(Step::Execute, out));
        }
        Ok(CandidateRun::Completed {
            output: self.exit_code.judged_output(&out),
        })
    }

    fn unsuccessful(step: Step, out: ProcessOutcome) -> CandidateRun {
        if out.timed_out {
            return CandidateRun::TimedOut {
                step,
                output: out.stdout,
                elapsed: out.elapsed,
            };
        }
        CandidateRun::Crashed {
            step,
            summary: out.failure_summary(),
            stderr: out.stderr,
            output: out.stdout,
        }
    }
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    struct Fixture {
        _tmp: tempfile::TempDir,
        eval: CandidateEvaluator,
        built: BuiltArtifact,
        case: TestCase,
    }

    fn fixture(
        extra_judge: &str,
        translate: Option<&str>,
        execute: &str,
        input: Option<&str>,
    ) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path();
        let toml = format!(
            r#"
            [judge]
            timeout_ms = 500
            {}
            [reference]
            run = "true"
            "#,
            extra_judge
        );
        let mut cfg = Config::from_toml(&toml).unwrap();
        cfg.base_dir = base.to_owned();

        let src = base.join("testfile1.txt");
        fsutil::write(&src, "int main() { return 0; }\n").unwrap();
        let input = input.map(|s| {
            let p = base.join("input1.txt");
            fsutil::write(&p, s).unwrap();
            p
        });

        let built = BuiltArtifact {
            language: Language::C,
            artifact: base.join("compiler"),
            project_dir: base.to_owned(),
            commands: CandidateConfig {
                build: "true".into(),
                artifact: "compiler".into(),
                source_file_name: "testfile.txt".into(),
                translate: translate.map(Into::into),
                execute: execute.into(),
            },
        };
        Fixture {
            eval: CandidateEvaluator::new(&cfg).unwrap(),
            built,
            case: TestCase::new("lib/testfile1.txt", src, input),
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn execute_sees_source_copy_and_input() {
        let f = fixture("", None, "cat testfile.txt; cat", Some("7\n"));
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        assert_eq!(
            run,
            CandidateRun::Completed {
                output: "int main() { return 0; }\n7\n".into()
            }
        );
    }

    #[tokio::test]
    async fn translate_output_is_available_to_execute() {
        let f = fixture("", Some("tr a-z A-Z < #{source} > mips.txt"), "cat mips.txt", None);
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        assert_eq!(
            run,
            CandidateRun::Completed {
                output: "INT MAIN() { RETURN 0; }\n".into()
            }
        );
    }

    #[tokio::test]
    async fn translate_failure_is_a_crash() {
        let f = fixture("", Some("echo 'syntax error' >&2; exit 1"), "echo never", None);
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        match run {
            CandidateRun::Crashed { step, stderr, .. } => {
                assert_eq!(step, Step::Translate);
                assert_eq!(stderr, "syntax error\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_execute_times_out() {
        let f = fixture("", None, "echo partial; sleep 5", None);
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        match run {
            CandidateRun::TimedOut { step, output, .. } => {
                assert_eq!(step, Step::Execute);
                assert_eq!(output, "partial\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn exit_code_is_appended_under_append_policy() {
        let f = fixture(r#"exit_code = "append""#, None, "echo 5; exit 3", None);
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        assert_eq!(
            run,
            CandidateRun::Completed {
                output: "5\n3\n".into()
            }
        );
    }

    #[tokio::test]
    async fn case_dir_is_removed_afterwards() {
        let f = fixture("", None, "pwd", None);
        let run = f.eval.evaluate(&f.case, &f.built).await.unwrap();
        let CandidateRun::Completed { output } = run else {
            panic!("unexpected {:?}", run)
        };
        let dir = PathBuf::from(output.trim_end());
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("lib_testfile1.txt-"), "{}", name);
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(&f.eval.cases_dir).unwrap().count(), 0);
    }

    #[test]
    fn case_dirs_never_collide() {
        let f = fixture("", None, "true", None);
        let a = TestCase::new("a/b", "x", None::<PathBuf>);
        let b = TestCase::new("a_b", "x", None::<PathBuf>);

        let da = f.eval.case_dir(&a).unwrap();
        let db = f.eval.case_dir(&b).unwrap();
        // a second session in the same process, same case
        let other = f.eval.clone();
        let da2 = other.case_dir(&a).unwrap();

        assert_ne!(da.path(), db.path());
        assert_ne!(da.path(), da2.path());
        assert!(da.path().starts_with(&f.eval.cases_dir));
        assert!(da.path().is_dir() && db.path().is_dir() && da2.path().is_dir());
    }
}
