use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{
    candidate::{BuiltArtifact, CandidateEvaluator, CandidateRun},
    reference::ReferenceEvaluator,
    result::{TestResult, TestStatus},
    testcase::TestCase,
};
use crate::config::Config;
use crate::normalize;
use crate::str_interp::InterpError;

/// Turns one case into exactly one verdict. Never fails; problems become
/// `InternalError` results.
#[async_trait]
pub trait RunCase: Send + Sync {
    async fn run_case(&self, case: &TestCase) -> TestResult;
}

/// Judges a case by running it through both toolchains and comparing.
#[derive(Debug)]
pub struct CaseRunner {
    reference: ReferenceEvaluator,
    candidate: CandidateEvaluator,
}

impl CaseRunner {
    pub fn new(cfg: &Config) -> Result<Self, InterpError> {
        Ok(Self {
            reference: ReferenceEvaluator::new(cfg)?,
            candidate: CandidateEvaluator::new(cfg)?,
        })
    }

    pub async fn run(&self, case: &TestCase, built: &BuiltArtifact) -> TestResult {
        let start_at = Instant::now();
        let res = self.judge(case, built).await;
        log::debug!("{}: {}", case.name, res.status);
        res.with_elapsed(start_at.elapsed())
    }

    async fn judge(&self, case: &TestCase, built: &BuiltArtifact) -> TestResult {
        let expected = match self.reference.evaluate(case).await {
            Ok(s) => s,
            Err(e) => return TestResult::internal_error(e.to_string()),
        };

        let run = match self.candidate.evaluate(case, built).await {
            Ok(run) => run,
            Err(e) => {
                return TestResult::internal_error(e.to_string()).with_expected(Some(expected))
            }
        };

        match run {
            CandidateRun::Completed { output } => {
                if normalize::compare(&output, &expected) {
                    TestResult::pass(output, expected)
                } else {
                    TestResult::wrong_answer(output, expected)
                }
            }
            CandidateRun::TimedOut {
                step,
                output,
                elapsed,
            } => TestResult::new(
                TestStatus::Timeout,
                format!("{} step timed out after {}ms", step, elapsed.as_millis()),
            )
            .with_actual(Some(output))
            .with_expected(Some(expected)),
            CandidateRun::Crashed {
                step,
                summary,
                stderr,
                output,
            } => {
                let message = if stderr.trim().is_empty() {
                    format!("{} step {}", step, summary)
                } else {
                    stderr
                };
                TestResult::new(TestStatus::RuntimeError, message)
                    .with_actual(Some(output))
                    .with_expected(Some(expected))
            }
        }
    }

    /// Fixes `built` so the runner can be handed to the worker pool.
    pub fn bind(self: Arc<Self>, built: BuiltArtifact) -> BoundCaseRunner {
        BoundCaseRunner {
            runner: self,
            built,
        }
    }
}

/// A `CaseRunner` together with the artifact of the current session.
#[derive(Debug, Clone)]
pub struct BoundCaseRunner {
    runner: Arc<CaseRunner>,
    built: BuiltArtifact,
}

#[async_trait]
impl RunCase for BoundCaseRunner {
    async fn run_case(&self, case: &TestCase) -> TestResult {
        self.runner.run(case, &self.built).await
    }
}
