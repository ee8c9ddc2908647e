use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
pub enum TestStatus {
    #[strum(to_string = "AC")]
    Pass,
    #[strum(to_string = "WA")]
    WrongAnswer,
    /// The candidate build failed; applies to the whole session.
    #[strum(to_string = "CE")]
    CompileError,
    #[strum(to_string = "RE")]
    RuntimeError,
    #[strum(to_string = "TLE")]
    Timeout,
    /// The harness or the reference toolchain failed, not the candidate.
    #[strum(to_string = "IE")]
    InternalError,
}

impl TestStatus {
    pub fn is_pass(self) -> bool {
        self == TestStatus::Pass
    }

    pub fn describe(self) -> &'static str {
        use TestStatus::*;
        match self {
            Pass => "passed",
            WrongAnswer => "wrong answer",
            CompileError => "compile error",
            RuntimeError => "runtime error",
            Timeout => "time limit exceeded",
            InternalError => "internal error",
        }
    }
}

/// Verdict for one case. Built once by the case runner and handed over to
/// the listener by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub status: TestStatus,
    /// Empty on success.
    pub message: String,
    pub actual_output: Option<String>,
    pub expected_output: Option<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl TestResult {
    pub fn new(status: TestStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            actual_output: None,
            expected_output: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn pass(actual: String, expected: String) -> Self {
        Self {
            actual_output: Some(actual),
            expected_output: Some(expected),
            ..Self::new(TestStatus::Pass, "")
        }
    }

    pub fn wrong_answer(actual: String, expected: String) -> Self {
        Self {
            actual_output: Some(actual),
            expected_output: Some(expected),
            ..Self::new(TestStatus::WrongAnswer, "output differs from reference")
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(TestStatus::InternalError, message)
    }

    pub fn with_actual(mut self, actual: Option<String>) -> Self {
        self.actual_output = actual;
        self
    }

    pub fn with_expected(mut self, expected: Option<String>) -> Self {
        self.expected_output = expected;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn passed(&self) -> bool {
        self.status.is_pass()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
