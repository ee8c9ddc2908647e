use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use serde::Serialize;

use super::{
    case_runner::RunCase, orchestrator::BuildReport, result::TestResult, testcase::TestCase,
};

/// Set once by the caller; workers look at it before claiming the next case.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives the events of a run. Called from worker tasks, possibly on
/// several threads at once.
pub trait RunListener: Send + Sync {
    fn on_compile(&self, _report: &BuildReport) {}

    fn on_result(&self, case: &TestCase, result: TestResult);

    /// `fraction` is in `0.0..=1.0`.
    fn on_progress(&self, fraction: f64, status: &str);
}

/// Listener made of two closures.
pub struct FnListener<R, P> {
    on_result: R,
    on_progress: P,
}

impl<R, P> FnListener<R, P>
where
    R: Fn(&TestCase, TestResult) + Send + Sync,
    P: Fn(f64, &str) + Send + Sync,
{
    pub fn new(on_result: R, on_progress: P) -> Self {
        Self {
            on_result,
            on_progress,
        }
    }
}

impl<R, P> RunListener for FnListener<R, P>
where
    R: Fn(&TestCase, TestResult) + Send + Sync,
    P: Fn(f64, &str) + Send + Sync,
{
    fn on_result(&self, case: &TestCase, result: TestResult) {
        (self.on_result)(case, result)
    }

    fn on_progress(&self, fraction: f64, status: &str) {
        (self.on_progress)(fraction, status)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }
}

/// Shared state of one pool run.
#[derive(Debug)]
pub struct RunSession {
    cases: Vec<TestCase>,
    cursor: AtomicUsize,
    completed: AtomicUsize,
    passed: AtomicUsize,
    /// Orders progress callbacks the same way as `completed`.
    progress: Mutex<()>,
    cancel: CancelToken,
}

impl RunSession {
    pub fn new(cases: Vec<TestCase>, cancel: CancelToken) -> Self {
        Self {
            cases,
            cursor: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            passed: AtomicUsize::new(0),
            progress: Mutex::new(()),
            cancel,
        }
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    /// Next unclaimed case in order, or `None` when exhausted or cancelled.
    fn claim(&self) -> Option<&TestCase> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.cases.get(i)
    }

    /// Counts one finished case and reports the new progress. Fractions reach
    /// the listener in increasing order.
    fn record(&self, passed: bool, listener: &dyn RunListener) {
        let _order = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        if passed {
            self.passed.fetch_add(1, Ordering::SeqCst);
        }
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total();
        listener.on_progress(
            done as f64 / total as f64,
            &format!("Completed: {}/{}", done, total),
        );
    }

    pub fn summary(&self) -> RunSummary {
        let completed = self.completed.load(Ordering::SeqCst);
        let passed = self.passed.load(Ordering::SeqCst);
        RunSummary {
            passed,
            failed: completed - passed,
        }
    }
}

/// Runs `cases` on at most `max_workers` concurrent workers and reports every
/// completed case to `listener` exactly once.
pub async fn run_pool<E>(
    executor: Arc<E>,
    cases: Vec<TestCase>,
    max_workers: usize,
    listener: Arc<dyn RunListener>,
    cancel: CancelToken,
) -> RunSummary
where
    E: RunCase + 'static,
{
    if cases.is_empty() {
        return RunSummary::default();
    }
    let workers = max_workers.clamp(1, cases.len());
    let session = Arc::new(RunSession::new(cases, cancel));
    log::info!("Running {} cases on {} workers", session.total(), workers);

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let session = session.clone();
            let executor = executor.clone();
            let listener = listener.clone();
            tokio::spawn(async move { work(&session, executor.as_ref(), listener.as_ref()).await })
        })
        .collect();

    for h in handles {
        if let Err(e) = h.await {
            log::error!("Worker terminated abnormally: {}", e);
        }
    }
    session.summary()
}

async fn work<E: RunCase>(session: &RunSession, executor: &E, listener: &dyn RunListener) {
    while let Some(case) = session.claim() {
        let result = executor.run_case(case).await;
        let passed = result.passed();
        listener.on_result(case, result);
        session.record(passed, listener);
    }
}
