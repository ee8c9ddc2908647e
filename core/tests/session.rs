#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crosscheck_core::testing::{
    CancelToken, Discovery, FnListener, RunSummary, TestOrchestrator, TestResult, TestStatus,
};
use crosscheck_core::{Config, Language};

/// Stand-in for a student's compiler: echoes the program text, mangling
/// `WRONG`, hanging on `SLEEP` and failing on `CRASH`.
const JUDGE_SH: &str = r#"#!/bin/sh
if grep -q SLEEP "$1"; then
  echo $$ > "$(dirname "$0")/../sleeper.pid"
  exec sleep 30
fi
if grep -q CRASH "$1"; then
  echo "segmentation fault" >&2
  exit 139
fi
sed s/WRONG/wrong/ "$1"
"#;

const CONFIG: &str = r##"
[judge]
max_workers = 3
timeout_ms = 500
build_timeout_ms = 5000

[project]
dir = "Compiler"
testfiles = "testfiles"

[reference]
run = "cat #{source}"

[candidate.c]
build = "cp judge.sh #{artifact} && chmod +x #{artifact}"
artifact = "build/compiler"
execute = "#{artifact} testfile.txt"
"##;

fn setup(root: &Path) -> Config {
    let project = root.join("Compiler");
    fsutil::write_with_mkdir(project.join("Makefile"), "all:\n").unwrap();
    fsutil::write(project.join("main.c"), "int main(){}\n").unwrap();
    fsutil::write(project.join("judge.sh"), JUDGE_SH).unwrap();
    std::fs::set_permissions(project.join("judge.sh"), std::fs::Permissions::from_mode(0o755))
        .unwrap();

    let lib = root.join("testfiles/A");
    fsutil::write_with_mkdir(lib.join("testfile1.txt"), "1\n2\n").unwrap();
    fsutil::write(lib.join("input1.txt"), "ignored\n").unwrap();
    fsutil::write(lib.join("testfile2.txt"), "WRONG\n").unwrap();
    fsutil::write(lib.join("testfile3.txt"), "SLEEP\n").unwrap();
    fsutil::write(lib.join("testfile4.txt"), "CRASH\n").unwrap();

    fsutil::write(root.join(Config::FILENAME), CONFIG).unwrap();
    Config::from_file_finding_in_ancestors(root.join("testfiles/A")).unwrap()
}

/// Killed orphans can sit as zombies until init gets to them.
fn process_is_gone(pid: i32) -> bool {
    // signal 0 only checks for existence
    if unsafe { libc::kill(pid, 0) } != 0 {
        return true;
    }
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('Z')))
        .unwrap_or(false)
}

async fn exits_soon(pid: i32) -> bool {
    for _ in 0..100 {
        if process_is_gone(pid) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_session_judges_every_case() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = setup(tmp.path());
    let cases = Discovery::collect_all(cfg.testfiles_dir()).unwrap();
    assert_eq!(cases.len(), 4);

    let orch = TestOrchestrator::for_project(cfg, None).unwrap();
    assert_eq!(orch.language(), Language::C);

    let results: Arc<Mutex<HashMap<String, TestResult>>> = Default::default();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let listener = {
        let results = results.clone();
        let progress = progress.clone();
        FnListener::new(
            move |case: &crosscheck_core::testing::TestCase, result: TestResult| {
                let prev = results.lock().unwrap().insert(case.name.clone(), result);
                assert!(prev.is_none(), "{} reported twice", case.name);
            },
            move |fraction: f64, status: &str| {
                progress.lock().unwrap().push((fraction, status.to_owned()));
            },
        )
    };

    let summary = orch
        .run_all(cases, 3, Arc::new(listener), CancelToken::new())
        .await;
    assert_eq!(summary, RunSummary { passed: 1, failed: 3 });

    let results = results.lock().unwrap();
    let status = |name: &str| results[name].status;
    assert_eq!(status("A/testfile1.txt"), TestStatus::Pass);
    assert_eq!(status("A/testfile2.txt"), TestStatus::WrongAnswer);
    assert_eq!(status("A/testfile3.txt"), TestStatus::Timeout);
    assert_eq!(status("A/testfile4.txt"), TestStatus::RuntimeError);

    let wa = &results["A/testfile2.txt"];
    assert_eq!(wa.actual_output.as_deref(), Some("wrong\n"));
    assert_eq!(wa.expected_output.as_deref(), Some("WRONG\n"));
    assert_eq!(results["A/testfile4.txt"].message, "segmentation fault\n");

    let pid: i32 = fsutil::read_to_string(tmp.path().join("Compiler/sleeper.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(exits_soon(pid).await, "timed out process {} still alive", pid);

    let progress = progress.lock().unwrap();
    assert_eq!(progress.len(), 4);
    assert!(progress.iter().any(|(f, s)| *f == 1.0 && s == "Completed: 4/4"));

    // scratch dirs are cleaned up after each case
    let cases_dir = tmp.path().join(".crosscheck/cases");
    let leftovers = std::fs::read_dir(&cases_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn build_failure_reports_no_case() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = setup(tmp.path());
    if let Some(c) = cfg.candidate.get_mut(&Language::C) {
        c.build = "echo 'main.c:1: error' >&2; exit 1".into();
    }
    let cases = Discovery::collect_all(cfg.testfiles_dir()).unwrap();
    let orch = TestOrchestrator::for_project(cfg, None).unwrap();

    let called = Arc::new(Mutex::new(0));
    let listener = {
        let called = called.clone();
        FnListener::new(
            move |_: &crosscheck_core::testing::TestCase, _: TestResult| {
                *called.lock().unwrap() += 1;
            },
            |_: f64, _: &str| {},
        )
    };

    let summary = orch
        .run_all(cases, 4, Arc::new(listener), CancelToken::new())
        .await;
    assert_eq!(summary, RunSummary::default());
    assert_eq!(*called.lock().unwrap(), 0);

    let report = orch.compile().await;
    assert!(!report.success);
    assert!(report.message.contains("main.c:1: error"), "{}", report.message);
}

#[tokio::test]
async fn reference_is_compiled_once_per_source_across_sessions() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = setup(tmp.path());
    let log = tmp.path().join("ref-compiles.log");
    cfg.reference.compile = Some(format!(
        "echo x >> '{}' && cp #{{source}} #{{artifact}}",
        log.display()
    ));
    cfg.reference.run = "cat #{artifact}".into();
    let cases: Vec<_> = Discovery::collect_all(cfg.testfiles_dir())
        .unwrap()
        .into_iter()
        .filter(|c| c.name == "A/testfile1.txt")
        .collect();
    let orch = TestOrchestrator::for_project(cfg, None).unwrap();

    for _ in 0..2 {
        let listener = FnListener::new(
            |_: &crosscheck_core::testing::TestCase, r: TestResult| {
                assert_eq!(r.status, TestStatus::Pass, "{:?}", r)
            },
            |_: f64, _: &str| {},
        );
        let summary = orch
            .run_all(cases.clone(), 2, Arc::new(listener), CancelToken::new())
            .await;
        assert_eq!(summary.passed, 1);
    }
    let compiles = fsutil::read_to_string(&log).unwrap();
    assert_eq!(compiles.lines().count(), 1);
}
