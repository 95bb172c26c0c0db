//! The trial loop shared by both protocols.
//!
//! One orchestration run moves through
//! `Idle -> Compiling(main) -> Compiling(secondary) -> Compiling(gen) -> trials -> Reporting`,
//! where each trial is `Generate -> RunCandidate -> Judge -> (Persist)`. A
//! compile failure skips the trials; a fault inside a trial aborts the run
//! and names the last phase that completed.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::artifact::Artifact;
use crate::build::{BuildOrchestrator, BuildOutcome, Compiler};
use crate::cache::CacheStore;
use crate::error::{BuildError, TrialFault};
use crate::judge::{FailReason, Judge, StressMode, Verdict};
use crate::process::{Executor, ProcessOutcome, RunRequest};
use crate::replay::FailureStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialLimits {
    pub tests: usize,
    pub find: usize,
}

#[derive(Debug, Clone)]
pub struct StressSources {
    pub main: PathBuf,
    /// Checker source in check mode, reference source in compare mode.
    pub secondary: PathBuf,
    pub gen: PathBuf,
}

impl StressSources {
    fn ordered(&self, secondary: Artifact) -> [(Artifact, &Path); 3] {
        [
            (Artifact::Main, self.main.as_path()),
            (secondary, self.secondary.as_path()),
            (Artifact::Gen, self.gen.as_path()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Compiling(Artifact),
    Generate,
    RunCandidate,
    Judge,
    Persist,
    Reporting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Compiling(artifact) => write!(f, "compiling {}", artifact),
            Phase::Generate => f.write_str("generate"),
            Phase::RunCandidate => f.write_str("run candidate"),
            Phase::Judge => f.write_str("judge"),
            Phase::Persist => f.write_str("persist"),
            Phase::Reporting => f.write_str("reporting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// 1-based discovery order; matches the stored file name.
    pub index: usize,
    /// 1-based trial that produced it.
    pub trial: usize,
    pub reason: FailReason,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StressOutcome {
    Passed {
        tests: usize,
    },
    Found {
        found: usize,
        find: usize,
    },
    CompileFailed {
        artifact: Artifact,
        source: PathBuf,
        message: String,
    },
    Aborted {
        trial: usize,
        last_completed: Phase,
        message: String,
        found: usize,
    },
}

impl StressOutcome {
    pub fn summary(&self) -> String {
        match self {
            StressOutcome::Passed { tests } => format!("Passed {} test cases", tests),
            StressOutcome::Found { found, find } => {
                format!("Found {} / {} failing test cases", found, find)
            }
            StressOutcome::CompileFailed { source, .. } => {
                format!("Failed to compile {}", source.display())
            }
            StressOutcome::Aborted {
                trial,
                last_completed,
                message,
                ..
            } => format!(
                "Aborted on test {} after {}: {}",
                trial, last_completed, message
            ),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, StressOutcome::Passed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub mode: StressMode,
    pub tests: usize,
    pub find: usize,
    pub attempted: usize,
    pub found: usize,
    pub folder: PathBuf,
    pub failures: Vec<FailureRecord>,
    pub outcome: StressOutcome,
}

/// Progress hooks; every method defaults to doing nothing.
pub trait TrialObserver {
    fn on_build(&mut self, _artifact: Artifact, _source: &Path, _outcome: BuildOutcome) {}

    fn on_build_failed(&mut self, _artifact: Artifact, _source: &Path, _error: &BuildError) {}

    fn on_trial_start(&mut self, _trial: usize, _found: usize, _find: usize) {}

    fn on_failure(&mut self, _record: &FailureRecord) {}

    fn on_complete(&mut self, _report: &StressReport) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl TrialObserver for SilentObserver {}

/// Clears the folder, builds the three artifacts, then runs the trial loop.
pub fn run_stress<S: CacheStore, C: Compiler>(
    builder: &mut BuildOrchestrator<S, C>,
    executor: &dyn Executor,
    judge: &dyn Judge,
    sources: &StressSources,
    limits: TrialLimits,
    store: &FailureStore,
    observer: &mut dyn TrialObserver,
) -> Result<StressReport> {
    store.clear()?;

    for (artifact, source) in sources.ordered(judge.secondary()) {
        match builder.ensure_built(artifact, source) {
            Ok(outcome) => observer.on_build(artifact, source, outcome),
            Err(err) => {
                observer.on_build_failed(artifact, source, &err);
                let report = StressReport {
                    mode: judge.mode(),
                    tests: limits.tests,
                    find: limits.find,
                    attempted: 0,
                    found: 0,
                    folder: store.dir().to_path_buf(),
                    failures: Vec::new(),
                    outcome: StressOutcome::CompileFailed {
                        artifact,
                        source: source.to_path_buf(),
                        message: err.to_string(),
                    },
                };
                observer.on_complete(&report);
                return Ok(report);
            }
        }
    }

    let report = run_trials(executor, judge, limits, store, observer);
    observer.on_complete(&report);
    Ok(report)
}

/// Runs up to `limits.tests` trials, stopping as soon as `limits.find`
/// failures have been stored. Expects the binaries to exist already.
pub fn run_trials(
    executor: &dyn Executor,
    judge: &dyn Judge,
    limits: TrialLimits,
    store: &FailureStore,
    observer: &mut dyn TrialObserver,
) -> StressReport {
    let mut failures: Vec<FailureRecord> = Vec::new();
    let mut attempted = 0usize;
    let mut aborted = None;
    let mut last_completed = Phase::Compiling(Artifact::Gen);

    for trial in 1..=limits.tests {
        if failures.len() >= limits.find {
            break;
        }
        attempted = trial;
        observer.on_trial_start(trial, failures.len(), limits.find);
        match run_one_trial(executor, judge, store, trial, failures.len(), &mut last_completed) {
            Ok(Some(record)) => {
                tracing::info!(trial, index = record.index, reason = %record.reason.describe(), "failing test found");
                observer.on_failure(&record);
                failures.push(record);
            }
            Ok(None) => {}
            Err(fault) => {
                tracing::warn!(trial, phase = %last_completed, error = %fault, "trial aborted");
                aborted = Some(StressOutcome::Aborted {
                    trial,
                    last_completed,
                    message: fault.to_string(),
                    found: failures.len(),
                });
                break;
            }
        }
    }

    let found = failures.len();
    let outcome = aborted.unwrap_or(if found == 0 {
        StressOutcome::Passed { tests: limits.tests }
    } else {
        StressOutcome::Found {
            found,
            find: limits.find,
        }
    });
    StressReport {
        mode: judge.mode(),
        tests: limits.tests,
        find: limits.find,
        attempted,
        found,
        folder: store.dir().to_path_buf(),
        failures,
        outcome,
    }
}

fn run_one_trial(
    executor: &dyn Executor,
    judge: &dyn Judge,
    store: &FailureStore,
    trial: usize,
    found: usize,
    last_completed: &mut Phase,
) -> Result<Option<FailureRecord>, TrialFault> {
    let generated = executor.run(Artifact::Gen, &RunRequest::captured())?;
    if !generated.outcome.success() {
        return Err(TrialFault::ChildFailed {
            artifact: Artifact::Gen,
            outcome: generated.outcome,
        });
    }
    let input = generated.stdout;
    *last_completed = Phase::Generate;

    let candidate = executor.run(Artifact::Main, &RunRequest::captured().with_stdin(&input))?;
    *last_completed = Phase::RunCandidate;

    let verdict = match candidate.outcome {
        ProcessOutcome::TimedOut => Verdict::Fail(FailReason::CandidateTimedOut),
        outcome if !outcome.success() => Verdict::Fail(FailReason::CandidateCrashed { outcome }),
        _ => judge.judge(executor, &input, &candidate.stdout)?,
    };
    *last_completed = Phase::Judge;

    let Verdict::Fail(reason) = verdict else {
        return Ok(None);
    };
    let index = found + 1;
    let path = store
        .persist(index, &input)
        .map_err(|e| TrialFault::Store(e.to_string()))?;
    *last_completed = Phase::Persist;
    Ok(Some(FailureRecord {
        index,
        trial,
        reason,
        path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::CompileStatus;
    use crate::cache::MemoryCacheStore;
    use crate::error::ProcessError;
    use crate::judge::{CheckerJudge, DifferentialJudge};
    use crate::process::RunOutput;
    use chrono::Utc;
    use qstress_core::ensure_dir;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;
    use std::fs;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "qstress_trial_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("scratch");
        dir
    }

    /// Generator emits "case <n>"; the candidate answers wrongly on the
    /// trials listed in `wrong`; the reference and checker are honest.
    struct ScriptedPipeline {
        trial: Cell<usize>,
        wrong: BTreeSet<usize>,
        candidate_outcome: Option<(usize, ProcessOutcome)>,
        gen_outcome: Option<(usize, ProcessOutcome)>,
        checker_outcome: Option<(usize, ProcessOutcome)>,
        log: RefCell<Vec<Artifact>>,
    }

    impl ScriptedPipeline {
        fn failing_on(trials: &[usize]) -> Self {
            Self {
                trial: Cell::new(0),
                wrong: trials.iter().copied().collect(),
                candidate_outcome: None,
                gen_outcome: None,
                checker_outcome: None,
                log: RefCell::new(Vec::new()),
            }
        }

        fn runs_of(&self, artifact: Artifact) -> usize {
            self.log.borrow().iter().filter(|a| **a == artifact).count()
        }
    }

    fn exited(code: i32, stdout: Vec<u8>) -> RunOutput {
        RunOutput {
            outcome: ProcessOutcome::Exited { code },
            stdout,
        }
    }

    impl Executor for ScriptedPipeline {
        fn run(&self, artifact: Artifact, request: &RunRequest<'_>) -> Result<RunOutput, ProcessError> {
            self.log.borrow_mut().push(artifact);
            let stdin = String::from_utf8_lossy(request.stdin.unwrap_or_default()).into_owned();
            match artifact {
                Artifact::Gen => {
                    let n = self.trial.get() + 1;
                    self.trial.set(n);
                    if let Some((at, outcome)) = self.gen_outcome {
                        if at == n {
                            return Ok(RunOutput {
                                outcome,
                                stdout: Vec::new(),
                            });
                        }
                    }
                    Ok(exited(0, format!("case {}\n", n).into_bytes()))
                }
                Artifact::Main => {
                    let n = self.trial.get();
                    if let Some((at, outcome)) = self.candidate_outcome {
                        if at == n {
                            return Ok(RunOutput {
                                outcome,
                                stdout: Vec::new(),
                            });
                        }
                    }
                    let answer = if self.wrong.contains(&n) {
                        "wrong".to_string()
                    } else {
                        format!("ok {}", stdin.trim())
                    };
                    Ok(exited(0, format!("{}\n", answer).into_bytes()))
                }
                Artifact::Slow => Ok(exited(0, format!("ok {}", stdin.trim()).into_bytes())),
                Artifact::Check => {
                    let verdict = if stdin.starts_with("ok") { "1\n" } else { "0\n" };
                    let outcome = match self.checker_outcome {
                        Some((at, outcome)) if at == self.trial.get() => outcome,
                        _ => ProcessOutcome::Exited { code: 0 },
                    };
                    Ok(RunOutput {
                        outcome,
                        stdout: verdict.as_bytes().to_vec(),
                    })
                }
            }
        }
    }

    #[test]
    fn halts_as_soon_as_find_failures_are_stored() {
        let dir = scratch("halt");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let pipeline = ScriptedPipeline::failing_on(&[1, 3]);
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 5, find: 2 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.attempted, 3);
        assert_eq!(pipeline.runs_of(Artifact::Gen), 3);
        assert_eq!(report.outcome, StressOutcome::Found { found: 2, find: 2 });
        assert_eq!(report.outcome.summary(), "Found 2 / 2 failing test cases");
        assert_eq!(store.list().expect("list"), vec![1, 2]);
        assert_eq!(store.read(1).expect("read"), b"case 1\n");
        assert_eq!(store.read(2).expect("read"), b"case 3\n");
        assert_eq!(
            report.failures.iter().map(|f| f.trial).collect::<Vec<_>>(),
            vec![1, 3]
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn clean_run_attempts_every_trial_and_stores_nothing() {
        let dir = scratch("clean");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let pipeline = ScriptedPipeline::failing_on(&[]);
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 10, find: 3 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.attempted, 10);
        assert_eq!(report.outcome.summary(), "Passed 10 test cases");
        assert!(store.list().expect("list").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn found_never_exceeds_find() {
        let dir = scratch("cap");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let pipeline = ScriptedPipeline::failing_on(&[1, 2, 3, 4, 5, 6]);
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 6, find: 4 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.found, 4);
        assert_eq!(report.attempted, 4);
        assert_eq!(store.list().expect("list"), vec![1, 2, 3, 4]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn checker_protocol_persists_generated_input_not_candidate_output() {
        let dir = scratch("checker");
        let io = dir.join("io");
        ensure_dir(&io).expect("io");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let pipeline = ScriptedPipeline::failing_on(&[2]);
        let judge = CheckerJudge::new(&io);
        let report = run_trials(
            &pipeline,
            &judge,
            TrialLimits { tests: 4, find: 1 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.mode, StressMode::Check);
        assert_eq!(report.attempted, 2);
        assert_eq!(pipeline.runs_of(Artifact::Check), 2);
        assert_eq!(pipeline.runs_of(Artifact::Slow), 0);
        assert_eq!(store.read(1).expect("read"), b"case 2\n");
        assert_eq!(fs::read(judge.input_path()).expect("io input"), b"case 2\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn hanging_checker_aborts_after_candidate_ran() {
        let dir = scratch("checkhang");
        let io = dir.join("io");
        ensure_dir(&io).expect("io");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[]);
        pipeline.checker_outcome = Some((2, ProcessOutcome::TimedOut));
        let report = run_trials(
            &pipeline,
            &CheckerJudge::new(&io),
            TrialLimits { tests: 4, find: 1 },
            &store,
            &mut SilentObserver,
        );
        match &report.outcome {
            StressOutcome::Aborted {
                trial,
                last_completed,
                found,
                message,
            } => {
                assert_eq!(*trial, 2);
                assert_eq!(*last_completed, Phase::RunCandidate);
                assert_eq!(*found, 0);
                assert_eq!(message, "check timed out");
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(store.list().expect("list").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn checker_exit_code_does_not_override_its_verdict() {
        let dir = scratch("checkexit");
        let io = dir.join("io");
        ensure_dir(&io).expect("io");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[]);
        pipeline.checker_outcome = Some((1, ProcessOutcome::Exited { code: 1 }));
        let report = run_trials(
            &pipeline,
            &CheckerJudge::new(&io),
            TrialLimits { tests: 3, find: 1 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.outcome, StressOutcome::Passed { tests: 3 });

        let store2 = FailureStore::new(dir.join("cases2"));
        store2.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[2]);
        pipeline.checker_outcome = Some((2, ProcessOutcome::Exited { code: 1 }));
        let report = run_trials(
            &pipeline,
            &CheckerJudge::new(&io),
            TrialLimits { tests: 3, find: 1 },
            &store2,
            &mut SilentObserver,
        );
        assert_eq!(
            report.failures[0].reason,
            FailReason::Rejected {
                message: Some("0".to_string())
            }
        );
        assert_eq!(store2.read(1).expect("read"), b"case 2\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn crashing_or_hanging_candidate_is_a_stored_failure() {
        let dir = scratch("crash");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[]);
        pipeline.candidate_outcome = Some((2, ProcessOutcome::TimedOut));
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 3, find: 1 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.failures[0].reason, FailReason::CandidateTimedOut);
        assert_eq!(report.failures[0].trial, 2);
        assert_eq!(pipeline.runs_of(Artifact::Slow), 1);

        let store2 = FailureStore::new(dir.join("cases2"));
        store2.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[]);
        pipeline.candidate_outcome = Some((1, ProcessOutcome::Exited { code: 11 }));
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 3, find: 1 },
            &store2,
            &mut SilentObserver,
        );
        assert_eq!(
            report.failures[0].reason,
            FailReason::CandidateCrashed {
                outcome: ProcessOutcome::Exited { code: 11 }
            }
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn generator_crash_aborts_and_names_last_completed_phase() {
        let dir = scratch("genfail");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let mut pipeline = ScriptedPipeline::failing_on(&[1]);
        pipeline.gen_outcome = Some((3, ProcessOutcome::Signaled));
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 5, find: 5 },
            &store,
            &mut SilentObserver,
        );
        match &report.outcome {
            StressOutcome::Aborted {
                trial,
                last_completed,
                found,
                message,
            } => {
                assert_eq!(*trial, 3);
                assert_eq!(*last_completed, Phase::Judge);
                assert_eq!(*found, 1);
                assert!(message.contains("gen"), "{}", message);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert_eq!(store.list().expect("list"), vec![1]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn zero_tests_reports_clean_pass_without_running() {
        let dir = scratch("zero");
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        let pipeline = ScriptedPipeline::failing_on(&[1]);
        let report = run_trials(
            &pipeline,
            &DifferentialJudge,
            TrialLimits { tests: 0, find: 1 },
            &store,
            &mut SilentObserver,
        );
        assert_eq!(report.attempted, 0);
        assert_eq!(report.outcome, StressOutcome::Passed { tests: 0 });
        assert!(pipeline.log.borrow().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    struct FlakyCompiler {
        fail_on: Option<String>,
        calls: Cell<usize>,
    }

    impl Compiler for FlakyCompiler {
        fn compile(&self, source: &Path, output: &Path) -> Result<CompileStatus, BuildError> {
            self.calls.set(self.calls.get() + 1);
            let name = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if self.fail_on.as_deref() == Some(name) {
                return Ok(CompileStatus {
                    success: false,
                    code: Some(1),
                });
            }
            fs::write(output, b"bin").expect("fake binary");
            Ok(CompileStatus {
                success: true,
                code: Some(0),
            })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Vec<String>,
    }

    impl TrialObserver for RecordingObserver {
        fn on_build(&mut self, artifact: Artifact, _source: &Path, outcome: BuildOutcome) {
            self.events.push(format!("build {} {:?}", artifact, outcome));
        }

        fn on_build_failed(&mut self, artifact: Artifact, _source: &Path, _error: &BuildError) {
            self.events.push(format!("build-failed {}", artifact));
        }

        fn on_complete(&mut self, report: &StressReport) {
            self.events.push(report.outcome.summary());
        }
    }

    fn write_sources(dir: &Path) -> StressSources {
        let sources = StressSources {
            main: dir.join("main.cpp"),
            secondary: dir.join("slow.cpp"),
            gen: dir.join("gen.cpp"),
        };
        fs::write(&sources.main, b"main").expect("main");
        fs::write(&sources.secondary, b"slow").expect("slow");
        fs::write(&sources.gen, b"gen").expect("gen");
        sources
    }

    #[test]
    fn compile_failure_skips_trials_and_clears_folder_first() {
        let dir = scratch("compilefail");
        let bin = dir.join("bin");
        ensure_dir(&bin).expect("bin");
        let sources = write_sources(&dir);
        let store = FailureStore::new(dir.join("cases"));
        store.clear().expect("clear");
        store.persist(1, b"stale").expect("stale");

        let compiler = FlakyCompiler {
            fail_on: Some("slow.cpp".to_string()),
            calls: Cell::new(0),
        };
        let mut builder = BuildOrchestrator::new(MemoryCacheStore::default(), compiler, &bin);
        let pipeline = ScriptedPipeline::failing_on(&[1]);
        let mut observer = RecordingObserver::default();
        let report = run_stress(
            &mut builder,
            &pipeline,
            &DifferentialJudge,
            &sources,
            TrialLimits { tests: 5, find: 1 },
            &store,
            &mut observer,
        )
        .expect("run");

        assert!(matches!(
            report.outcome,
            StressOutcome::CompileFailed {
                artifact: Artifact::Slow,
                ..
            }
        ));
        assert!(pipeline.log.borrow().is_empty());
        assert!(store.list().expect("list").is_empty());
        assert_eq!(builder.record().slow, "");
        assert_eq!(observer.events[0], "build main Compiled");
        assert_eq!(observer.events[1], "build-failed slow");
        assert_eq!(observer.events.len(), 3);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn second_run_with_same_sources_hits_cache_for_all_artifacts() {
        let dir = scratch("rerun");
        let bin = dir.join("bin");
        ensure_dir(&bin).expect("bin");
        let sources = write_sources(&dir);
        let store = FailureStore::new(dir.join("cases"));
        let compiler = FlakyCompiler {
            fail_on: None,
            calls: Cell::new(0),
        };
        let mut builder = BuildOrchestrator::new(MemoryCacheStore::default(), compiler, &bin);
        let limits = TrialLimits { tests: 2, find: 1 };

        let mut first = RecordingObserver::default();
        run_stress(
            &mut builder,
            &ScriptedPipeline::failing_on(&[]),
            &DifferentialJudge,
            &sources,
            limits,
            &store,
            &mut first,
        )
        .expect("first run");
        let mut second = RecordingObserver::default();
        let report = run_stress(
            &mut builder,
            &ScriptedPipeline::failing_on(&[]),
            &DifferentialJudge,
            &sources,
            limits,
            &store,
            &mut second,
        )
        .expect("second run");

        assert_eq!(
            second.events[..3],
            ["build main Cached", "build slow Cached", "build gen Cached"]
        );
        assert!(report.outcome.is_passed());
        let _ = fs::remove_dir_all(dir);
    }
}
