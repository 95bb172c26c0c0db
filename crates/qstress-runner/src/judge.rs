//! Judging strategies. A trial produces a candidate output; the judge decides
//! whether it is acceptable for the generated input.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::Artifact;
use crate::error::TrialFault;
use crate::process::{Executor, ProcessOutcome, RunRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StressMode {
    /// generator -> candidate -> checker
    Check,
    /// generator -> candidate, generator -> reference
    Compare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailReason {
    /// The checker printed something other than `1`.
    Rejected { message: Option<String> },
    /// Candidate and reference outputs differ after trimming.
    Mismatch,
    CandidateCrashed { outcome: ProcessOutcome },
    CandidateTimedOut,
}

impl FailReason {
    pub fn describe(&self) -> String {
        match self {
            FailReason::Rejected { message: Some(m) } => format!("checker rejected output: {}", m),
            FailReason::Rejected { message: None } => "checker rejected output".to_string(),
            FailReason::Mismatch => "output differs from reference".to_string(),
            FailReason::CandidateCrashed { outcome } => format!("candidate {}", outcome),
            FailReason::CandidateTimedOut => "candidate timed out".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(FailReason),
}

#[cfg(test)]
impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Parses checker stdout. Exactly `1` passes, optionally followed by one line
/// terminator; anything else fails and is kept as the message.
///
/// Padding is not stripped: `" 1 "` is a rejection, unlike checkers judged by
/// a whitespace-stripping harness.
pub fn parse_checker_verdict(stdout: &[u8]) -> Verdict {
    let body = stdout
        .strip_suffix(b"\r\n")
        .or_else(|| stdout.strip_suffix(b"\n"))
        .unwrap_or(stdout);
    if body == b"1" {
        return Verdict::Pass;
    }
    let text = String::from_utf8_lossy(body);
    let message = text.lines().next().map(str::trim).filter(|l| !l.is_empty());
    Verdict::Fail(FailReason::Rejected {
        message: message.map(str::to_string),
    })
}

/// Whitespace around the outputs is ignored; everything else must match
/// byte for byte. Non-UTF-8 output is trimmed of ASCII whitespace only.
pub fn outputs_match(left: &[u8], right: &[u8]) -> bool {
    match (std::str::from_utf8(left), std::str::from_utf8(right)) {
        (Ok(l), Ok(r)) => l.trim() == r.trim(),
        _ => left.trim_ascii() == right.trim_ascii(),
    }
}

pub trait Judge {
    fn mode(&self) -> StressMode;

    /// The artifact the judge runs besides the candidate and generator.
    fn secondary(&self) -> Artifact;

    fn judge(
        &self,
        executor: &dyn Executor,
        input: &[u8],
        candidate_output: &[u8],
    ) -> Result<Verdict, TrialFault>;
}

/// Feeds the candidate's output to `check` on stdin. The generated input is
/// written to `input.txt` in the checker's working directory.
#[derive(Debug, Clone)]
pub struct CheckerJudge {
    io_dir: PathBuf,
}

impl CheckerJudge {
    pub fn new(io_dir: impl AsRef<Path>) -> Self {
        Self {
            io_dir: io_dir.as_ref().to_path_buf(),
        }
    }

    pub fn input_path(&self) -> PathBuf {
        self.io_dir.join("input.txt")
    }
}

impl Judge for CheckerJudge {
    fn mode(&self) -> StressMode {
        StressMode::Check
    }

    fn secondary(&self) -> Artifact {
        Artifact::Check
    }

    fn judge(
        &self,
        executor: &dyn Executor,
        input: &[u8],
        candidate_output: &[u8],
    ) -> Result<Verdict, TrialFault> {
        fs::write(self.input_path(), input)?;
        let request = RunRequest::captured()
            .with_stdin(candidate_output)
            .in_dir(&self.io_dir);
        let checked = executor.run(Artifact::Check, &request)?;
        // The verdict is carried on stdout; only a checker that never finished is a fault.
        match checked.outcome {
            ProcessOutcome::Exited { .. } => Ok(parse_checker_verdict(&checked.stdout)),
            outcome => Err(TrialFault::ChildFailed {
                artifact: Artifact::Check,
                outcome,
            }),
        }
    }
}

/// Runs `slow` on the same input and compares trimmed outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferentialJudge;

impl Judge for DifferentialJudge {
    fn mode(&self) -> StressMode {
        StressMode::Compare
    }

    fn secondary(&self) -> Artifact {
        Artifact::Slow
    }

    fn judge(
        &self,
        executor: &dyn Executor,
        input: &[u8],
        candidate_output: &[u8],
    ) -> Result<Verdict, TrialFault> {
        let reference = executor.run(Artifact::Slow, &RunRequest::captured().with_stdin(input))?;
        if !reference.outcome.success() {
            return Err(TrialFault::ChildFailed {
                artifact: Artifact::Slow,
                outcome: reference.outcome,
            });
        }
        if outputs_match(candidate_output, &reference.stdout) {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::Fail(FailReason::Mismatch))
        }
    }
}
