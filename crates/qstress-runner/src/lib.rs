use anyhow::{anyhow, Result};
use qstress_core::{Config, StressHome};
use std::path::{Path, PathBuf};

mod artifact;
mod build;
mod cache;
mod error;
mod judge;
mod process;
mod replay;
mod trial;

pub use artifact::Artifact;
pub use build::{BuildOrchestrator, BuildOutcome, CompileStatus, Compiler, ExternalCompiler};
pub use cache::{content_digest, CacheRecord, CacheStore, FileCacheStore, MemoryCacheStore};
pub use error::{BuildError, ProcessError, TrialFault};
pub use judge::{
    outputs_match, parse_checker_verdict, CheckerJudge, DifferentialJudge, FailReason, Judge,
    StressMode, Verdict,
};
pub use process::{Executor, ProcessOutcome, ProcessRunner, RunOutput, RunRequest};
pub use replay::{replay_all, replay_case, FailureStore, ReplayOutput, ReplayView};
pub use trial::{
    run_stress, run_trials, FailureRecord, Phase, SilentObserver, StressOutcome, StressReport,
    StressSources, TrialLimits, TrialObserver,
};

/// Everything one invocation needs: the tool home, the effective config and
/// the directory failing cases are resolved against.
pub struct Workbench {
    home: StressHome,
    config: Config,
    work_dir: PathBuf,
}

impl Workbench {
    pub fn new(home: StressHome, config: Config, work_dir: impl AsRef<Path>) -> Result<Self> {
        config.validate()?;
        home.ensure()?;
        Ok(Self {
            home,
            config,
            work_dir: work_dir.as_ref().to_path_buf(),
        })
    }

    pub fn home(&self) -> &StressHome {
        &self.home
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn builder(&self) -> BuildOrchestrator<FileCacheStore, ExternalCompiler> {
        BuildOrchestrator::new(
            FileCacheStore::new(self.home.cache_path()),
            ExternalCompiler::new(&self.config.compiler_bin, self.config.compile_args.clone()),
            self.home.bin_dir(),
        )
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(self.home.bin_dir(), self.config.timeout())
    }

    pub fn failure_store(&self) -> FailureStore {
        FailureStore::new(self.resolve(&self.config.folder))
    }

    pub fn limits(&self) -> TrialLimits {
        TrialLimits {
            tests: self.config.tests,
            find: self.config.find,
        }
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    fn sources(&self, main: &Path, secondary: &Path, gen: &Path) -> StressSources {
        StressSources {
            main: self.resolve(main),
            secondary: self.resolve(secondary),
            gen: self.resolve(gen),
        }
    }

    /// generator -> candidate -> checker
    pub fn check(
        &self,
        main: &Path,
        check: &Path,
        gen: &Path,
        observer: &mut dyn TrialObserver,
    ) -> Result<StressReport> {
        let judge = CheckerJudge::new(self.home.io_dir());
        run_stress(
            &mut self.builder(),
            &self.runner(),
            &judge,
            &self.sources(main, check, gen),
            self.limits(),
            &self.failure_store(),
            observer,
        )
    }

    /// generator -> candidate vs. reference
    pub fn compare(
        &self,
        main: &Path,
        slow: &Path,
        gen: &Path,
        observer: &mut dyn TrialObserver,
    ) -> Result<StressReport> {
        run_stress(
            &mut self.builder(),
            &self.runner(),
            &DifferentialJudge,
            &self.sources(main, slow, gen),
            self.limits(),
            &self.failure_store(),
            observer,
        )
    }

    pub fn compile(&self, artifact: Artifact, source: &Path) -> Result<BuildOutcome, BuildError> {
        self.builder().ensure_built(artifact, &self.resolve(source))
    }

    /// Builds the generator and returns one generated input.
    pub fn preview_gen(&self, source: &Path) -> Result<String> {
        self.compile(Artifact::Gen, source)?;
        let run = self.runner().run(Artifact::Gen, &RunRequest::captured())?;
        if !run.outcome.success() {
            return Err(anyhow!("generator {}", run.outcome));
        }
        Ok(run.stdout_text())
    }

    /// `index == 0` replays every stored case.
    pub fn view(&self, index: usize, checker_mode: bool) -> Result<Vec<ReplayView>> {
        let store = self.failure_store();
        let runner = self.runner();
        if index == 0 {
            replay_all(&runner, &store, checker_mode)
        } else {
            Ok(vec![replay_case(&runner, &store, index, checker_mode)?])
        }
    }
}
