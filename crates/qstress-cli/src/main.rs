use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use qstress_core::{load_config, Config, StressHome};
use qstress_runner::{
    Artifact, BuildError, BuildOutcome, FailureRecord, ReplayView, StressOutcome, StressReport,
    TrialObserver, Workbench,
};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "qstress", version, about = "Stress test competitive programming solutions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TargetArg {
    Check,
    Gen,
    Main,
    Slow,
}

impl From<TargetArg> for Artifact {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Check => Artifact::Check,
            TargetArg::Gen => Artifact::Gen,
            TargetArg::Main => Artifact::Main,
            TargetArg::Slow => Artifact::Slow,
        }
    }
}

#[derive(clap::Args, Clone, Debug, Default)]
struct LoopOverrides {
    /// Max number of tests to run
    #[arg(long)]
    tests: Option<usize>,
    /// Max number of failing tests to find
    #[arg(long)]
    find: Option<usize>,
    /// Folder to save failing tests
    #[arg(long)]
    folder: Option<String>,
    /// Per-process time limit in milliseconds (0 disables it)
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl LoopOverrides {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(tests) = self.tests {
            config.tests = tests;
        }
        if let Some(find) = self.find {
            config.find = find;
        }
        if let Some(folder) = &self.folder {
            config.folder = folder.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generates test cases and checks whether output is valid
    Check {
        /// File to stress test
        main_file: PathBuf,
        /// File to check outputs
        check_file: PathBuf,
        /// File to generate tests
        gen_file: PathBuf,
        #[command(flatten)]
        overrides: LoopOverrides,
        #[arg(long)]
        json: bool,
    },
    /// Generates test cases and compares outputs from two programs
    Cmp {
        /// File to stress test
        main_file: PathBuf,
        /// File to compare against
        slow_file: PathBuf,
        /// File to generate tests
        gen_file: PathBuf,
        #[command(flatten)]
        overrides: LoopOverrides,
        #[arg(long)]
        json: bool,
    },
    /// Compiles a file to the binary slot of a target
    Compile {
        #[arg(value_enum)]
        target: TargetArg,
        file_name: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Outputs the current config values
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Generates a test case and displays it
    Gen {
        gen_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Views output for failing test cases using compiled binaries
    View {
        /// Test case to view (0 views all)
        #[arg(default_value_t = 0)]
        test: usize,
        #[arg(long)]
        folder: Option<String>,
        /// Use checker mode (only the candidate is re-run)
        #[arg(long)]
        checker: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(CommandResult { payload, ok }) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

struct CommandResult {
    payload: Option<Value>,
    ok: bool,
}

impl CommandResult {
    fn done(ok: bool) -> Self {
        Self { payload: None, ok }
    }

    fn json(payload: Value, ok: bool) -> Self {
        Self {
            payload: Some(payload),
            ok,
        }
    }
}

fn open_workbench(overrides: &LoopOverrides) -> Result<Workbench> {
    let home = StressHome::discover()?;
    home.ensure()?;
    let config = overrides.apply(load_config(&home)?);
    Workbench::new(home, config, std::env::current_dir()?)
}

fn run_command(command: Commands) -> Result<CommandResult> {
    match command {
        Commands::Check {
            main_file,
            check_file,
            gen_file,
            overrides,
            json,
        } => {
            let bench = open_workbench(&overrides)?;
            let report = if json {
                bench.check(&main_file, &check_file, &gen_file, &mut qstress_runner::SilentObserver)?
            } else {
                bench.check(&main_file, &check_file, &gen_file, &mut ConsoleObserver::default())?
            };
            Ok(finish_report("check", report, json))
        }
        Commands::Cmp {
            main_file,
            slow_file,
            gen_file,
            overrides,
            json,
        } => {
            let bench = open_workbench(&overrides)?;
            let report = if json {
                bench.compare(&main_file, &slow_file, &gen_file, &mut qstress_runner::SilentObserver)?
            } else {
                bench.compare(&main_file, &slow_file, &gen_file, &mut ConsoleObserver::default())?
            };
            Ok(finish_report("cmp", report, json))
        }
        Commands::Compile {
            target,
            file_name,
            json,
        } => {
            let bench = open_workbench(&LoopOverrides::default())?;
            let artifact: Artifact = target.into();
            let result = bench.compile(artifact, &file_name);
            if json {
                let payload = match &result {
                    Ok(outcome) => json!({
                        "ok": true,
                        "command": "compile",
                        "target": artifact,
                        "source": file_name.display().to_string(),
                        "outcome": outcome,
                    }),
                    Err(err) => json_error("compile_failed", err.to_string(), json!({ "target": artifact })),
                };
                return Ok(CommandResult::json(payload, result.is_ok()));
            }
            match result {
                Ok(outcome) => {
                    print_build(&file_name, outcome);
                    Ok(CommandResult::done(true))
                }
                Err(err) => {
                    print_build_failure(&file_name, &err);
                    Ok(CommandResult::done(false))
                }
            }
        }
        Commands::Config { json } => {
            let home = StressHome::discover()?;
            home.ensure()?;
            let config = load_config(&home)?;
            if json {
                return Ok(CommandResult::json(
                    json!({
                        "ok": true,
                        "command": "config",
                        "path": home.config_path().display().to_string(),
                        "config": config,
                    }),
                    true,
                ));
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(CommandResult::done(true))
        }
        Commands::Gen { gen_file, json } => {
            let bench = open_workbench(&LoopOverrides::default())?;
            let generated = bench.preview_gen(&gen_file)?;
            if json {
                return Ok(CommandResult::json(
                    json!({ "ok": true, "command": "gen", "input": generated }),
                    true,
                ));
            }
            print_panel("Generated", &[("", generated.as_str())]);
            Ok(CommandResult::done(true))
        }
        Commands::View {
            test,
            folder,
            checker,
            timeout_ms,
            json,
        } => {
            let overrides = LoopOverrides {
                folder,
                timeout_ms,
                ..LoopOverrides::default()
            };
            let bench = open_workbench(&overrides)?;
            let views = bench.view(test, checker)?;
            if json {
                return Ok(CommandResult::json(
                    json!({ "ok": true, "command": "view", "checker": checker, "cases": views }),
                    true,
                ));
            }
            if views.is_empty() {
                println!("no failing test cases in {}", bench.failure_store().dir().display());
            }
            for view in &views {
                print_view(view, checker);
            }
            Ok(CommandResult::done(true))
        }
    }
}

fn finish_report(command: &str, report: StressReport, json: bool) -> CommandResult {
    let ok = report.outcome.is_passed();
    if json {
        return CommandResult::json(
            json!({ "ok": ok, "command": command, "report": report_to_json(&report) }),
            ok,
        );
    }
    CommandResult::done(ok)
}

fn report_to_json(report: &StressReport) -> Value {
    let mut value = serde_json::to_value(report).unwrap_or_else(|_| json!({}));
    value["summary"] = Value::String(report.outcome.summary());
    value
}

fn emit_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Check { json, .. }
        | Commands::Cmp { json, .. }
        | Commands::Compile { json, .. }
        | Commands::Config { json }
        | Commands::Gen { json, .. }
        | Commands::View { json, .. } => *json,
    }
}

fn print_build(source: &Path, outcome: BuildOutcome) {
    match outcome {
        BuildOutcome::Cached => println!("Used cached {}", source.display()),
        BuildOutcome::Compiled => println!("Compiled {}", source.display()),
    }
}

fn print_build_failure(source: &Path, err: &BuildError) {
    println!();
    println!("Failed to compile {}", source.display());
    println!("  {}", err);
}

/// Plain-text progress for interactive runs. The trial counter is redrawn in
/// place on stderr.
#[derive(Default)]
struct ConsoleObserver {
    progress_drawn: bool,
}

impl ConsoleObserver {
    fn end_progress_line(&mut self) {
        if self.progress_drawn {
            eprintln!();
            self.progress_drawn = false;
        }
    }
}

impl TrialObserver for ConsoleObserver {
    fn on_build(&mut self, _artifact: Artifact, source: &Path, outcome: BuildOutcome) {
        print_build(source, outcome);
    }

    fn on_build_failed(&mut self, _artifact: Artifact, source: &Path, error: &BuildError) {
        print_build_failure(source, error);
    }

    fn on_trial_start(&mut self, trial: usize, found: usize, find: usize) {
        if trial == 1 {
            println!();
        }
        eprint!("\rRunning on test {} ({} / {})", trial, found, find);
        let _ = std::io::stderr().flush();
        self.progress_drawn = true;
    }

    fn on_failure(&mut self, record: &FailureRecord) {
        self.end_progress_line();
        println!(
            "test {} failed ({}), saved as {}",
            record.trial,
            record.reason.describe(),
            record.path.display()
        );
    }

    fn on_complete(&mut self, report: &StressReport) {
        self.end_progress_line();
        match &report.outcome {
            StressOutcome::CompileFailed { .. } => {}
            outcome => println!("{}", outcome.summary()),
        }
    }
}

fn print_panel(title: &str, sections: &[(&str, &str)]) {
    println!("==== {} ====", title);
    for (heading, body) in sections {
        if !heading.is_empty() {
            println!();
            println!("{}:", heading);
        }
        println!();
        print!("{}", body);
        if !body.ends_with('\n') {
            println!();
        }
    }
    println!();
}

fn print_view(view: &ReplayView, checker: bool) {
    let mut sections: Vec<(String, String)> = vec![("Input".to_string(), view.input.clone())];
    for output in &view.outputs {
        let heading = if checker {
            "Output".to_string()
        } else {
            format!("Output ({})", output.artifact)
        };
        let mut body = output.stdout.clone();
        if !output.outcome.success() {
            if !body.is_empty() && !body.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(&format!("[{} {}]", output.artifact, output.outcome));
        }
        sections.push((heading, body));
    }
    let borrowed: Vec<(&str, &str)> = sections
        .iter()
        .map(|(h, b)| (h.as_str(), b.as_str()))
        .collect();
    print_panel(&format!("Test {}", view.index), &borrowed);
}
