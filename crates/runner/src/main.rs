#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use ho_core::ids::{WorkUnitId, WorkUnitIdError};
use ho_core::model::OverallStatus;
use ho_runner::defaults;
use ho_runner::exec::{CommandRunner, RunnerSettings};
use ho_runner::handoff::{
    Consumer, ConsumerConfig, ConsumerExit, HandoffError, Producer, ProducerConfig, StartMode,
};
use ho_runner::plan::{CommandPlan, PlanError};
use ho_runner::report::{self, ReportError};
use ho_runner::sequence::{ArchiveSink, PrintSink, RunSequencer};
use ho_runner::supervisor::{self, RELOAD_EXIT_CODE, SourceWatch};
use ho_runner::vcs::{GitVcs, Vcs, VcsError};
use ho_storage::{Archive, BlobStore, StoreError, StoreSpec};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "HANDOFF_LOG";

#[derive(Parser)]
#[command(name = "ho_runner", version)]
#[command(about = "Hand commits from a CI bot to a tester through a shared blob store")]
struct Cli {
    /// Shared store: `dir:PATH`, `sqlite:PATH` or `memory:` (default: dir under the repo)
    #[arg(long, global = true, env = "HANDOFF_STORE")]
    store: Option<String>,

    /// JSON command plan (default: handoff-plan.json in the repo)
    #[arg(long, global = true, env = "HANDOFF_PLAN")]
    plan: Option<PathBuf>,

    /// Git checkout to test in (default: enclosing repo of the working directory)
    #[arg(long, global = true, env = "HANDOFF_REPO")]
    repo: Option<PathBuf>,

    #[arg(long, global = true, env = "HANDOFF_BRANCH", default_value = "master")]
    branch: String,

    /// Seconds between signal polls
    #[arg(long, global = true, env = "HANDOFF_POLL_SECS", default_value_t = 30)]
    poll_secs: u64,

    /// Per-command timeout; overrides the plan
    #[arg(long, global = true, env = "HANDOFF_COMMAND_TIMEOUT_SECS")]
    command_timeout_secs: Option<u64>,

    /// Extra files whose change makes the tester relaunch itself (repeatable)
    #[arg(long, global = true)]
    watch: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the plan once against the current checkout
    RunOnce {
        /// Archive failure logs and the overall status instead of printing them
        #[arg(long)]
        archive: bool,
        /// Work unit to archive under (default: HEAD)
        #[arg(long)]
        id: Option<String>,
    },
    /// Offer a work unit to the tester and wait for its status
    Bot {
        #[arg(long)]
        id: Option<String>,
    },
    /// Poll for offers and test them, forever
    Tester {
        /// Process a single iteration and exit
        #[arg(long)]
        once: bool,
    },
    /// Print every archived log for a work unit
    PrintLogs { id: String },
    /// Print the current signal state
    State,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("invalid work unit id: {0}")]
    Id(#[from] WorkUnitIdError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Handoff(#[from] HandoffError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl CliError {
    /// 2 for usage and configuration mistakes, 1 for everything that went wrong at run time.
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) | CliError::Id(_) | CliError::Plan(_) => 2,
            CliError::Store(StoreError::InvalidSpec { .. }) => 2,
            _ => 1,
        }
    }
}

fn status_exit_code(status: OverallStatus) -> u8 {
    match status {
        OverallStatus::Passed => 0,
        OverallStatus::Failed => 1,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Env {
    repo: PathBuf,
    branch: String,
    store: Option<String>,
    plan_path: PathBuf,
    plan_explicit: bool,
    poll: Duration,
    command_timeout: Option<Duration>,
    watch: Vec<PathBuf>,
}

impl Env {
    fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.poll_secs == 0 {
            return Err(CliError::Usage("--poll-secs must be positive".to_string()));
        }
        if cli.command_timeout_secs == Some(0) {
            return Err(CliError::Usage(
                "--command-timeout-secs must be positive".to_string(),
            ));
        }
        let repo = cli.repo.clone().unwrap_or_else(defaults::default_repo_root);
        let plan_path = cli
            .plan
            .clone()
            .unwrap_or_else(|| defaults::default_plan_path(&repo));
        Ok(Self {
            plan_explicit: cli.plan.is_some(),
            plan_path,
            branch: cli.branch.clone(),
            store: cli.store.clone(),
            poll: Duration::from_secs(cli.poll_secs),
            command_timeout: cli.command_timeout_secs.map(Duration::from_secs),
            watch: cli.watch.clone(),
            repo,
        })
    }

    fn open_store(&self) -> Result<Box<dyn BlobStore>, CliError> {
        let spec = match &self.store {
            Some(raw) => raw.parse::<StoreSpec>()?,
            None => StoreSpec::Dir(defaults::default_store_dir(&self.repo)),
        };
        info!(store = %spec, "opening store");
        Ok(spec.open()?)
    }

    /// A missing default plan is an empty plan unless the caller needs commands.
    fn load_plan(&self, required: bool) -> Result<CommandPlan, CliError> {
        if !required && !self.plan_explicit && !self.plan_path.exists() {
            return Ok(CommandPlan::default());
        }
        Ok(CommandPlan::load(&self.plan_path)?)
    }

    fn resolve_id(&self, raw: Option<&str>) -> Result<WorkUnitId, CliError> {
        match raw {
            Some(raw) => Ok(WorkUnitId::try_new(raw)?),
            None => Ok(GitVcs::new(&self.repo, &self.branch).head()?),
        }
    }

    fn command_timeout(&self, plan: &CommandPlan) -> Duration {
        self.command_timeout.unwrap_or_else(|| plan.command_timeout())
    }

    fn runner(&self, plan: &CommandPlan) -> CommandRunner {
        CommandRunner::new(RunnerSettings {
            timeout: self.command_timeout(plan),
            cwd: Some(self.repo.clone()),
            ..RunnerSettings::default()
        })
    }
}

fn run_once(env: &Env, archive: bool, id: Option<&str>) -> Result<ExitCode, CliError> {
    let plan = env.load_plan(true)?;
    let runner = env.runner(&plan);
    let sequencer =
        RunSequencer::new(&runner).with_cleanup(plan.cleanup.as_ref(), plan.cleanup_timeout());

    let failed = if archive {
        let store = env.open_store()?;
        let id = env.resolve_id(id)?;
        info!(work_unit = %id, "running once");
        let mut sink = ArchiveSink::new(Archive::new(&*store), &id);
        let outcome = sequencer.run_all(&plan.commands, &mut sink);
        Archive::new(&*store).write_status(&id, OverallStatus::from_failed(outcome.failed()))?;
        outcome.failed()
    } else {
        let stdout = std::io::stdout();
        let mut sink = PrintSink::new(stdout.lock());
        sequencer.run_all(&plan.commands, &mut sink).failed()
    };
    let status = OverallStatus::from_failed(failed);
    Ok(ExitCode::from(status_exit_code(status)))
}

fn run_bot(env: &Env, id: Option<&str>) -> Result<ExitCode, CliError> {
    let plan = env.load_plan(false)?;
    let store = env.open_store()?;
    let id = env.resolve_id(id)?;
    let config = ProducerConfig {
        poll_interval: env.poll,
        timeout: plan.producer_timeout(env.command_timeout(&plan)),
    };
    let report = Producer::new(&*store, config).offer_and_wait(&id)?;
    if report.status.is_failed() {
        println!("Tests failed, you can print the logs by running:");
        println!("  ho_runner print-logs {}", report.id);
    }
    Ok(ExitCode::from(status_exit_code(report.status)))
}

fn run_tester(env: &Env, once: bool) -> Result<ExitCode, CliError> {
    let plan = env.load_plan(true)?;
    let store = env.open_store()?;
    let runner = env.runner(&plan);
    let mut vcs = GitVcs::new(&env.repo, &env.branch);
    // The plan is read once; a changed plan needs a fresh process just like a new binary.
    let mut watch = SourceWatch::for_current_exe(
        std::iter::once(env.plan_path.clone()).chain(env.watch.iter().cloned()),
    );
    let start = if supervisor::is_reloaded_start() {
        StartMode::Reloaded
    } else {
        StartMode::Fresh
    };
    let config = ConsumerConfig {
        poll_interval: env.poll,
        start,
    };
    let exit = Consumer::new(&*store, &mut vcs, &mut watch, &runner, &plan, config).run(once)?;
    match exit {
        ConsumerExit::Stopped => Ok(ExitCode::SUCCESS),
        ConsumerExit::Reload => {
            drop(store);
            let err = supervisor::relaunch();
            warn!(error = %err, "cannot relaunch in place, exiting for the supervisor");
            Ok(ExitCode::from(RELOAD_EXIT_CODE as u8))
        }
    }
}

fn print_logs(env: &Env, raw_id: &str) -> Result<ExitCode, CliError> {
    let id = WorkUnitId::try_new(raw_id)?;
    let plan = env.load_plan(false)?;
    let store = env.open_store()?;
    let stdout = std::io::stdout();
    let found = report::print_logs(&*store, &id, &mut stdout.lock())?;
    if found == 0 {
        println!("No failure logs archived for {id}");
    }
    if let Some(cmd) = plan.report_for(&id) {
        match report::run_report_command(&cmd, &env.repo) {
            Ok(status) if !status.success() => {
                warn!(command = %cmd.display(), status = %status, "report command failed")
            }
            Ok(_) => {}
            Err(err) => warn!(command = %cmd.display(), error = %err, "report command failed"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let env = Env::from_cli(&cli)?;
    match cli.command {
        Commands::RunOnce { archive, id } => run_once(&env, archive, id.as_deref()),
        Commands::Bot { id } => run_bot(&env, id.as_deref()),
        Commands::Tester { once } => run_tester(&env, once),
        Commands::PrintLogs { id } => print_logs(&env, &id),
        Commands::State => {
            let store = env.open_store()?;
            report::print_state(&*store, &mut std::io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "fatal");
            eprintln!("ho_runner: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_for(args: &[&str]) -> Result<Env, CliError> {
        let argv = ["ho_runner", "--repo", "/nonexistent/ho-repo"]
            .iter()
            .chain(args)
            .copied();
        let cli = Cli::try_parse_from(argv).expect("parse");
        Env::from_cli(&cli)
    }

    #[test]
    fn reported_status_decides_the_bot_exit_code() {
        assert_eq!(status_exit_code(OverallStatus::Passed), 0);
        assert_eq!(status_exit_code(OverallStatus::Failed), 1);
    }

    #[test]
    fn configuration_mistakes_exit_with_two() {
        let err = env_for(&["--poll-secs", "0", "state"])
            .err()
            .expect("zero poll interval");
        assert!(matches!(err, CliError::Usage(_)));
        assert_eq!(err.exit_code(), 2);

        let env = env_for(&["--store", "s3://bucket", "state"]).expect("env");
        let err = env.open_store().err().expect("unsupported store");
        assert_eq!(err.exit_code(), 2);

        let err = env.resolve_id(Some("magic")).err().expect("reserved id");
        assert_eq!(err.exit_code(), 2);

        let env = env_for(&["--plan", "/nonexistent/ho-plan.json", "state"]).expect("env");
        let err = env.load_plan(false).err().expect("explicit plan must exist");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn runtime_failures_exit_with_one() {
        let id = WorkUnitId::try_new("abc").expect("id");
        let err = CliError::from(HandoffError::StatusMissing { id });
        assert_eq!(err.exit_code(), 1);
        let err = CliError::from(StoreError::Poisoned);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn missing_default_plan_is_empty_unless_required() {
        let env = env_for(&["state"]).expect("env");
        let plan = env.load_plan(false).expect("optional plan");
        assert!(plan.commands.is_empty());
        let err = env.load_plan(true).err().expect("required plan");
        assert_eq!(err.exit_code(), 2);
    }
}
