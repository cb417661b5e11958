use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use orca::agent::Agent;
use orca::app::{restore_terminal_best_effort, Dashboard, UiRunner};
use orca::bus::EventBus;
use orca::config::Config;
use orca::headless::HeadlessUi;
use orca::launcher::{Launcher, TaskOutcome, TaskSpec};
use orca::process::ProcessManager;
use orca::shutdown::{ShutdownReport, ShutdownSequencer, Teardown};
use orca::{olog, olog_debug, olog_error, olog_warn, signals, Error, Result};

/// Time given to launchers to publish final events once the UI is gone.
const WORK_SETTLE: Duration = Duration::from_millis(500);
/// Time given to leftover runtime tasks before they are abandoned.
const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(250);

/// orca - run coding agents side by side and watch them work
#[derive(Parser, Debug)]
#[command(name = "orca")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    ORCA_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.orca/orca.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run one or more agents on a prompt
    Run {
        /// The task description in natural language
        prompt: String,

        /// Agent to launch; repeat to run several side by side
        #[arg(short = 'a', long = "agent")]
        agents: Vec<String>,

        /// Run in headless mode (no TUI, JSON lines on stdout)
        #[arg(long)]
        headless: bool,

        /// Project directory (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// List configured agents and whether their binaries are installed
    Agents {
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Print the merged configuration
    Config {
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            prompt,
            agents,
            headless,
            project,
        } => run_agents(cli.debug, prompt, agents, headless, project),
        Command::Agents { project } => run_list_agents(project).map(|()| 0),
        Command::Config { project } => run_show_config(project).map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            olog_error!("orca failed: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(project: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let project_dir = match project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&Config::global_path()?, &Config::project_path(&project_dir))?;
    Ok((config, project_dir))
}

fn run_agents(
    debug: bool,
    prompt: String,
    agents: Vec<String>,
    headless: bool,
    project: Option<PathBuf>,
) -> Result<u8> {
    let (config, project_dir) = load_config(project)?;
    orca::log::init(orca::log::resolve_level(debug, config.log_level.as_deref()));
    olog!(
        "orca starting: project={} headless={}",
        project_dir.display(),
        headless
    );

    let names = if agents.is_empty() {
        vec![config.default_agent.clone()]
    } else {
        agents
    };
    let specs = build_tasks(&config, &names, &prompt, &project_dir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("orca-worker")
        .build()?;

    let bus = Arc::new(EventBus::new(config.event_buffer()));
    let processes = Arc::new(ProcessManager::new());
    let sequencer = ShutdownSequencer::new(processes.clone(), config.shutdown_grace());
    let launcher = Launcher::new(bus.clone(), processes.clone(), sequencer.work_token());

    // Subscribe before any work starts so no event is missed.
    let (report, outcomes) = if headless {
        let ui = HeadlessUi::new(&bus);
        runtime.block_on(supervise(&sequencer, ui, launcher, specs, &bus))?
    } else {
        let ui = Dashboard::new(&bus, config.output_lines);
        runtime.block_on(supervise(&sequencer, ui, launcher, specs, &bus))?
    };

    restore_terminal_best_effort();
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN);

    if report.teardown == Teardown::TimedOut {
        olog_warn!("Forced exit: UI did not stop within {:?}", sequencer.grace());
    }
    if !headless {
        if let Some(outcomes) = &outcomes {
            print_summary(outcomes);
        }
    }
    olog!(
        "orca finished: trigger={:?} teardown={:?} elapsed={:?}",
        report.trigger,
        report.teardown,
        report.elapsed
    );

    let code = report.exit_code();
    if let Err(e) = report.into_result() {
        olog_error!("UI failed: {}", e);
        eprintln!("Error: {}", e);
    }
    Ok(u8::try_from(code).unwrap_or(1))
}

fn build_tasks(
    config: &Config,
    names: &[String],
    prompt: &str,
    project_dir: &std::path::Path,
) -> Result<Vec<TaskSpec>> {
    names
        .iter()
        .map(|name| {
            let agent = Agent::resolve(config, name)?;
            if !agent.is_available() {
                return Err(Error::AgentNotAvailable(agent.binary().to_string()));
            }
            olog_debug!("task for {}: {:?}", name, agent.command(prompt));
            Ok(agent.task(prompt, project_dir.to_path_buf()))
        })
        .collect()
}

/// Run the work and the UI side by side until the sequencer completes.
async fn supervise<U: UiRunner>(
    sequencer: &ShutdownSequencer,
    ui: U,
    launcher: Launcher,
    specs: Vec<TaskSpec>,
    bus: &Arc<EventBus>,
) -> Result<(ShutdownReport, Option<Vec<TaskOutcome>>)> {
    let signals = signals::listen()?;

    let work_bus = bus.clone();
    let work = tokio::spawn(async move {
        let outcomes = launcher.run_all(specs).await;
        work_bus.close();
        outcomes
    });

    let report = sequencer.run(ui, signals).await;
    bus.close();

    let outcomes = match tokio::time::timeout(WORK_SETTLE, work).await {
        Ok(Ok(outcomes)) => Some(outcomes),
        Ok(Err(e)) => {
            olog_error!("work task failed: {}", e);
            None
        }
        Err(_) => {
            olog_warn!("work did not settle within {:?}", WORK_SETTLE);
            None
        }
    };

    Ok((report, outcomes))
}

fn print_summary(outcomes: &[TaskOutcome]) {
    for outcome in outcomes {
        let exit = outcome
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<10} exit {:<4} {:>8}ms",
            outcome.label, outcome.status, exit, outcome.duration_ms
        );
    }
}

fn run_list_agents(project: Option<PathBuf>) -> Result<()> {
    let (config, _) = load_config(project)?;
    for name in config.agents.keys() {
        let marker = if *name == config.default_agent { "*" } else { " " };
        match Agent::resolve(&config, name) {
            Ok(agent) => {
                let availability = if agent.is_available() {
                    "available"
                } else {
                    "not installed"
                };
                println!(
                    "{} {:<12} {:<10} {:<10} {}",
                    marker,
                    name,
                    agent.provider,
                    agent.binary(),
                    availability
                );
            }
            Err(e) => println!("{} {:<12} {}", marker, name, e),
        }
    }
    Ok(())
}

fn run_show_config(project: Option<PathBuf>) -> Result<()> {
    let (config, project_dir) = load_config(project)?;
    eprintln!("# global:  {}", Config::global_path()?.display());
    eprintln!("# project: {}", Config::project_path(&project_dir).display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
