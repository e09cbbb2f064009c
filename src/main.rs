//! Binary entry point for rubricflow.
//!
//! This binary provides the CLI interface over sessions, content generation
//! and the pre-generation worker.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use rubricflow::models::DeviceType;
use rubricflow::observability::{self, InitOptions};
use rubricflow::pipeline::{ContentStatus, TickOutcome, Worker, run_pool};
use rubricflow::services::{CreateSessionRequest, ServiceContainer, StorySeed};
use rubricflow::{ContainerType, DeviceDescriptor, RubricflowConfig, Subject};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Rubricflow - rubric-driven content generation for adaptive learning sessions.
#[derive(Parser)]
#[command(name = "rubricflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "RUBRICFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Manage sessions.
    #[command(subcommand)]
    Session(SessionCommand),

    /// Start and complete containers.
    #[command(subcommand)]
    Container(ContainerCommand),

    /// Generate (or return memoized) content for one unit.
    Generate {
        #[command(flatten)]
        unit: UnitArgs,

        /// Regenerate even when content is memoized.
        #[arg(long)]
        force: bool,
    },

    /// Read pre-generated content from the transport cache.
    Fetch {
        /// Student id.
        #[arg(long)]
        student: String,

        /// Grade level.
        #[arg(long)]
        grade: String,

        /// Subject.
        #[arg(long, value_parser = parse_subject)]
        subject: Subject,

        /// Skill id.
        #[arg(long)]
        skill: String,

        /// Container.
        #[arg(long, value_parser = parse_container)]
        container: ContainerType,

        /// Question type; defaults to the configured one.
        #[arg(long)]
        question_type: Option<String>,

        /// Run worker ticks in this process until the content is ready.
        #[arg(long)]
        wait: bool,
    },

    /// Run pre-generation workers.
    Worker {
        /// Drain the queue once and exit.
        #[arg(long)]
        once: bool,

        /// Worker threads; defaults to the configured count.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Inspect the pre-generation queue.
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create and plan a session.
    Create {
        /// Session id.
        #[arg(long)]
        session: String,

        /// Student id.
        #[arg(long)]
        user: String,

        /// Grade level.
        #[arg(long)]
        grade: String,

        /// Subjects (comma-separated); defaults to the configured ones.
        #[arg(long, value_delimiter = ',', value_parser = parse_subject)]
        subjects: Vec<Subject>,

        #[command(flatten)]
        device: DeviceArgs,

        /// Story persona, career, theme and setting (comma-separated).
        #[arg(long, value_delimiter = ',')]
        story: Vec<String>,
    },

    /// Resume a session, possibly from another device.
    Resume {
        /// Session id.
        #[arg(long)]
        session: String,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// End a session.
    End {
        /// Session id.
        #[arg(long)]
        session: String,
    },

    /// Show a session and its units.
    Show {
        /// Session id.
        #[arg(long)]
        session: String,
    },
}

#[derive(Subcommand)]
enum ContainerCommand {
    /// Start a container.
    Start {
        #[command(flatten)]
        unit: UnitArgs,
    },

    /// Complete the container in progress.
    Complete {
        #[command(flatten)]
        unit: UnitArgs,

        /// Score from 0 to 100.
        #[arg(long)]
        score: f64,

        /// Attempts taken.
        #[arg(long, default_value = "1")]
        attempts: u32,

        /// Items the student struggled with (comma-separated).
        #[arg(long, value_delimiter = ',')]
        struggled: Vec<String>,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Show item counts by status and cache counters.
    Stats,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show the effective configuration.
    Show,
}

#[derive(Args)]
struct UnitArgs {
    /// Session id.
    #[arg(long)]
    session: String,

    /// Subject.
    #[arg(long, value_parser = parse_subject)]
    subject: Subject,

    /// Container.
    #[arg(long, value_parser = parse_container)]
    container: ContainerType,
}

#[derive(Args)]
struct DeviceArgs {
    /// Device id.
    #[arg(long, default_value = "cli")]
    device: String,

    /// Device type: desktop, tablet, phone or other.
    #[arg(long, default_value = "desktop")]
    device_type: String,
}

impl DeviceArgs {
    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(&self.device, DeviceType::parse(&self.device_type))
    }
}

fn parse_subject(s: &str) -> std::result::Result<Subject, String> {
    Subject::parse(s).ok_or_else(|| format!("unknown subject '{s}'"))
}

fn parse_container(s: &str) -> std::result::Result<ContainerType, String> {
    ContainerType::parse(s).ok_or_else(|| format!("unknown container '{s}'"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RubricflowConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };
    let config = match cli.data_dir.clone() {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    };

    let expose_metrics = matches!(cli.command, Commands::Worker { once: false, .. });
    let _observability = match observability::init(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: RubricflowConfig) -> Result<()> {
    if let Commands::Config(ConfigCommand::Show) = command {
        print!("{}", config.to_display_toml());
        return Ok(());
    }

    let services = ServiceContainer::from_config(&config).context("failed to open services")?;
    match command {
        Commands::Session(cmd) => run_session(&services, cmd),
        Commands::Container(cmd) => run_container(&services, cmd),
        Commands::Generate { unit, force } => {
            let outcome = services
                .synthesis()
                .generate(&unit.session, unit.container, unit.subject, force)?;
            print_json(&json!({
                "from_memo": outcome.from_memo,
                "validation_errors": outcome.validation_errors,
                "content": outcome.content,
            }))
        },
        Commands::Fetch {
            student,
            grade,
            subject,
            skill,
            container,
            question_type,
            wait,
        } => {
            let question_type =
                question_type.unwrap_or_else(|| config.session.question_type.clone());
            run_fetch(
                &services,
                &student,
                &grade,
                subject,
                &skill,
                container,
                &question_type,
                wait,
            )
        },
        Commands::Worker { once, workers } => run_worker(&services, once, workers),
        Commands::Queue(QueueCommand::Stats) => print_json(&json!({
            "queue": services.queue().stats()?,
            "cache": services.cache().stats(),
        })),
        Commands::Config(ConfigCommand::Show) => Ok(()),
    }
}

fn run_session(services: &ServiceContainer, cmd: SessionCommand) -> Result<()> {
    let sessions = services.sessions();
    match cmd {
        SessionCommand::Create {
            session,
            user,
            grade,
            subjects,
            device,
            story,
        } => {
            let story = match story.as_slice() {
                [] => None,
                [persona, career, theme, setting] => Some(StorySeed {
                    persona: persona.clone(),
                    career: career.clone(),
                    theme: theme.clone(),
                    setting: setting.clone(),
                }),
                _ => bail!("--story takes persona,career,theme,setting"),
            };
            let created = sessions.create_session(CreateSessionRequest {
                session_id: session,
                user_id: user,
                grade_level: grade,
                subjects,
                device: device.descriptor(),
                story,
            })?;
            print_json(&created)
        },
        SessionCommand::Resume { session, device } => {
            let outcome = sessions.resume_session(&session, device.descriptor())?;
            if outcome.is_device_switched {
                eprintln!("Device changed: discard locally cached content.");
            }
            print_json(&json!({
                "is_device_switched": outcome.is_device_switched,
                "session": outcome.session,
            }))
        },
        SessionCommand::End { session } => print_json(&sessions.end_session(&session)?),
        SessionCommand::Show { session } => {
            let found = sessions.get_session(&session)?;
            let story = sessions.story(&session).ok();
            let units: Vec<_> = services
                .repository()
                .list_units(&session)?
                .into_iter()
                .map(|unit| {
                    json!({
                        "unit": unit.key.to_string(),
                        "generated": unit.content.is_some(),
                        "valid": unit.validation.valid,
                        "completed": unit.completed,
                        "score": unit.performance.map(|p| p.score),
                    })
                })
                .collect();
            print_json(&json!({ "session": found, "story": story, "units": units }))
        },
    }
}

fn run_container(services: &ServiceContainer, cmd: ContainerCommand) -> Result<()> {
    let sessions = services.sessions();
    match cmd {
        ContainerCommand::Start { unit } => {
            print_json(&sessions.start_container(&unit.session, unit.subject, unit.container)?)
        },
        ContainerCommand::Complete {
            unit,
            score,
            attempts,
            struggled,
        } => {
            let completion = sessions.complete_container(
                &unit.session,
                unit.subject,
                unit.container,
                score,
                attempts,
                struggled,
            )?;
            let preloaded = completion
                .preload
                .as_ref()
                .map_or(0, |report| report.enqueued.len());
            let result = completion.result.clone();
            // the process is about to exit; let detached adaptation land first
            let completed_unit = completion.receipt.wait();
            print_json(&json!({
                "result": result,
                "unit": completed_unit.key.to_string(),
                "preloaded": preloaded,
            }))
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fetch(
    services: &ServiceContainer,
    student: &str,
    grade: &str,
    subject: Subject,
    skill: &str,
    container: ContainerType,
    question_type: &str,
    wait: bool,
) -> Result<()> {
    let pipeline = services.pipeline();
    let worker = Worker::new("cli-fetch", services.worker_deps());
    // each failed attempt bumps the retry count, so this bounds the loop
    let max_ticks = services.queue().max_retries() as usize + 2;

    for _ in 0..=max_ticks {
        match pipeline.get_or_enqueue(student, grade, subject, skill, container, question_type)? {
            ContentStatus::Ready(payload) => return print_json(&payload),
            ContentStatus::Pending { item_id } if !wait => {
                return print_json(&json!({ "status": "pending", "item_id": item_id }));
            },
            ContentStatus::Pending { item_id } => match worker.tick()? {
                TickOutcome::Failed {
                    permanently: true,
                    error,
                    ..
                } => bail!("generation for {item_id} failed permanently: {error}"),
                TickOutcome::Idle => bail!("item {item_id} is held by another worker"),
                _ => {},
            },
        }
    }
    Err(anyhow!("content was not ready after {max_ticks} worker ticks"))
}

fn run_worker(services: &ServiceContainer, once: bool, workers: Option<usize>) -> Result<()> {
    let deps = services.worker_deps();
    let report = if once {
        Worker::new("worker-once", deps).drain()?
    } else {
        let stop = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&stop);
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
        let workers = workers.unwrap_or(services.config().queue.workers);
        eprintln!("Running {workers} worker(s); press Ctrl-C to stop.");
        run_pool(&deps, workers, "worker", &stop)?
    };
    print_json(&json!({
        "completed": report.completed,
        "failed": report.failed,
        "permanently_failed": report.permanently_failed,
        "lease_lost": report.lease_lost,
        "errors": report.errors,
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
