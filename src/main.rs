//! autoforge - autonomous build and fix orchestration
//!
//! Command-line front end for planning task sets and inspecting the
//! checkpoint store and configuration of a project.

use anyhow::Context;
use autoforge::checkpoint::{CheckpointState, FileCheckpointConfig, FileCheckpointStore};
use autoforge::graph::DependencyGraph;
use autoforge::task::Task;
use autoforge::{ExecutionPlanner, OrchestratorConfig, OrchestratorError};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "autoforge")]
#[command(version)]
#[command(about = "Dependency-aware planning and build/fix loop orchestration", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an execution plan from a task file
    Plan {
        /// JSON file holding an array of tasks
        tasks: PathBuf,

        /// Override the configured group size
        #[arg(short, long)]
        max_concurrency: Option<usize>,

        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,

        /// Write the plan JSON to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a task file for cycles and dangling dependencies
    Validate {
        /// JSON file holding an array of tasks
        tasks: PathBuf,
    },

    /// Show the tasks that are ready to run
    Next {
        /// JSON file holding an array of tasks
        tasks: PathBuf,

        /// Ids of completed tasks (repeatable)
        #[arg(short, long = "completed", value_name = "ID")]
        completed: Vec<String>,
    },

    /// Inspect the checkpoint store
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show the resolved configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List stored checkpoints
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete old resolved checkpoints
    Prune {
        /// Number of checkpoints to keep
        #[arg(short, long, default_value = "10")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let filter = if cli.verbose {
        "autoforge=debug,info"
    } else {
        "autoforge=info,warn"
    };

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let config = match OrchestratorConfig::load(&project_path) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    match cli.command {
        Commands::Plan {
            tasks,
            max_concurrency,
            json,
            output,
        } => {
            let mut planner_config = config.planner.clone();
            if let Some(max) = max_concurrency {
                if max == 0 {
                    eprintln!(
                        "{} --max-concurrency must be at least 1",
                        "Error:".red().bold()
                    );
                    std::process::exit(2);
                }
                planner_config = planner_config.with_max_concurrency(max);
            }

            let tasks = load_tasks(&tasks)?;
            let planner = ExecutionPlanner::new(planner_config);
            let plan = match planner.create_plan(tasks) {
                Ok(plan) => plan,
                Err(e) => exit_with(&e),
            };

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&plan)?)
                    .with_context(|| format!("Failed to write plan to {}", path.display()))?;
                println!("{} Plan written to {}", "OK".green(), path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("\n{} {}", "Plan:".cyan().bold(), plan.summary());
                println!("{}", "─".repeat(60));
                for group in &plan.execution_groups {
                    println!(
                        "   [{}] {:<12} {}",
                        group.index,
                        group.phase.as_str(),
                        group.task_ids.join(", ")
                    );
                    if let Some(cp) = plan.checkpoint_after(group.index) {
                        println!("       {} {}", "checkpoint".yellow(), cp.kind);
                    }
                }
                for warning in &plan.metadata.warnings {
                    println!("   {} {}", "Warning:".yellow(), warning);
                }
                if !plan.metadata.unassigned_tasks.is_empty() {
                    println!(
                        "   {} no agent for: {}",
                        "Info:".blue(),
                        plan.metadata.unassigned_tasks.join(", ")
                    );
                }
            }
        }

        Commands::Validate { tasks } => {
            let tasks = load_tasks(&tasks)?;
            let graph = DependencyGraph::build(&tasks);

            for warning in graph.warnings() {
                println!("{} {}", "Warning:".yellow(), warning);
            }

            match graph.ensure_acyclic() {
                Ok(()) => println!(
                    "{} {} tasks, no cycles ({} warnings)",
                    "OK".green(),
                    graph.len(),
                    graph.warnings().len()
                ),
                Err(e) => exit_with(&e),
            }
        }

        Commands::Next { tasks, completed } => {
            let tasks = load_tasks(&tasks)?;
            let planner = ExecutionPlanner::new(config.planner.clone());
            let plan = match planner.create_plan(tasks) {
                Ok(plan) => plan,
                Err(e) => exit_with(&e),
            };

            let mut done: HashSet<String> = completed.into_iter().collect();
            done.extend(plan.completed_ids());
            let ready = planner.next_tasks(&plan, &done);

            if ready.is_empty() {
                println!("{} No tasks ready", "Info:".blue());
            } else {
                println!("\n{} {} task(s) ready", "Next:".cyan().bold(), ready.len());
                println!("{}", "─".repeat(40));
                for task in ready {
                    println!(
                        "   {} {} (priority {}, agent {})",
                        task.id.bold(),
                        task.name,
                        task.priority,
                        task.agent.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Checkpoints { action } => {
            // Opening the store creates its directory; read-only commands skip that
            let dir = config.checkpoint_dir(&project_path);
            let store = if dir.exists() {
                Some(FileCheckpointStore::with_config(
                    dir,
                    FileCheckpointConfig::new()
                        .with_max_checkpoints(config.checkpoints.max_checkpoints)
                        .with_auto_prune(false),
                )?)
            } else {
                None
            };

            match action {
                CheckpointAction::List { json } => {
                    let records = match &store {
                        Some(store) => store.list()?,
                        None => Vec::new(),
                    };

                    if json {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    } else {
                        println!(
                            "\n{} Checkpoints ({} total)",
                            "Checkpoints:".cyan().bold(),
                            records.len()
                        );
                        println!("{}", "─".repeat(60));

                        if !config.checkpoints.enabled {
                            println!("   {}", "Checkpointing is disabled in config".dimmed());
                        }
                        if records.is_empty() {
                            println!("   No checkpoints found");
                        }
                        for record in records {
                            let line = format!(
                                "   [{}] {}",
                                record.created_at.format("%Y-%m-%d %H:%M"),
                                record.summary()
                            );
                            match record.state {
                                CheckpointState::Open => println!("{}", line.yellow()),
                                CheckpointState::Committed => println!("{}", line),
                                CheckpointState::RolledBack { .. } => println!("{}", line.red()),
                            }
                        }
                    }
                }

                CheckpointAction::Prune { keep } => {
                    let removed = match &store {
                        Some(store) => store.prune(keep)?,
                        None => 0,
                    };
                    println!(
                        "{} Pruned {} checkpoint(s), kept up to {}",
                        "OK".green(),
                        removed,
                        keep
                    );
                }
            }
        }

        Commands::Config { json } => {
            let (config, source) = OrchestratorConfig::load_with_source(&project_path)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("\n{} Orchestrator Configuration", "Config:".cyan().bold());
                println!("{}", "─".repeat(40));
                println!("   Source: {}", source);
                println!();
                print!("{}", config.to_toml_string()?);
            }
        }
    }

    Ok(())
}

fn load_tasks(path: &Path) -> anyhow::Result<Vec<Task>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    let tasks: Vec<Task> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid task file {}", path.display()))?;
    Ok(tasks)
}

fn exit_with(err: &OrchestratorError) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), err);
    std::process::exit(err.exit_code());
}
