//! Maestro — interactive loop for the multi-agent orchestration runtime.
//!
//! A thin presentation layer: reads user lines, maps slash commands onto
//! the orchestrator API, and prints agent events as plain text. All
//! orchestration logic lives in `maestro-core`.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use maestro_core::agent::events::AgentEvent;
use maestro_core::agent::parser::TextRole;
use maestro_core::config::secrets::SecretStore;
use maestro_core::config::OrchestratorConfig;
use maestro_core::orchestrator::Orchestrator;
use maestro_core::paths;
use maestro_core::workflow::ProgressEvent;

/// Maestro - multi-agent orchestration runtime
#[derive(Parser)]
#[command(name = "maestro")]
#[command(about = "Concurrent multi-agent orchestration over OpenAI-compatible models")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "maestro.json")]
    config: PathBuf,

    /// Path to the secrets file (JSON name -> value)
    #[arg(long, default_value = "secrets.json")]
    secrets: PathBuf,

    /// Working directory for tool execution (defaults to the current dir)
    #[arg(short, long)]
    workdir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let secrets = match SecretStore::load(&cli.secrets) {
        Ok(secrets) => secrets,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    let config = match OrchestratorConfig::load(&cli.config, &secrets) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let workdir = cli
        .workdir
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match run(config, workdir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(3)
        }
    }
}

/// Log to a file under ~/.maestro/logs so the interactive loop stays clean.
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Ok(dir) = paths::ensure_logs_dir() {
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("maestro.log"))
        {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: OrchestratorConfig, workdir: PathBuf) -> Result<()> {
    let state_path = paths::ensure_workflows_dir()
        .ok()
        .map(|dir| dir.join("current.json"));

    let progress = Box::new(|event: ProgressEvent| {
        let step = event
            .step_id
            .map(|id| format!(" step {id}"))
            .unwrap_or_default();
        println!("  [workflow]{step} {:?}", event.kind);
    });

    let (orchestrator, events) =
        Orchestrator::new(config, workdir, state_path, Some(progress))?;

    tokio::spawn(render_events(events));

    println!("maestro ready. Type a message, or /help for commands.");
    repl(&orchestrator).await
}

async fn repl(orchestrator: &Orchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(orchestrator, command).await {
                break;
            }
            continue;
        }

        if let Some(directed) = line.strip_prefix('@') {
            let Some((agent_id, message)) = directed.split_once(' ') else {
                println!("usage: @<agent_id> <message>");
                continue;
            };
            if let Err(e) = orchestrator.route_direct(agent_id, message).await {
                println!("error: {e}");
            }
            continue;
        }

        match orchestrator.handle_user_line(line).await {
            Ok(submitted) => {
                for plan_id in submitted {
                    println!("\nplan {plan_id} awaits approval (/plans to list, /approve <id> to run)");
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }

    Ok(())
}

/// Returns false when the loop should exit.
async fn handle_command(orchestrator: &Orchestrator, command: &str) -> bool {
    let (cmd, rest) = command
        .split_once(' ')
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((command, ""));

    match cmd {
        "exit" | "quit" => return false,
        "help" => print_help(),

        "spawn" => match rest.split_once(' ') {
            Some((role, task)) => match orchestrator.spawn(role, task) {
                Ok(id) => println!("spawned {id}"),
                Err(e) => println!("error: {e}"),
            },
            None => println!("usage: /spawn <role> <task>"),
        },
        "agents" => {
            for agent in orchestrator.list_agents() {
                let task = agent.task.as_deref().unwrap_or("-");
                println!(
                    "{:<24} {:<12} {:?}  {}",
                    agent.id.to_string(),
                    agent.role.to_string(),
                    agent.status,
                    task
                );
            }
        }
        "stop" => {
            if rest.is_empty() {
                println!("usage: /stop <agent_id>");
            } else if let Err(e) = orchestrator.terminate(rest) {
                println!("error: {e}");
            }
        }
        "stop_all" => {
            let stopped = orchestrator.terminate_all_subagents();
            println!("terminated {} sub-agent(s)", stopped.len());
        }
        "reset" => {
            if let Err(e) = orchestrator.reset().await {
                println!("error: {e}");
            } else {
                println!("main conversation reset");
            }
        }

        "plans" => {
            let plans = orchestrator.pending_plans();
            if plans.is_empty() {
                println!("no pending plans");
            }
            for plan in plans {
                println!(
                    "{}  {} ({} steps, ~{}s, ~${:.4})",
                    plan.id, plan.name, plan.steps, plan.total_estimated_seconds,
                    plan.estimated_cost
                );
            }
        }
        "plan" => match resolve_plan_id(orchestrator, rest) {
            Some(id) => match orchestrator.plan_details(id) {
                Some(plan) => {
                    println!("{}: {}", plan.name, plan.description);
                    for (index, step) in plan.steps.iter().enumerate() {
                        println!(
                            "  {}. [{:?}] {} (agent {}, tool {}, ~{}s)",
                            index + 1,
                            step.status,
                            step.description,
                            step.agent_id,
                            step.tool,
                            step.estimated_seconds
                        );
                    }
                }
                None => println!("plan not found"),
            },
            None => println!("usage: /plan <plan_id>"),
        },
        "approve" => match resolve_plan_id(orchestrator, rest) {
            Some(id) => match orchestrator.approve(id).await {
                Ok(outcome) if outcome.success => println!("workflow ok: {}", outcome.message),
                Ok(outcome) => println!("workflow failed: {}", outcome.message),
                Err(e) => println!("error: {e}"),
            },
            None => println!("usage: /approve <plan_id>"),
        },
        "reject" => match resolve_plan_id(orchestrator, rest) {
            Some(id) => match orchestrator.reject(id) {
                Ok(name) => println!("rejected '{name}'"),
                Err(e) => println!("error: {e}"),
            },
            None => println!("usage: /reject <plan_id>"),
        },
        "cancel_workflow" => {
            orchestrator.cancel_workflow();
            println!("cancellation requested (takes effect at the next step)");
        }
        "pause" => orchestrator.pause_workflow(),
        "resume" => orchestrator.resume_workflow(),

        "stats" => match serde_json::to_string_pretty(&orchestrator.stats()) {
            Ok(stats) => println!("{stats}"),
            Err(e) => println!("error: {e}"),
        },

        other => println!("unknown command: /{other} (try /help)"),
    }
    true
}

/// Accept a full plan UUID or a unique prefix.
fn resolve_plan_id(orchestrator: &Orchestrator, text: &str) -> Option<uuid::Uuid> {
    if text.is_empty() {
        return None;
    }
    if let Ok(id) = text.parse() {
        return Some(id);
    }
    let matches: Vec<uuid::Uuid> = orchestrator
        .pending_plans()
        .iter()
        .map(|p| p.id)
        .filter(|id| id.to_string().starts_with(text))
        .collect();
    match matches.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

async fn render_events(mut events: mpsc::UnboundedReceiver<AgentEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::TextDelta { agent_id, kind, delta, .. } => {
                // Main response text streams inline; everything else is
                // prefixed with its source.
                if agent_id.is_main() && kind == TextRole::Response {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                } else if kind == TextRole::Response {
                    print!("[{agent_id}] {delta}");
                    let _ = std::io::stdout().flush();
                }
                // Thinking output stays quiet; it is in the log file.
            }
            AgentEvent::SummaryCaptured { agent_id, text, .. } => {
                println!("\n[{agent_id}] summary: {text}");
            }
            AgentEvent::SummaryDelivered { from, to } => {
                println!("\n[{from}] summary delivered to {to}");
            }
            AgentEvent::PlanDetected { agent_id } => {
                println!("\n[{agent_id}] proposed a workflow plan");
            }
            AgentEvent::FileOpQueued { agent_id, description } => {
                println!("\n[{agent_id}] plan mode queued: {description}");
            }
            AgentEvent::ToolResult { agent_id, tool, success } => {
                let status = if success { "ok" } else { "failed" };
                println!("\n[{agent_id}] {tool}: {status}");
            }
            AgentEvent::AgentSpawned { agent_id, role, .. } => {
                println!("\nspawned {role} agent {agent_id}");
            }
            AgentEvent::AgentTerminated { agent_id } => {
                println!("\n{agent_id} terminated");
            }
            AgentEvent::StatusChanged { .. } => {}
            AgentEvent::TurnStats { agent_id, completion_tokens, estimated, .. } => {
                let marker = if estimated { "~" } else { "" };
                println!("\n[{agent_id}] {marker}{completion_tokens} tokens");
            }
            AgentEvent::Error { agent_id, error } => {
                println!("\n[{agent_id}] error: {error}");
            }
        }
    }
}

fn print_help() {
    println!(
        "\
Agent management:
  /spawn <role> <task>   spawn a sub-agent (reviewer, researcher,
                         implementer, tester, optimizer)
  /agents                list agents
  /stop <agent_id>       terminate one agent
  /stop_all              terminate all sub-agents

Workflow plans:
  /plans                 list pending plans
  /plan <id>             show a plan's steps
  /approve <id>          approve and execute a plan
  /reject <id>           discard a pending plan
  /cancel_workflow       cancel the running workflow
  /pause, /resume        pause/resume at the next step boundary

Communication:
  @<agent_id> <message>  send a line to a specific agent
  <message>              send to the main agent

Session:
  /stats                 system statistics
  /reset                 reset the main conversation
  /help                  this help
  /exit                  quit"
    );
}
