//! Tutorsim - Batch Tutoring Simulation CLI
//!
//! The `tutorsim` command drives simulated tutoring conversations and
//! scores the understanding levels inferred from them.
//!
//! ## Commands
//!
//! - `students` / `topics`: browse an evaluation set
//! - `start` / `send`: raw conversation calls
//! - `interact`: tutor one student by hand with live assessment
//! - `simulate`: run a whole set in parallel, optionally submit and export
//! - `config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tutorsim_analysis::Transcript;
use tutorsim_core::{
    opener, BatchOrchestrator, BatchStatus, SimulationRecord, SimulatorConfig, SubmissionResult,
};
use tutorsim_upstream::SetType;

#[derive(Parser)]
#[command(name = "tutorsim")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Batch tutoring simulation against a simulated-student service",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (defaults come from the environment)
    #[arg(short, long, global = true, env = "TUTORSIM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the students of an evaluation set
    Students {
        /// mini_dev, dev or eval
        #[arg(default_value = "mini_dev")]
        set_type: SetType,
    },

    /// List the topics available for a student
    Topics { student_id: String },

    /// Open a conversation for one (student, topic) pair
    Start { student_id: String, topic_id: String },

    /// Send one tutor message on an open conversation
    Send {
        conversation_id: String,
        message: String,
    },

    /// Tutor one student interactively; each reply is assessed live
    Interact { student_id: String, topic_id: String },

    /// Simulate every pair of a set in parallel
    Simulate {
        /// mini_dev, dev or eval
        #[arg(default_value = "mini_dev")]
        set_type: SetType,

        /// Submit predictions for scoring once the batch completes
        #[arg(long)]
        submit: bool,

        /// Write records (and scores, when submitted) to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the number of concurrent sessions
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Seconds between progress lines
        #[arg(long, default_value = "5")]
        poll_secs: u64,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

/// Everything `simulate` knows about a finished batch
#[derive(Debug, Serialize)]
struct BatchExport {
    batch_id: String,
    set_type: SetType,
    status: BatchStatus,
    records: Vec<SimulationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submission: Option<SubmissionResult>,
}

struct SimulateOptions {
    submit: bool,
    output: Option<PathBuf>,
    poll_interval: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tutorsim_core::telemetry::init_tracing(cli.json, level);

    let max_concurrent = match &cli.command {
        Commands::Simulate { max_concurrent, .. } => *max_concurrent,
        _ => None,
    };
    let config = load_config(cli.config.as_deref(), max_concurrent)?;

    if let Commands::Config = cli.command {
        return cmd_config(&config);
    }

    let orch = BatchOrchestrator::from_config(&config).context("Failed to set up service clients")?;

    match cli.command {
        Commands::Students { set_type } => cmd_students(&orch, set_type).await,
        Commands::Topics { student_id } => cmd_topics(&orch, &student_id).await,
        Commands::Start {
            student_id,
            topic_id,
        } => cmd_start(&orch, &student_id, &topic_id).await,
        Commands::Send {
            conversation_id,
            message,
        } => cmd_send(&orch, &conversation_id, &message).await,
        Commands::Interact {
            student_id,
            topic_id,
        } => {
            let stdin = BufReader::new(tokio::io::stdin());
            cmd_interact(&orch, &student_id, &topic_id, stdin)
                .await
                .map(|_| ())
        }
        Commands::Simulate {
            set_type,
            submit,
            output,
            poll_secs,
            ..
        } => {
            let options = SimulateOptions {
                submit,
                output,
                poll_interval: Duration::from_secs(poll_secs.max(1)),
            };
            cmd_simulate(&orch, set_type, options).await.map(|_| ())
        }
        Commands::Config => Ok(()),
    }
}

/// Environment first, then the TOML file if given, then flag overrides.
fn load_config(path: Option<&Path>, max_concurrent: Option<usize>) -> Result<SimulatorConfig> {
    let mut config = match path {
        Some(path) => SimulatorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SimulatorConfig::from_env(),
    };
    if let Some(max) = max_concurrent {
        config.batch.max_concurrent_sessions = max.max(1);
    }
    Ok(config)
}

fn redacted(config: &SimulatorConfig) -> SimulatorConfig {
    let mut config = config.clone();
    if config.upstream.api_key.is_some() {
        config.upstream.api_key = Some("***".to_string());
    }
    if config.model.api_key.is_some() {
        config.model.api_key = Some("***".to_string());
    }
    config
}

fn cmd_config(config: &SimulatorConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&redacted(config))?);
    Ok(())
}

async fn cmd_students(orch: &BatchOrchestrator, set_type: SetType) -> Result<()> {
    let students = orch
        .list_students(set_type)
        .await
        .with_context(|| format!("Failed to list students for {set_type}"))?;

    if students.is_empty() {
        println!("No students in set {set_type}");
        return Ok(());
    }
    for student in &students {
        match student.grade_level {
            Some(grade) => println!("{}  {} (grade {})", student.id, student.name, grade),
            None => println!("{}  {}", student.id, student.name),
        }
    }
    println!("{} student(s) in {}", students.len(), set_type);
    Ok(())
}

async fn cmd_topics(orch: &BatchOrchestrator, student_id: &str) -> Result<()> {
    let topics = orch
        .list_topics(student_id)
        .await
        .with_context(|| format!("Failed to list topics for student {student_id}"))?;

    for topic in &topics {
        match &topic.subject_name {
            Some(subject) => println!("{}  {} [{}]", topic.id, topic.name, subject),
            None => println!("{}  {}", topic.id, topic.name),
        }
    }
    Ok(())
}

async fn cmd_start(orch: &BatchOrchestrator, student_id: &str, topic_id: &str) -> Result<()> {
    let start = orch
        .start_conversation(student_id, topic_id)
        .await
        .context("Failed to start conversation")?;

    println!("Conversation: {}", start.conversation_id);
    match start.max_turns {
        Some(max) => println!("Max turns:    {max}"),
        None => println!(
            "Max turns:    {} (default)",
            orch.config().default_max_turns
        ),
    }
    Ok(())
}

async fn cmd_send(orch: &BatchOrchestrator, conversation_id: &str, message: &str) -> Result<()> {
    let reply = orch
        .send_message(conversation_id, message)
        .await
        .context("Failed to send tutor message")?;

    println!("[turn {}] {}", reply.turn_number, reply.student_response);
    if reply.is_complete {
        println!("Conversation complete.");
    }
    Ok(())
}

/// Tutor one pair from `input`, one tutor message per line. An empty line
/// sends the suggested message; end of input stops the session.
async fn cmd_interact<R>(
    orch: &BatchOrchestrator,
    student_id: &str,
    topic_id: &str,
    input: R,
) -> Result<Transcript>
where
    R: AsyncBufRead + Unpin,
{
    let topics = orch
        .list_topics(student_id)
        .await
        .with_context(|| format!("Failed to list topics for student {student_id}"))?;
    let topic_name = topics
        .iter()
        .find(|t| t.id == topic_id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| topic_id.to_string());

    let start = orch
        .start_conversation(student_id, topic_id)
        .await
        .context("Failed to start conversation")?;
    let max_turns = start
        .max_turns
        .unwrap_or(orch.config().default_max_turns);

    println!(
        "Conversation {} on {} ({} turns max). Empty line sends the suggestion, EOF quits.",
        start.conversation_id, topic_name, max_turns
    );

    let mut transcript = Transcript::new();
    let mut suggested = opener(&topic_name);
    let mut lines = input.lines();

    while (transcript.len() as u32) < max_turns {
        println!("\nsuggested> {suggested}");
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let message = match line.trim() {
            "" => suggested.clone(),
            typed => typed.to_string(),
        };

        let turn = orch
            .interact(&start.conversation_id, &topic_name, &message, &mut transcript)
            .await
            .context("Simulation service rejected the turn")?;

        println!("student> {}", turn.reply.student_response);
        println!(
            "level:   {} ({}) {}",
            turn.analysis.understanding_level,
            turn.analysis.understanding_level.label(),
            turn.analysis.justification
        );
        suggested = turn.suggestion.next_tutor_message;

        if turn.reply.is_complete {
            println!("Conversation complete.");
            break;
        }
    }

    Ok(transcript)
}

async fn cmd_simulate(
    orch: &BatchOrchestrator,
    set_type: SetType,
    options: SimulateOptions,
) -> Result<BatchExport> {
    let receipt = orch
        .launch_batch(set_type)
        .await
        .with_context(|| format!("Failed to launch batch for {set_type}"))?;
    println!(
        "Launched batch {} for {}: {} pair(s), {} failed to start",
        receipt.batch_id, set_type, receipt.pair_count, receipt.failed_starts
    );

    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.tick().await;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let status = loop {
        tokio::select! {
            status = orch.wait_for_completion(set_type) => break status,
            _ = ticker.tick() => {
                let report = orch.get_status(set_type).await;
                println!(
                    "[{}] {}/{} ({:.2}%)",
                    report.status,
                    report.completed_count,
                    report.total_expected,
                    report.progress_percent
                );
            }
            _ = &mut ctrl_c, if !interrupted => {
                warn!(set_type = %set_type, "interrupt received, cancelling batch");
                orch.cancel(set_type).await;
                interrupted = true;
            }
        }
    };

    let records = orch.records(set_type).await;
    print_records(&records);
    println!("Batch {status}: {} record(s)", records.len());

    let submission = match (options.submit, status) {
        (true, BatchStatus::Completed) => {
            let result = orch
                .submit(set_type)
                .await
                .context("Failed to submit predictions")?;
            println!("MSE result:      {}", result.mse_result);
            println!("Tutoring result: {}", result.tutoring_result);
            Some(result)
        }
        (true, other) => {
            warn!(status = %other, "batch did not complete, skipping submission");
            None
        }
        (false, _) => None,
    };

    let export = BatchExport {
        batch_id: receipt.batch_id.to_string(),
        set_type,
        status,
        records,
        submission,
    };
    if let Some(path) = &options.output {
        write_export(path, &export)?;
        info!(path = %path.display(), "batch results written");
    }
    Ok(export)
}

fn print_records(records: &[SimulationRecord]) {
    for record in records {
        let flag = if record.is_failure() { " FAILED" } else { "" };
        println!(
            "{:<12} {:<12} level {} after {} turn(s){}  {}",
            record.student_id,
            record.topic_id,
            record.understanding_level,
            record.turns_completed,
            flag,
            record.topic_name
        );
    }
}

fn write_export(path: &Path, export: &BatchExport) -> Result<()> {
    let json = serde_json::to_string_pretty(export)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write results to {}", path.display()))
}
