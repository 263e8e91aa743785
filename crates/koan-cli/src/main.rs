//! Koan CLI
//!
//! Interactive terminal front end for the Koan tutor: practice mode drives
//! the per-question workflow, chat mode talks to the same model session
//! directly.

mod judge;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use koan_engine::GgufEngineLoader;
use koan_session::SessionManager;
use koan_workflow::{
    KoanConfig, Notice, Phase, QuestionSet, TutorWorkflow, WorkflowOptions, WorkflowSnapshot,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::judge::PythonJudge;

/// Koan - Local AI Programming Tutor
///
/// Practice small programming exercises against an on-device model: run
/// your code through the judge, and ask the model for a fix, a hint, or an
/// explanation when you are stuck.
#[derive(Parser, Debug)]
#[command(name = "koan")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: koan.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Path to the GGUF model file (overrides config)
    #[arg(short, long, value_name = "FILE")]
    model: Option<String>,

    /// Path to a JSON questions file (overrides config)
    #[arg(short, long, value_name = "FILE")]
    questions: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Work through the question set (default).
    Practice,
    /// Free-form chat with the tutor model.
    Chat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(ref model) = args.model {
        config.model_path.clone_from(model);
    }
    if let Some(ref questions) = args.questions {
        config.questions = Some(questions.clone());
    }
    config.validate()?;
    print_config(&config);

    let manager = Arc::new(SessionManager::new(Box::new(GgufEngineLoader::new())));

    let result = match args.mode.unwrap_or(Mode::Practice) {
        Mode::Practice => run_practice(&config, Arc::clone(&manager)).await,
        Mode::Chat => run_chat(&config, Arc::clone(&manager)).await,
    };

    manager.clean_up().await;
    result
}

fn load_config(path: Option<&str>) -> anyhow::Result<KoanConfig> {
    let config = match path {
        Some(path) => KoanConfig::load_from_file(Path::new(path))?,
        None => {
            let current_dir = std::env::current_dir()?;
            KoanConfig::load_from_dir(&current_dir)?
        }
    };
    Ok(config)
}

fn print_config(config: &KoanConfig) {
    println!("Koan - Local AI Programming Tutor");
    println!("  model:       {}", config.model_path);
    println!("  interpreter: {}", config.interpreter);
    println!(
        "  questions:   {}",
        config.questions.as_deref().unwrap_or("(built-in set)")
    );
    println!();
}

fn load_questions(config: &KoanConfig) -> anyhow::Result<QuestionSet> {
    Ok(match &config.questions {
        Some(path) => QuestionSet::load(path)?,
        None => QuestionSet::builtin(),
    })
}

async fn run_practice(config: &KoanConfig, manager: Arc<SessionManager>) -> anyhow::Result<()> {
    let questions = load_questions(config)?;
    let judge = Arc::new(PythonJudge::new(
        config.interpreter.clone(),
        Duration::from_secs(u64::from(config.run_timeout)),
    ));
    let workflow = TutorWorkflow::new(
        manager,
        judge,
        questions,
        WorkflowOptions::from_config(config),
    );

    print_help();
    print_question(&workflow).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut draft = String::new();

    while let Some(line) = lines.next_line().await? {
        let command = line.trim_end();
        let outcome = match command {
            ":quit" | ":q" => break,
            ":help" => {
                print_help();
                continue;
            }
            ":show" => {
                let snapshot = workflow.snapshot().await;
                print_snapshot(&snapshot);
                continue;
            }
            ":clear" => {
                draft.clear();
                workflow.set_code("").await.ok();
                println!("(draft cleared)");
                continue;
            }
            ":run" => workflow.run().await,
            ":fix" => workflow.request_fix().await,
            ":hint" => workflow.request_hint().await,
            ":explain" => workflow.request_explain().await,
            ":next" => workflow.advance().await,
            _ if command.starts_with(":stdin ") => {
                workflow
                    .submit_stdin(command.trim_start_matches(":stdin "))
                    .await
            }
            _ => {
                // Anything else is another line of the draft.
                if !draft.is_empty() {
                    draft.push('\n');
                }
                draft.push_str(command);
                match workflow.set_code(draft.clone()).await {
                    Ok(()) => continue,
                    Err(e) => Err(e),
                }
            }
        };

        match outcome {
            Ok(snapshot) => {
                // Assists rewrite the draft; keep the local buffer in step.
                draft.clone_from(&snapshot.code_draft);
                print_snapshot(&snapshot);
                if snapshot.phase == Phase::Editing && snapshot.notice.is_none() {
                    print_question(&workflow).await;
                }
            }
            Err(e) => println!("! {e}"),
        }
    }

    println!("Bye.");
    Ok(())
}

async fn run_chat(config: &KoanConfig, manager: Arc<SessionManager>) -> anyhow::Result<()> {
    println!("Loading model (this can take a while)...");
    manager
        .initialize(Path::new(&config.model_path), config.sampling)
        .await?;
    println!("Ready. Type a message, or press Ctrl-D to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        let mut stream = manager.generate(message).await?;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    stdout.write_all(fragment.text.as_bytes()).await?;
                    stdout.flush().await?;
                    if fragment.is_final {
                        break;
                    }
                }
                Err(e) => {
                    println!();
                    println!("! {e}");
                    break;
                }
            }
        }
        println!();
        println!();
    }

    Ok(())
}

async fn print_question(workflow: &TutorWorkflow) {
    let snapshot = workflow.snapshot().await;
    let question = workflow.current_question().await;
    println!();
    println!(
        "Question {}/{}: {}",
        snapshot.question_index + 1,
        snapshot.question_total,
        question.prompt
    );
}

fn print_snapshot(snapshot: &WorkflowSnapshot) {
    match snapshot.notice {
        Some(Notice::CodeInserted) => println!("(suggested code inserted into your draft)"),
        Some(Notice::HintInserted) => println!("(hint added above your draft)"),
        Some(Notice::AssistFailed) => println!("(the tutor could not help this time)"),
        None => {}
    }

    match snapshot.phase {
        Phase::Evaluated { passed: true } => {
            println!("Correct!");
            if !snapshot.result.is_empty() {
                println!("Output:\n{}", snapshot.result);
            }
            println!("(:next for the next question)");
        }
        Phase::Evaluated { passed: false } => {
            println!("Not correct. {}", snapshot.result);
            let mut offers = Vec::new();
            if snapshot.fix_available {
                offers.push(":fix");
            }
            if snapshot.hint_available {
                offers.push(":hint");
            }
            if snapshot.explain_available {
                offers.push(":explain");
            }
            if !offers.is_empty() {
                println!("(available: {})", offers.join(" "));
            }
        }
        Phase::AwaitingStdin => {
            println!("This code reads input. Provide it with :stdin <text>");
        }
        Phase::Editing => {
            if !snapshot.code_draft.is_empty() {
                println!("--- draft ---");
                println!("{}", snapshot.code_draft);
                println!("-------------");
            }
        }
        _ => {}
    }
}

fn print_help() {
    println!("Type code lines to build your draft, then:");
    println!("  :run      run the draft against the expected output");
    println!("  :fix      ask the tutor to correct a failed attempt");
    println!("  :hint     ask for the one hint this question allows");
    println!("  :explain  ask what the error message means");
    println!("  :stdin X  supply input for code that reads stdin");
    println!("  :next     advance after a correct answer");
    println!("  :show     show the current state");
    println!("  :clear    discard the draft");
    println!("  :quit     leave");
}
