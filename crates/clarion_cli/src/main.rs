mod stdin_source;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clarion_bench::{attach_mock_executors, load_scenarios, run_suite};
use clarion_core::{load_tool_definitions, ClarionConfig, SessionInput, ToolRegistry};
use clarion_reasoning::providers::create_client;
use clarion_reasoning::{
    AnswerSource, CompletionParams, DisambiguationLoop, GroundTruthSimulator, LlmPhraser, LlmUserSimulator,
    QuestionPhraser, TemplatePhraser,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stdin_source::StdinAnswerSource;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "clarion", author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, env = "CLARION_CONFIG", default_value = "clarion.toml", global = true)]
    config: PathBuf,

    /// Tool definition file (TOML or JSON)
    #[arg(short, long, env = "CLARION_TOOLS", default_value = "data/tools.toml", global = true)]
    tools: PathBuf,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write JSON logs to daily files in this directory
    #[arg(long, env = "CLARION_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Disambiguate a single request
    Run {
        /// Scenario file holding one session input or an array of them
        #[arg(short, long, conflicts_with = "request")]
        scenario: Option<PathBuf>,

        /// Scenario id to pick from the file (default: the first one)
        #[arg(long, requires = "scenario")]
        id: Option<String>,

        /// Plain request text; every registered tool is a candidate
        #[arg(short, long)]
        request: Option<String>,

        /// Who answers the questions
        #[arg(short, long, value_enum, default_value_t = Responder::Stdin)]
        answers: Responder,

        /// Stop at ready_to_execute instead of running the validating executor
        #[arg(long)]
        no_execute: bool,

        /// Write the session record here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a scenario suite with simulated answers and report metrics
    Eval {
        /// Scenario file or directory of scenario files
        scenarios: PathBuf,

        /// Who answers the questions
        #[arg(short, long, value_enum, default_value_t = Responder::Simulated)]
        answers: Responder,

        #[arg(long)]
        no_execute: bool,

        /// Write the full JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the registered tools
    Tools,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Responder {
    /// A person at the terminal
    Stdin,
    /// Answers from each scenario's ground truth
    Simulated,
    /// A model role-playing the requester
    Llm,
}

fn init_logging(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };
    let (file, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "clarion.log"));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry().with(filter).with(console).with(file).init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _guard = init_logging(args.log_json, args.log_dir.as_deref());

    let config = ClarionConfig::load_or_default(&args.config);
    config.validate()?;
    let defs = load_tool_definitions(&args.tools)?;
    let mut registry = ToolRegistry::from_definitions(defs)
        .with_context(|| format!("Invalid tool definitions in {}", args.tools.display()))?;
    info!("Loaded {} tool(s) from {}", registry.len(), args.tools.display());

    match args.command {
        Command::Tools => {
            println!("{}", registry.describe());
        }
        Command::Run {
            scenario,
            id,
            request,
            answers,
            no_execute,
            output,
        } => {
            let input = pick_input(scenario.as_deref(), id.as_deref(), request)?;
            if !no_execute {
                attach_mock_executors(&mut registry)?;
            }
            let mut config = config;
            if answers == Responder::Stdin {
                // A person answers at their own pace.
                config.session.collaborator_timeout_secs = config.session.timeout_secs;
            }
            let engine = build_engine(registry, config, answers)?;
            let outcome = engine.run_input(input, cancel_on_ctrl_c()).await?;
            info!("Session finished: {:?} ({})", outcome.status, outcome.reason);
            write_output(output.as_deref(), &serde_json::to_string_pretty(&outcome)?)?;
        }
        Command::Eval {
            scenarios,
            answers,
            no_execute,
            output,
        } => {
            if answers == Responder::Stdin {
                bail!("eval needs simulated answers; use --answers simulated or --answers llm");
            }
            let inputs = load_scenarios(&scenarios)?;
            if !no_execute {
                attach_mock_executors(&mut registry)?;
            }
            let engine = Arc::new(build_engine(registry, config, answers)?);
            let (report, _) = run_suite(engine, inputs, cancel_on_ctrl_c()).await;
            println!("{}", report.render());
            if let Some(path) = output {
                write_output(Some(&path), &serde_json::to_string_pretty(&report)?)?;
            }
        }
    }

    Ok(())
}

fn pick_input(scenario: Option<&Path>, id: Option<&str>, request: Option<String>) -> Result<SessionInput> {
    if let Some(request) = request {
        return Ok(SessionInput::new(request));
    }
    let Some(path) = scenario else {
        bail!("run needs either --scenario or --request");
    };
    let mut inputs = load_scenarios(path)?;
    let index = match id {
        Some(id) => inputs
            .iter()
            .position(|i| i.id.as_deref() == Some(id))
            .with_context(|| format!("No scenario with id '{}' in {}", id, path.display()))?,
        None if inputs.is_empty() => bail!("{} holds no scenarios", path.display()),
        None => 0,
    };
    Ok(inputs.swap_remove(index))
}

fn build_engine(registry: ToolRegistry, config: ClarionConfig, answers: Responder) -> Result<DisambiguationLoop> {
    let client = create_client(&config.llm)?;
    let params = CompletionParams::from(&config.llm);

    let phraser: Arc<dyn QuestionPhraser> = match &client {
        Some(client) => Arc::new(LlmPhraser::new(Arc::clone(client), params.clone())),
        None => Arc::new(TemplatePhraser::new()),
    };
    let answers: Arc<dyn AnswerSource> = match answers {
        Responder::Stdin => Arc::new(StdinAnswerSource::new()),
        Responder::Simulated => Arc::new(GroundTruthSimulator::new()),
        Responder::Llm => {
            let Some(client) = client else {
                bail!("--answers llm needs an LLM provider (set llm.provider or CLARION_LLM_PROVIDER)");
            };
            Arc::new(LlmUserSimulator::new(client, params))
        }
    };
    info!("Phrasing with {}, answers from {}", phraser.name(), answers.name());
    Ok(DisambiguationLoop::new(Arc::new(registry), phraser, answers, config))
}

/// The returned receiver flips to `true` on Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            let _ = tx.send(true);
        }
    });
    rx
}

fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", content);
            Ok(())
        }
    }
}
