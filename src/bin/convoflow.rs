use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use convoflow::logging::LoggingConfig;
use convoflow::{
    load_graph_from_file, ActionDispatcher, ConvoFlowError, DiagnosticLevel, DynHttpClient,
    EngineConfig, ExecutionEngine, GraphRegistry, GraphValidator, LocalEchoClient, SessionStore,
    StepResult, ValidationReport,
};

#[derive(Parser)]
#[command(name = "convoflow", version, about = "Conversational flow graph runner", author)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 校验流图文档并输出诊断
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// 在终端中交互执行流图
    Run { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingConfig::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { file, json } => handle_validate(file, json)?,
        Command::Run { file } => handle_run(file).await?,
    }
    Ok(())
}

fn handle_validate(file: PathBuf, json: bool) -> anyhow::Result<()> {
    let graph = load_graph_from_file(&file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    let report = GraphValidator::validate(&graph);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.is_valid() {
        anyhow::bail!("{} has {} error(s)", file.display(), report.errors().len());
    }
    println!("{} v{} is valid", graph.id, graph.version);
    Ok(())
}

fn print_report(report: &ValidationReport) {
    for diagnostic in &report.diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
        };
        let location = diagnostic
            .node_id
            .as_deref()
            .or(diagnostic.edge_id.as_deref())
            .unwrap_or("graph");
        println!("{level}[{}] {location}: {}", diagnostic.code, diagnostic.message);
    }
}

async fn handle_run(file: PathBuf) -> anyhow::Result<()> {
    let graph = load_graph_from_file(&file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    let flow_id = graph.id.clone();

    let registry = GraphRegistry::new();
    match registry.publish(graph) {
        Ok(report) => print_report(&report),
        Err(ConvoFlowError::Validation(report)) => {
            print_report(&report);
            anyhow::bail!("refusing to run an invalid graph");
        }
        Err(err) => return Err(err.into()),
    }

    let engine = ExecutionEngine::new(Arc::new(registry), Arc::new(SessionStore::in_memory()))
        .with_config(EngineConfig::from_env()?)
        .with_dispatcher(ActionDispatcher::new(Arc::new(LocalEchoClient), http_client()));

    let mut result = engine.start_session(&flow_id).await?;
    let session_id = result.session_id.clone();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_outputs(&result);
        if result.is_complete {
            println!("-- complete: {}", serde_json::to_string(&result.variables)?);
            return Ok(());
        }

        let input = match &result.prompt {
            Some(prompt) => {
                if prompt.choices.is_empty() {
                    print!("{} > ", prompt.text);
                } else {
                    print!("{} [{}] > ", prompt.text, prompt.choices.join(" / "));
                }
                io::stdout().flush()?;
                match lines.next() {
                    Some(line) => Some(line?),
                    None => return Ok(()),
                }
            }
            None => None,
        };

        match engine.step(&session_id, input.as_deref()).await {
            Ok(next) => result = next,
            Err(err @ ConvoFlowError::InvalidAnswer { .. }) => {
                println!("!! {err}");
                result.outputs.clear();
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn print_outputs(result: &StepResult) {
    for output in &result.outputs {
        match output.text() {
            Some(text) => println!("[{}] {text}", output.node_id()),
            None => println!(
                "[{}] {}",
                output.node_id(),
                serde_json::to_string(output).unwrap_or_default()
            ),
        }
    }
}

#[cfg(feature = "http-client")]
fn http_client() -> DynHttpClient {
    Arc::new(convoflow::ReqwestHttpClient::new())
}

#[cfg(not(feature = "http-client"))]
fn http_client() -> DynHttpClient {
    Arc::new(convoflow::DisabledHttpClient)
}
