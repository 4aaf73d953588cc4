//! Interactive research assistant over the ingested corpus.
//!
//! Streams answer tokens to stdout as they arrive; tool activity goes to
//! stderr so redirected output stays a clean transcript.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use debatesmith::agent::{Orchestrator, ToolContext, TurnEvent};
use debatesmith::providers::OpenAiClient;
use debatesmith::resolve::EntityResolver;
use debatesmith::retrieval::HybridSearcher;
use debatesmith::service::ChatService;
use debatesmith::settings::Settings;
use debatesmith::store::Database;

#[derive(Parser, Debug)]
#[command(
    name = "debatesmith-chat",
    about = "Ask cited questions over ingested parliamentary debates"
)]
struct ChatCli {
    /// Thread to continue; omit to start a fresh one
    #[arg(long)]
    thread: Option<String>,

    /// Ask a single question and exit instead of starting the REPL
    #[arg(long)]
    question: Option<String>,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = ChatCli::parse();
    let settings = Settings::from_env();
    let thread_id = cli
        .thread
        .unwrap_or_else(|| format!("thread-{}", Uuid::new_v4()));

    let db = Database::open(
        &settings.database_path,
        &settings.embedding_model,
        settings.embedding_dim,
    )
    .await?;
    let client = Arc::new(OpenAiClient::new(
        &settings.api_base_url,
        &settings.api_key,
        &settings.chat_model,
        &settings.embedding_model,
        settings.embedding_dim,
    )?);
    let tools = ToolContext::new(
        HybridSearcher::new(db.corpus(), client.clone(), settings.branch_top_n),
        EntityResolver::new(db.people()),
        db.people(),
        db.votes(),
        settings.search_top_k,
    );
    let service = ChatService::new(
        db.conversations(),
        Orchestrator::new(client, tools, settings.tool_call_budget),
    );

    if let Some(question) = cli.question {
        run_turn(&service, &thread_id, &question).await?;
        return Ok(());
    }

    eprintln!("thread {thread_id} (blank line or \"exit\" to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("you> ");
        let _ = std::io::stderr().flush();
        let Some(line) = lines.next_line().await.map_err(to_diagnostic)? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() || question == "exit" || question == "quit" {
            break;
        }
        run_turn(&service, &thread_id, question).await?;
    }
    Ok(())
}

async fn run_turn(service: &ChatService, thread_id: &str, question: &str) -> miette::Result<()> {
    let (events, receiver) = flume::unbounded();
    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv_async().await {
            match event {
                TurnEvent::ToolStarted { name } => eprintln!("[tool] {name} running"),
                TurnEvent::ToolFinished { name, gap } => {
                    if gap {
                        eprintln!("[tool] {name} came back with a gap");
                    }
                }
                TurnEvent::Token(token) => {
                    print!("{token}");
                    let _ = std::io::stdout().flush();
                }
            }
        }
    });

    let result = service.respond(thread_id, question, &events).await;
    drop(events);
    let _ = printer.await;
    println!();

    let result = result?;
    if result.aborted {
        eprintln!("turn ended early; the delivered portion is on the thread");
    }
    Ok(())
}

fn to_diagnostic(err: std::io::Error) -> miette::Report {
    miette::Report::msg(err.to_string())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
