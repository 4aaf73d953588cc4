//! Ingestion entrypoint: apply metadata, then commit new transcripts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use debatesmith::ingest::{DebatePipeline, load_metadata};
use debatesmith::providers::OpenAiClient;
use debatesmith::settings::Settings;
use debatesmith::store::Database;

#[derive(Parser, Debug)]
#[command(
    name = "debatesmith-ingest",
    about = "Parse, chunk, embed, and index debate transcripts and division metadata"
)]
struct IngestCli {
    /// Transcripts directory (defaults to DEBATESMITH_TRANSCRIPTS)
    #[arg(long)]
    transcripts: Option<PathBuf>,

    /// Metadata directory (defaults to DEBATESMITH_METADATA)
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Ingest transcripts only, leaving the metadata tables untouched
    #[arg(long, default_value_t = false)]
    skip_metadata: bool,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = IngestCli::parse();
    let settings = Settings::from_env();
    let transcripts_dir = cli.transcripts.unwrap_or_else(|| settings.transcripts_dir.clone());
    let metadata_dir = cli.metadata.unwrap_or_else(|| settings.metadata_dir.clone());

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
    let pipeline = DebatePipeline::new(&db, client.clone(), client, &settings).await?;

    if !cli.skip_metadata {
        let metadata = load_metadata(&metadata_dir).await?;
        pipeline.apply_metadata(metadata).await?;
    }

    let report = pipeline.run(&transcripts_dir).await?;
    println!(
        "ingested {} of {} sources ({} already indexed, {} failed), {} chunks written",
        report.ingested, report.discovered, report.skipped, report.failed, report.chunks_written
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
