use tracing::{error, info};

use search_runtime::engines::ingestion::SyncOptions;
use search_runtime::{RuntimeConfig, SearchEngines};

fn parse_args() -> SyncOptions {
    let mut options = SyncOptions::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--limit" => {
                options.limit = args.next().and_then(|value| value.parse().ok());
            }
            "--prefix" => {
                options.prefix = args.next();
            }
            "--reindex" => {
                options.reindex = true;
            }
            other => {
                eprintln!("unknown argument: {}", other);
                eprintln!("usage: visearch-sync [--limit N] [--prefix P] [--reindex]");
                std::process::exit(2);
            }
        }
    }

    options
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("🚀 visearch sync starting...");
    info!("Version: {}", search_runtime::VERSION);

    let options = parse_args();
    let config = RuntimeConfig::from_env();

    let engines = match SearchEngines::initialize(config).await {
        Ok(engines) => engines,
        Err(e) => {
            error!("❌ failed to initialize engines: {}", e);
            return Err(e.into());
        }
    };

    let report = engines.sync_pipeline().run(&options).await?;

    info!("Sync report:");
    info!("  - listed:          {}", report.listed);
    info!("  - selected:        {}", report.selected);
    info!("  - skipped:         {}", report.skipped_existing);
    info!("  - downloaded:      {}", report.downloaded);
    info!("  - rejected:        {}", report.rejected);
    info!("  - embed failures:  {}", report.embed_failed);
    info!("  - store failures:  {}", report.store_failed);
    info!("  - succeeded:       {}", report.succeeded);
    info!("  - elapsed:         {}ms", report.elapsed_ms);

    Ok(())
}
