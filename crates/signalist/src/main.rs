use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use signalist::agents::{OutputSink, StreamChunk};
use signalist::config::{RunMode, RunSettings, SettingsError};
use signalist::market::YahooProvider;
use signalist::models::SignalistConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "signalist", about = "RSI/MACD technical signals with agent-written narratives")]
struct Cli {
    /// Which analysis to run
    #[arg(short, long, value_enum, default_value_t = RunMode::Daily)]
    mode: RunMode,

    /// Optional TOML file with pipeline and indicator tuning
    #[arg(short, long)]
    config: Option<String>,

    /// Tickers to analyze, overriding STOCK_TICKER
    #[arg(short, long, value_delimiter = ',')]
    tickers: Option<Vec<String>>,

    /// Print each report as JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Writes the narrative to stdout as roles produce it.
struct StdoutSink;

#[async_trait]
impl OutputSink for StdoutSink {
    async fn write(&self, chunk: StreamChunk) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        match chunk {
            StreamChunk::Text { text, .. } => out.write_all(text.as_bytes())?,
            StreamChunk::Elided { chunks, bytes } => {
                write!(out, " [... {chunks} chunks ({bytes} bytes) skipped ...] ")?
            }
        }
        out.flush()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let ticker_override = cli.tickers.as_ref().map(|t| t.join(","));
    let lookup = |var: &str| match (&ticker_override, var) {
        (Some(tickers), "STOCK_TICKER") => Some(tickers.clone()),
        _ => std::env::var(var).ok(),
    };
    let settings = match RunSettings::from_env(cli.mode, lookup) {
        Ok(settings) => settings,
        Err(SettingsError::MissingVariables(vars)) => {
            eprintln!("Error: The following required environment variables are not set:");
            for var in vars {
                eprintln!("  - {var}");
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {path}"))?;
            toml::from_str::<SignalistConfig>(&raw).context("Failed to parse config")?
        }
        None => SignalistConfig::default(),
    };

    let backends = signalist::build_backends(&settings).context("Failed to configure backends")?;
    let mut yahoo = YahooProvider::new().context("Failed to build market data client")?;
    if let Some(url) = &settings.market_data_url {
        yahoo = yahoo.with_base_url(url);
    }
    let provider = Arc::new(yahoo);
    // text output streams every fragment as it lands; JSON prints only the report
    let streamed = !cli.json;

    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
    }

    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink);
    let mut failed = Vec::new();
    for ticker in &settings.tickers {
        if cancel.is_cancelled() {
            failed.push(ticker.clone());
            continue;
        }
        info!(ticker = %ticker, mode = ?settings.mode, "Analyzing");

        let orchestrator =
            signalist::build_orchestrator(&settings, &config, provider.clone(), backends.clone())
                .context("Failed to build orchestrator")?
                .with_cancel_token(cancel.clone());
        let drain = if streamed {
            Some(tokio::spawn(orchestrator.forwarder().drain_into(Arc::clone(&sink))))
        } else {
            None
        };

        let outcome = signalist::analyze(&orchestrator, settings.mode, ticker).await;
        orchestrator.forwarder().close();
        if let Some(drain) = drain {
            let _ = drain.await;
        }

        match outcome {
            Ok(report) if cli.json => println!("{}", serde_json::to_string_pretty(&report)?),
            Ok(report) => {
                print!("{}", report.render(false));
                println!();
            }
            Err(e) => {
                error!(ticker = %ticker, error = %e, "Analysis failed");
                eprintln!("Error: {ticker}: {e}");
                failed.push(ticker.clone());
            }
        }
    }

    if failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = ?failed, "Some tickers failed");
        Ok(ExitCode::FAILURE)
    }
}
