use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tsumugi::{DownloadConfig, DownloadSession};

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Download, decrypt and reassemble HLS streams")]
pub struct TsumugiArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Threads limit, 1 to 16
    #[clap(long, env = "TSUMUGI_THREADS")]
    threads: Option<u32>,

    /// Retry limit
    #[clap(long)]
    retries: Option<u32>,

    /// Timeout of every request in seconds
    #[clap(long)]
    timeout: Option<u64>,

    /// Base delay between retries in milliseconds. Retries immediately if not set.
    #[clap(long)]
    backoff_ms: Option<u64>,

    /// Page the stream was found on
    ///
    /// Used to derive `Referer` and `Origin` headers.
    #[clap(long)]
    source_page: Option<String>,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "User-Agent: xxxxx".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Cookies used to download
    #[clap(long)]
    cookies: Option<String>,

    /// Set key manually
    ///
    /// (Optional) Hex encoded AES-128 key for decrypt video.
    #[clap(long)]
    key: Option<String>,

    /// Load settings from a TOML file. Command line options take precedence.
    #[clap(long, env = "TSUMUGI_CONFIG")]
    config: Option<PathBuf>,

    /// Concat all segments into this file after download
    #[clap(long)]
    output_file: Option<PathBuf>,

    /// Print the download report as JSON
    #[clap(long)]
    json: bool,

    /// Directory to save segments in
    #[clap(short, long, default_value = "./output")]
    output: PathBuf,

    /// m3u8 url
    m3u8: url::Url,
}

impl TsumugiArgs {
    fn config(&self) -> anyhow::Result<DownloadConfig> {
        let mut config = match &self.config {
            Some(path) => DownloadConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => DownloadConfig::default(),
        };

        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(backoff_ms) = self.backoff_ms {
            config.retry_backoff_ms = backoff_ms;
        }
        if self.source_page.is_some() {
            config.source_page = self.source_page.clone();
        }
        if self.cookies.is_some() {
            config.cookies = self.cookies.clone();
        }
        if self.key.is_some() {
            config.key = self.key.clone();
        }
        if self.output_file.is_some() {
            config.output_file = self.output_file.clone();
        }

        let mut options = config.header_options();
        for header in &self.headers {
            options.push_line(header)?;
        }
        config.headers = options.headers;

        Ok(config)
    }
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::warn!("Cancelling download, press Ctrl-C again to exit immediately.");
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TsumugiArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .try_from_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config()?;
    log::debug!("Download config: {config:?}");

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let session = DownloadSession::new(config, token)?;
    let report = session.run(args.m3u8.clone(), &args.output).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(playlist) = &report.playlist {
        log::info!("Local playlist written to {}", playlist.display());
    }

    if !report.success {
        anyhow::bail!(
            "{} of {} segments downloaded{}",
            report.downloaded_segments,
            report.total_segments,
            if report.cancelled { ", cancelled" } else { "" }
        );
    }
    Ok(())
}
