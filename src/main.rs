use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vidgrab::downloader::tools::ToolManager;
use vidgrab::{logging, Pipeline, PipelineConfig, Quality};

#[derive(Parser)]
#[command(
    name = "vidgrab",
    version,
    about = "Download videos from supported sites",
    long_about = "Fetches the media behind one or more page URLs, trying yt-dlp, a headless\n\
    browser and a plain page scrape in turn, then merges split streams and\n\
    repairs weak audio with ffmpeg.\n\n\
    Examples:\n\
      vidgrab https://www.bilibili.com/video/BV1xx411c7mD\n\
      vidgrab -j 4 -q medium URL1 URL2 URL3\n\
      vidgrab -d ./videos --no-report URL\n\
      vidgrab --check-tools"
)]
struct Args {
    /// Page URLs to download
    urls: Vec<String>,

    /// TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Download directory
    #[arg(short = 'd', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Quality preference (high, medium, low)
    #[arg(short = 'q', long = "quality")]
    quality: Option<Quality>,

    /// Number of concurrent downloads
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Proxy URL (socks5://host:port or http://host:port)
    #[arg(long = "proxy")]
    proxy: Option<String>,

    /// Do not write the JSON batch report
    #[arg(long = "no-report")]
    no_report: bool,

    /// Show external tool status and exit
    #[arg(long = "check-tools")]
    check_tools: bool,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn print_tools() {
    for tool in ToolManager::new().get_all_tools() {
        let status = if tool.is_available { "ok" } else { "missing" };
        println!(
            "{:<8} {:<8} {} {}",
            tool.name,
            status,
            tool.path.as_deref().unwrap_or("-"),
            tool.version.as_deref().unwrap_or("")
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    if args.check_tools {
        print_tools();
        return Ok(());
    }
    if args.urls.is_empty() {
        bail!("no URLs given (see --help)");
    }

    let mut config = PipelineConfig::load(args.config.as_deref())
        .with_context(|| "failed to load configuration")?;
    if let Some(dir) = args.output_dir {
        config.download_dir = dir;
    }
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    if let Some(jobs) = args.jobs {
        config.max_concurrent = jobs;
    }
    if args.proxy.is_some() {
        config.proxy = args.proxy;
    }
    if args.no_report {
        config.save_report = false;
    }
    info!(dir = %config.download_dir.display(), "downloading into");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::builder(config)
        .progress(tx)
        .build()
        .context("failed to set up pipeline")?;

    let progress = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            debug!(url = %p.url, "{:.1}% {}", p.percent, p.status);
        }
    });

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after current stages");
            cancel.cancel();
        }
    });

    let report = pipeline.run(args.urls).await;
    drop(pipeline);
    let _ = progress.await;

    for result in &report.results {
        match (&result.error, result.output_files.first()) {
            (None, Some(file)) => println!("OK    {} -> {}", result.url, file.display()),
            (Some(err), _) => println!("FAIL  {} ({})", result.url, err),
            (None, None) => println!("OK    {}", result.url),
        }
    }
    println!(
        "{}/{} succeeded ({:.1}%) in {:.1}s",
        report.succeeded, report.total, report.success_rate, report.total_time_secs
    );

    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
