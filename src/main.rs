// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Haavi CLI
 * Command-line entry points for malware and vulnerability scans
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use haavi_scanner::config::{Profile, ScanConfig};
use haavi_scanner::filter::FilterConfig;
use haavi_scanner::pipeline::PipelineScanner;
use haavi_scanner::signatures::SignatureSet;
use haavi_scanner::vuln_scanner::{VulnScanOptions, VulnScanner};
use haavi_scanner::vulnerabilities::VulnerabilityIndex;
use haavi_scanner::wordpress::Site;
use haavi_scanner::CancelToken;

#[derive(Parser)]
#[command(name = "haavi", version, about = "Haavi - filesystem malware scanner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress non-error output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Scan filesystem trees for malware signatures
    MalwareScan(MalwareScanArgs),

    /// Check a WordPress site description for known vulnerabilities
    VulnScan(VulnScanArgs),
}

#[derive(clap::Args)]
struct MalwareScanArgs {
    /// Root paths to scan
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Signature set JSON file
    #[arg(long)]
    sig_file: PathBuf,

    /// Performance profile
    #[arg(long, value_enum, default_value = "balanced")]
    profile: ProfileArg,

    /// Worker count for the read and match stages
    #[arg(long)]
    workers: Option<usize>,

    /// Per-file delay in milliseconds
    #[arg(long)]
    scan_delay: Option<u64>,

    /// Rate-limiter chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Maximum file size in bytes (0 = unlimited)
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Per-pattern match timeout in milliseconds
    #[arg(long)]
    match_timeout: Option<u64>,

    /// Memory cap in bytes for adaptive throttling (0 = none)
    #[arg(long)]
    memory_limit: Option<u64>,

    /// Disk read budget in bytes per second (0 = none)
    #[arg(long)]
    io_rate_limit: Option<u64>,

    /// Files matched per worker before a batch pause (0 = none)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batch pause in milliseconds
    #[arg(long)]
    batch_pause: Option<u64>,

    /// 1-minute load average cap (0 = none)
    #[arg(long)]
    max_load: Option<f64>,

    /// Report every matching signature per file instead of the first
    #[arg(long)]
    match_all: bool,

    /// Follow symlinks during discovery
    #[arg(long)]
    follow_symlinks: bool,

    /// Log and continue on I/O errors during discovery
    #[arg(long)]
    allow_io_errors: bool,

    /// Scan all files instead of the PHP/HTML/JS defaults
    #[arg(long)]
    include_all_files: bool,

    /// Additional filename to include (repeatable)
    #[arg(long)]
    include_file: Vec<String>,

    /// Additional include pattern, regex on the path (repeatable)
    #[arg(long)]
    include_pattern: Vec<String>,

    /// Filename to exclude (repeatable)
    #[arg(long)]
    exclude_file: Vec<String>,

    /// Exclude pattern, regex on the path (repeatable)
    #[arg(long)]
    exclude_pattern: Vec<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(clap::Args)]
struct VulnScanArgs {
    /// Vulnerability feed JSON file
    #[arg(long)]
    vuln_file: PathBuf,

    /// Site description JSON file
    #[arg(long)]
    site_file: PathBuf,

    /// Include informational findings
    #[arg(long)]
    informational: bool,

    /// Only report these vulnerability IDs (repeatable)
    #[arg(long)]
    include_id: Vec<String>,

    /// Never report these vulnerability IDs (repeatable)
    #[arg(long)]
    exclude_id: Vec<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    Gentle,
    Balanced,
    Aggressive,
    Adaptive,
}

impl From<ProfileArg> for Profile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Gentle => Profile::Gentle,
            ProfileArg::Balanced => Profile::Balanced,
            ProfileArg::Aggressive => Profile::Aggressive,
            ProfileArg::Adaptive => Profile::Adaptive,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                if cli.quiet {
                    tracing::Level::ERROR.into()
                } else {
                    tracing::Level::INFO.into()
                },
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("haavi-worker")
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        match cli.command {
            Command::MalwareScan(args) => run_malware_scan(args).await,
            Command::VulnScan(args) => run_vuln_scan(args).await,
        }
    })
}

fn build_config(args: &MalwareScanArgs) -> ScanConfig {
    let mut config = ScanConfig::for_profile(args.profile.into());
    config.apply_env();

    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(delay) = args.scan_delay {
        config.scan_delay = Duration::from_millis(delay);
    }
    if let Some(chunk) = args.chunk_size {
        config.chunk_size = chunk;
    }
    if let Some(size) = args.max_file_size {
        config.max_file_size = size;
    }
    if let Some(timeout) = args.match_timeout {
        config.match_timeout = Duration::from_millis(timeout);
    }
    if let Some(limit) = args.memory_limit {
        config.memory_limit = limit;
    }
    if let Some(limit) = args.io_rate_limit {
        config.io_rate_limit = limit;
    }
    if let Some(size) = args.batch_size {
        config.batch_size = size;
    }
    if let Some(pause) = args.batch_pause {
        config.batch_pause = Duration::from_millis(pause);
    }
    if let Some(load) = args.max_load {
        config.max_load_avg = load;
    }
    config.match_all = args.match_all;
    config.follow_symlinks = args.follow_symlinks;
    config.allow_io_errors = args.allow_io_errors;
    config
}

async fn run_malware_scan(args: MalwareScanArgs) -> Result<()> {
    let sig_data = std::fs::read(&args.sig_file)
        .with_context(|| format!("reading signature file {}", args.sig_file.display()))?;
    let signatures = SignatureSet::from_json(&sig_data)?;
    info!(signatures = signatures.count(), "signature set loaded");

    let filter = FilterConfig {
        include_files: args.include_file.clone(),
        include_patterns: args.include_pattern.clone(),
        exclude_files: args.exclude_file.clone(),
        exclude_patterns: args.exclude_pattern.clone(),
        include_all: args.include_all_files,
    }
    .build()?;

    let config = build_config(&args);
    let scanner = Arc::new(PipelineScanner::new(&signatures, config).with_filter(filter));

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let mut results = scanner
        .scan(args.paths.clone(), cancel)
        .await
        .map_err(|err| anyhow::anyhow!(err))?;
    info!(scan_id = %scanner.scan_id(), "scan started");

    let mut infected = 0u64;
    while let Some(result) = results.recv().await {
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
            OutputFormat::Text => {
                if let Some(err) = &result.error {
                    warn!(path = %result.path.display(), "{err}");
                } else if result.has_matches() {
                    for m in &result.matches {
                        println!(
                            "INFECTED {} signature={} offset={} matched={:?}",
                            result.path.display(),
                            m.signature_id,
                            m.offset,
                            m.matched
                        );
                    }
                }
            }
        }
        if result.has_matches() {
            infected += 1;
        }
    }

    scanner.shutdown(Duration::from_secs(10)).await.ok();

    let stats = scanner.stats();
    info!(
        scan_id = %scanner.scan_id(),
        discovered = stats.discovered,
        reported = stats.reported,
        infected = stats.files_with_matches,
        skipped = stats.files_skipped,
        errored = stats.files_errored,
        duplicates = stats.duplicates_skipped,
        bytes = stats.bytes_scanned,
        hit_rate = format!("{:.2}", stats.buffer_pool_hit_rate),
        "scan complete"
    );

    if infected > 0 {
        error!(infected, "malware detected");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_vuln_scan(args: VulnScanArgs) -> Result<()> {
    let feed = std::fs::read(&args.vuln_file)
        .with_context(|| format!("reading vulnerability feed {}", args.vuln_file.display()))?;
    let index = VulnerabilityIndex::from_json(&feed)?;
    info!(
        vulnerabilities = index.count(),
        skipped = index.skipped_entries(),
        "vulnerability index loaded"
    );

    let site_data = std::fs::read(&args.site_file)
        .with_context(|| format!("reading site file {}", args.site_file.display()))?;
    let site = Site::from_json(&site_data)?;

    let scanner = VulnScanner::new(
        index,
        VulnScanOptions {
            informational: args.informational,
            include_ids: args.include_id.clone(),
            exclude_ids: args.exclude_id.clone(),
            ..Default::default()
        },
    );

    let result = scanner.scan_site(&site);

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
        OutputFormat::Text => {
            for m in &result.matches {
                println!(
                    "VULNERABLE {} {} {} ({}): {} {}",
                    m.software_type,
                    m.slug,
                    m.version,
                    m.path.display(),
                    m.vulnerability.title,
                    m.vulnerability.cve
                );
            }
        }
    }

    info!(
        site = %site.path.display(),
        matches = result.matches.len(),
        "vulnerability scan complete"
    );

    if !result.matches.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
