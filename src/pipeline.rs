// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Staged Scan Pipeline
 * discover -> filter -> read -> match -> report, with back-pressured channels
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::buffer_pool::ContentPool;
use crate::cancel::CancelToken;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{adaptive_monitor_defaults, ScanConfig};
use crate::errors::{ScanError, ScanErrorKind};
use crate::filter::FileFilter;
use crate::matcher::Matcher;
use crate::rate_limiter::ByteRateLimiter;
use crate::resource_monitor::ResourceMonitor;
use crate::signatures::SignatureSet;
use crate::types::{FileItem, PipelineStage, PipelineStats, ScanResult};

const CHANNEL_CAPACITY: usize = 100;

/// Deterministic scan identifier: leading 16 hex characters of
/// SHA-256(sorted roots || RFC3339 timestamp)
pub fn generate_scan_id(paths: &[PathBuf], timestamp: DateTime<Utc>) -> String {
    let mut sorted: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for path in &sorted {
        hasher.update(path.as_bytes());
    }
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Atomic counters behind the public stats snapshot
#[derive(Default)]
struct PipelineCounters {
    discovered: AtomicU64,
    filtered: AtomicU64,
    read: AtomicU64,
    matched: AtomicU64,
    reported: AtomicU64,

    files_with_matches: AtomicU64,
    files_skipped: AtomicU64,
    files_errored: AtomicU64,
    bytes_scanned: AtomicU64,
    duplicates_skipped: AtomicU64,

    circuit_breaks: AtomicU64,
    rate_limit_waits: AtomicU64,

    // Written once by scan start and report close.
    timing: Mutex<(Option<DateTime<Utc>>, Option<DateTime<Utc>>, f64)>,
}

impl PipelineCounters {
    fn snapshot(&self) -> PipelineStats {
        let (start_time, end_time, buffer_pool_hit_rate) =
            *self.timing.lock().expect("stats lock poisoned");
        PipelineStats {
            discovered: self.discovered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            files_with_matches: self.files_with_matches.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_errored: self.files_errored.load(Ordering::Relaxed),
            bytes_scanned: self.bytes_scanned.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            circuit_breaks: self.circuit_breaks.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            start_time,
            end_time,
            buffer_pool_hit_rate,
        }
    }

    fn mark_start(&self) {
        let mut timing = self.timing.lock().expect("stats lock poisoned");
        timing.0 = Some(Utc::now());
        timing.1 = None;
    }

    fn mark_end(&self, hit_rate: f64) {
        let mut timing = self.timing.lock().expect("stats lock poisoned");
        timing.1 = Some(Utc::now());
        timing.2 = hit_rate;
    }
}

/// Keeps the monitor's in-flight gauge honest across early exits
struct GaugeGuard(Option<Arc<AtomicU64>>);

impl GaugeGuard {
    fn new(gauge: Option<Arc<AtomicU64>>) -> Self {
        if let Some(gauge) = &gauge {
            gauge.fetch_add(1, Ordering::Relaxed);
        }
        Self(gauge)
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.0 {
            gauge.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

struct PipelineInner {
    matcher: Arc<Matcher>,
    config: ScanConfig,
    filter: FileFilter,

    buffer_pool: Arc<ContentPool>,
    limiter: ByteRateLimiter,
    breaker: CircuitBreaker,
    monitor: Option<ResourceMonitor>,
    task_gauge: Option<Arc<AtomicU64>>,

    dynamic_delay_ns: Arc<AtomicU64>,
    counters: PipelineCounters,
    processed: RwLock<HashSet<String>>,

    shutdown: RwLock<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    scan_id: Mutex<String>,
}

/// Staged pipeline scanner. Construct within a tokio runtime and run one
/// scan at a time.
#[derive(Clone)]
pub struct PipelineScanner {
    inner: Arc<PipelineInner>,
}

impl PipelineScanner {
    pub fn new(signatures: &SignatureSet, config: ScanConfig) -> Self {
        let matcher = Arc::new(Matcher::new(
            signatures,
            config.match_timeout,
            config.match_all,
        ));
        let limiter = ByteRateLimiter::new(config.io_rate_limit, config.chunk_size);
        let dynamic_delay_ns = Arc::new(AtomicU64::new(0));

        // The monitor runs for the adaptive profile, or whenever explicit
        // caps ask for it.
        let wants_monitor =
            config.profile.is_adaptive() || config.memory_limit > 0 || config.max_load_avg > 0.0;
        let (monitor, task_gauge) = if wants_monitor {
            let (default_memory, default_load) = adaptive_monitor_defaults();
            let memory_mb = if config.memory_limit > 0 {
                config.memory_limit / (1024 * 1024)
            } else if config.profile.is_adaptive() {
                default_memory / (1024 * 1024)
            } else {
                0
            };
            let max_load = if config.max_load_avg > 0.0 {
                config.max_load_avg
            } else if config.profile.is_adaptive() {
                default_load
            } else {
                0.0
            };

            let monitor = ResourceMonitor::new(Duration::from_millis(500), memory_mb, max_load);
            let delay_cell = Arc::clone(&dynamic_delay_ns);
            monitor.set_adjust_callback(Arc::new(move |_workers, delay| {
                delay_cell.store(delay.as_nanos() as u64, Ordering::Release);
            }));
            let gauge = monitor.task_gauge();
            (Some(monitor), Some(gauge))
        } else {
            (None, None)
        };

        Self {
            inner: Arc::new(PipelineInner {
                matcher,
                filter: FileFilter::default_malware(),
                buffer_pool: Arc::new(ContentPool::new()),
                limiter,
                breaker: CircuitBreaker::new(10, Duration::from_secs(30), 3),
                monitor,
                task_gauge,
                dynamic_delay_ns,
                counters: PipelineCounters::default(),
                processed: RwLock::new(HashSet::new()),
                shutdown: RwLock::new(false),
                handles: Mutex::new(Vec::new()),
                scan_id: Mutex::new(String::new()),
                config,
            }),
        }
    }

    pub fn with_filter(self, filter: FileFilter) -> Self {
        let mut inner = Arc::into_inner(self.inner)
            .expect("with_filter must be called before the scanner is shared");
        inner.filter = filter;
        Self { inner: Arc::new(inner) }
    }

    pub fn with_circuit_breaker(
        self,
        threshold: u32,
        cooldown: Duration,
        half_open_successes: u32,
    ) -> Self {
        let mut inner = Arc::into_inner(self.inner)
            .expect("with_circuit_breaker must be called before the scanner is shared");
        inner.breaker = CircuitBreaker::new(threshold, cooldown, half_open_successes);
        Self { inner: Arc::new(inner) }
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.counters.snapshot()
    }

    pub fn scan_id(&self) -> String {
        self.inner.scan_id.lock().expect("scan id lock poisoned").clone()
    }

    pub fn buffer_pool(&self) -> &ContentPool {
        &self.inner.buffer_pool
    }

    pub fn matcher(&self) -> &Matcher {
        &self.inner.matcher
    }

    pub fn monitor(&self) -> Option<&ResourceMonitor> {
        self.inner.monitor.as_ref()
    }

    /// Start a scan of `roots`, returning the result stream. The channel
    /// closes once every discovered file has been reported or dropped.
    pub async fn scan(
        &self,
        roots: Vec<PathBuf>,
        cancel: CancelToken,
    ) -> Result<mpsc::Receiver<ScanResult>, ScanError> {
        if roots.is_empty() {
            return Err(ScanError::validation("no paths to scan"));
        }
        if self.inner.is_shutdown() {
            return Err(ScanError::validation("scanner is shut down"));
        }

        let scan_id = generate_scan_id(&roots, Utc::now());
        *self.inner.scan_id.lock().expect("scan id lock poisoned") = scan_id.clone();
        debug!(scan_id = %scan_id, "starting pipeline scan");

        if let Some(monitor) = &self.inner.monitor {
            monitor.start();
            debug!("resource monitor started for adaptive throttling");
        }
        self.inner.counters.mark_start();

        let (discovered_tx, discovered_rx) = mpsc::channel::<FileItem>(CHANNEL_CAPACITY);
        let (filtered_tx, filtered_rx) = mpsc::channel::<FileItem>(CHANNEL_CAPACITY);
        let (read_tx, read_rx) = mpsc::channel::<FileItem>(CHANNEL_CAPACITY);
        let (matched_tx, matched_rx) = mpsc::channel::<FileItem>(CHANNEL_CAPACITY);
        let (results_tx, results_rx) = mpsc::channel::<ScanResult>(CHANNEL_CAPACITY);

        let mut handles = self.inner.handles.lock().expect("handles lock poisoned");

        handles.push(tokio::spawn(PipelineInner::discover_stage(
            Arc::clone(&self.inner),
            roots,
            scan_id,
            discovered_tx,
            cancel.clone(),
        )));

        handles.push(tokio::spawn(PipelineInner::filter_stage(
            Arc::clone(&self.inner),
            discovered_rx,
            filtered_tx,
            matched_tx.clone(),
            cancel.clone(),
        )));

        let workers = self.inner.config.workers.max(1);
        let filtered_rx = Arc::new(tokio::sync::Mutex::new(filtered_rx));
        let read_rx = Arc::new(tokio::sync::Mutex::new(read_rx));

        for _ in 0..workers {
            handles.push(tokio::spawn(PipelineInner::read_worker(
                Arc::clone(&self.inner),
                Arc::clone(&filtered_rx),
                read_tx.clone(),
                matched_tx.clone(),
                cancel.clone(),
            )));
            handles.push(tokio::spawn(PipelineInner::match_worker(
                Arc::clone(&self.inner),
                Arc::clone(&read_rx),
                matched_tx.clone(),
                cancel.clone(),
            )));
        }
        drop(read_tx);
        drop(matched_tx);

        handles.push(tokio::spawn(PipelineInner::report_stage(
            Arc::clone(&self.inner),
            matched_rx,
            results_tx,
            cancel,
        )));

        Ok(results_rx)
    }

    /// Gracefully stop the pipeline: block new scans, stop the monitor,
    /// close the rate limiter and wait for stage tasks. Idempotent.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ScanError> {
        {
            let mut shutdown = self.inner.shutdown.write().expect("shutdown lock poisoned");
            if *shutdown {
                return Ok(());
            }
            *shutdown = true;
        }

        info!("initiating graceful shutdown");

        if let Some(monitor) = &self.inner.monitor {
            monitor.stop().await;
        }
        self.inner.limiter.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.inner.handles.lock().expect("handles lock poisoned");
            handles.drain(..).collect()
        };

        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(timeout, wait_all).await {
            Ok(()) => {
                info!("graceful shutdown complete");
                Ok(())
            }
            Err(_) => {
                warn!("shutdown timeout, some stage tasks may still be running");
                Err(ScanError::internal(
                    "shutdown",
                    "timed out waiting for pipeline stages",
                ))
            }
        }
    }
}

impl PipelineInner {
    fn is_shutdown(&self) -> bool {
        *self.shutdown.read().expect("shutdown lock poisoned")
    }

    /// The per-file delay currently in force: the static configured delay or
    /// the monitor's recommendation, whichever is larger
    fn current_delay(&self) -> Duration {
        let dynamic = Duration::from_nanos(self.dynamic_delay_ns.load(Ordering::Acquire));
        self.config.scan_delay.max(dynamic)
    }

    async fn apply_delay(&self, cancel: &CancelToken) {
        let delay = self.current_delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    async fn discover_stage(
        self: Arc<Self>,
        roots: Vec<PathBuf>,
        scan_id: String,
        tx: mpsc::Sender<FileItem>,
        cancel: CancelToken,
    ) {
        let mut visited: HashSet<PathBuf> = HashSet::new();

        for root in roots {
            if self.is_shutdown() || cancel.is_cancelled() {
                return;
            }

            let metadata = match std::fs::metadata(&root) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %root.display(), error = %err, "cannot access path");
                    continue;
                }
            };

            if metadata.is_dir() {
                if !self
                    .walk_directory(&root, &scan_id, &mut visited, &tx, &cancel)
                    .await
                {
                    return;
                }
            } else if !self
                .send_discovered(root, metadata.len(), &scan_id, &mut visited, &tx, &cancel)
                .await
            {
                return;
            }
        }
    }

    /// Returns false when discovery should stop entirely
    async fn walk_directory(
        &self,
        dir: &Path,
        scan_id: &str,
        visited: &mut HashSet<PathBuf>,
        tx: &mpsc::Sender<FileItem>,
        cancel: &CancelToken,
    ) -> bool {
        let walker = WalkDir::new(dir).follow_links(self.config.follow_symlinks);

        for entry in walker {
            if self.is_shutdown() || cancel.is_cancelled() {
                return false;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if self.config.allow_io_errors {
                        warn!(error = %err, "error accessing path");
                        continue;
                    }
                    warn!(dir = %dir.display(), error = %err, "error walking directory");
                    return false;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            if entry.file_type().is_symlink() {
                // follow_links off: symlinked files are skipped.
                self.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(_) => continue,
            };

            if !self
                .send_discovered(entry.into_path(), size, scan_id, visited, tx, cancel)
                .await
            {
                return false;
            }
        }

        true
    }

    /// Returns false when the pipeline is gone or the scan was cancelled
    async fn send_discovered(
        &self,
        path: PathBuf,
        size: u64,
        scan_id: &str,
        visited: &mut HashSet<PathBuf>,
        tx: &mpsc::Sender<FileItem>,
        cancel: &CancelToken,
    ) -> bool {
        // Resolve to the real path so symlink cycles and overlapping roots
        // are visited once.
        let resolved = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !visited.insert(resolved) {
            return true;
        }

        self.counters.discovered.fetch_add(1, Ordering::Relaxed);
        let item = FileItem::new(path, size, scan_id.to_string());

        tokio::select! {
            _ = cancel.cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        }
    }

    async fn filter_stage(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<FileItem>,
        tx: mpsc::Sender<FileItem>,
        matched_tx: mpsc::Sender<FileItem>,
        cancel: CancelToken,
    ) {
        while let Some(mut item) = rx.recv().await {
            if self.is_shutdown() || cancel.is_cancelled() {
                return;
            }

            if !self.filter.matches(&item.path) {
                self.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // Size rejections are reported, not silently dropped.
            if self.config.max_file_size > 0 && item.size > self.config.max_file_size {
                item.error = Some(ScanError::file_too_large(
                    &item.path,
                    item.size,
                    self.config.max_file_size,
                ));
                self.counters.files_skipped.fetch_add(1, Ordering::Relaxed);
                let _ = matched_tx.send(item).await;
                continue;
            }

            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            item.stage = PipelineStage::Filter;

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn read_worker(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FileItem>>>,
        tx: mpsc::Sender<FileItem>,
        matched_tx: mpsc::Sender<FileItem>,
        cancel: CancelToken,
    ) {
        loop {
            let item = { rx.lock().await.recv().await };
            let Some(mut item) = item else { return };

            if self.is_shutdown() || cancel.is_cancelled() {
                // Drain without reading; the item owns no buffer yet.
                continue;
            }
            let _gauge = GaugeGuard::new(self.task_gauge.clone());

            if let Err(err) = self.limiter.wait_for(item.size, &cancel).await {
                self.counters.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                self.counters.files_errored.fetch_add(1, Ordering::Relaxed);
                item.error = Some(ScanError::rate_limited(&item.path, err));
                let _ = matched_tx.send(item).await;
                continue;
            }

            self.apply_delay(&cancel).await;

            if !self.breaker.allow() {
                self.counters.circuit_breaks.fetch_add(1, Ordering::Relaxed);
                self.counters.files_errored.fetch_add(1, Ordering::Relaxed);
                item.error = Some(ScanError::circuit_open(&item.path));
                let _ = matched_tx.send(item).await;
                continue;
            }

            let content = match self.read_content(&item.path, item.size).await {
                Ok(content) => {
                    self.breaker.record(true);
                    content
                }
                Err(err) => {
                    self.breaker.record(false);
                    self.counters.files_errored.fetch_add(1, Ordering::Relaxed);
                    item.error = Some(err);
                    let _ = matched_tx.send(item).await;
                    continue;
                }
            };

            item.content_hash = hex::encode(Sha256::digest(&content));
            item.scanned_bytes = content.len() as u64;

            // Content-hash idempotency: only the first occurrence proceeds.
            let duplicate = {
                let processed = self.processed.read().expect("processed lock poisoned");
                processed.contains(&item.content_hash)
            } || !self
                .processed
                .write()
                .expect("processed lock poisoned")
                .insert(item.content_hash.clone());

            if duplicate {
                self.buffer_pool.release(content);
                self.counters.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.counters.read.fetch_add(1, Ordering::Relaxed);
            self.counters
                .bytes_scanned
                .fetch_add(item.scanned_bytes, Ordering::Relaxed);
            item.content = Some(content);
            item.pool = Some(Arc::clone(&self.buffer_pool));
            item.stage = PipelineStage::Read;

            tokio::select! {
                // Dropping the item releases its buffer.
                _ = cancel.cancelled() => return,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn read_content(&self, path: &Path, size: u64) -> Result<Vec<u8>, ScanError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|err| ScanError::file_access(path, err))?;

        let mut cap = size;
        if self.config.max_file_size > 0 {
            cap = cap.min(self.config.max_file_size);
        }

        let mut buffer = self.buffer_pool.acquire(cap);
        let target = (cap as usize).min(buffer.len());

        let mut filled = 0usize;
        while filled < target {
            match file.read(&mut buffer[filled..target]).await {
                // Short reads are tolerated; scan what we got.
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) => {
                    self.buffer_pool.release(buffer);
                    return Err(ScanError::file_read(path, err));
                }
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    async fn match_worker(
        self: Arc<Self>,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FileItem>>>,
        matched_tx: mpsc::Sender<FileItem>,
        cancel: CancelToken,
    ) {
        let mut batch_count = 0usize;

        loop {
            let item = { rx.lock().await.recv().await };
            let Some(mut item) = item else { return };

            if self.is_shutdown() || cancel.is_cancelled() {
                item.release_buffer();
                continue;
            }
            let _gauge = GaugeGuard::new(self.task_gauge.clone());

            self.apply_delay(&cancel).await;

            let started = Instant::now();
            if let Some(content) = item.content.as_deref() {
                match self.matcher.match_content(content, &cancel) {
                    Ok(found) => {
                        item.matches = found.matches;
                        item.timeouts = found.timeouts;
                    }
                    Err(err) if err.kind == ScanErrorKind::ContextCancelled => {
                        item.release_buffer();
                        return;
                    }
                    Err(err) => {
                        debug!(path = %item.path.display(), error = %err, "match error");
                    }
                }
            }
            item.scan_duration = started.elapsed();
            item.stage = PipelineStage::Match;

            // The buffer goes back to the pool the moment matching is done.
            item.release_buffer();

            if item.has_matches() {
                self.counters.files_with_matches.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.matched.fetch_add(1, Ordering::Relaxed);

            batch_count += 1;
            if self.config.batch_size > 0
                && batch_count >= self.config.batch_size
                && !self.config.batch_pause.is_zero()
            {
                batch_count = 0;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.batch_pause) => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = matched_tx.send(item) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn report_stage(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<FileItem>,
        results: mpsc::Sender<ScanResult>,
        cancel: CancelToken,
    ) {
        while let Some(mut item) = rx.recv().await {
            if self.is_shutdown() {
                continue;
            }

            let result = ScanResult {
                path: std::mem::take(&mut item.path),
                matches: std::mem::take(&mut item.matches),
                timeouts: std::mem::take(&mut item.timeouts),
                scanned_bytes: item.scanned_bytes,
                scan_duration: item.scan_duration,
                error: item.error.take(),
            };

            self.counters.reported.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = results.send(result) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        self.counters.mark_end(self.buffer_pool.hit_rate());
    }
}
