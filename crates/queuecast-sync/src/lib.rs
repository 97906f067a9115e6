//! Sync pass orchestration: row classification, publishing, and the
//! archival sweep.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use queuecast_adapters::{
    BufferPublisher, CredentialSource, EnvCredentials, Publisher, RowSink, RowSource,
    SheetsClient, SubmitRequest, TypefullyPublisher,
};
use queuecast_core::{civil_today, parse_date, resolve_schedule, ColumnMap, ResolvedSchedule, Row, Status};
use queuecast_store::{fingerprint, FingerprintStore};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "queuecast-sync";

// ---------------------------------------------------------------------------
// Row classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingFields,
    UnknownPlatform,
    UnparseableSchedule,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingFields => "missing fields",
            Self::UnknownPlatform => "unknown platform",
            Self::UnparseableSchedule => "unparseable date/time",
        };
        f.write_str(text)
    }
}

/// What one pass does with one row. `MarkDuplicate` still converges the
/// status cell to Sent, but the publisher is never invoked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Submit {
        schedule: ResolvedSchedule,
        fingerprint: String,
    },
    MarkDuplicate,
    Skip {
        reason: SkipReason,
    },
    Ignore,
}

/// Routing policy for one row. Pure apart from the fingerprint lookup.
pub fn classify(row: &Row, store: &FingerprintStore) -> Action {
    if row.status != Some(Status::Ready) {
        return Action::Ignore;
    }
    if row.raw_platform.is_empty()
        || row.content.is_empty()
        || row.date.is_empty()
        || row.time.is_empty()
    {
        return Action::Skip {
            reason: SkipReason::MissingFields,
        };
    }
    if row.platform.is_none() {
        return Action::Skip {
            reason: SkipReason::UnknownPlatform,
        };
    }
    let Ok(schedule) = resolve_schedule(&row.date, &row.time) else {
        return Action::Skip {
            reason: SkipReason::UnparseableSchedule,
        };
    };
    let digest = fingerprint(&row.content, &schedule.iso8601());
    if store.contains(&digest) {
        return Action::MarkDuplicate;
    }
    Action::Submit {
        schedule,
        fingerprint: digest,
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which publishing integration a pass targets. Selected at startup; the
/// orchestrator itself is integration-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    Buffer,
    Typefully,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Typefully => "typefully",
        }
    }

    /// Column layout of the integration's sheet. The Buffer sheet carries
    /// a media column; the Typefully sheet does not.
    pub fn column_map(&self) -> ColumnMap {
        match self {
            Self::Buffer => ColumnMap::with_media(),
            Self::Typefully => ColumnMap::compact(),
        }
    }

    pub fn column_range(&self) -> &'static str {
        match self {
            Self::Buffer => "A:G",
            Self::Typefully => "A:F",
        }
    }
}

impl FromStr for IntegrationKind {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(Self::Buffer),
            "typefully" => Ok(Self::Typefully),
            other => anyhow::bail!("unknown integration {other:?} (expected buffer or typefully)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    pub integration_id: String,
    pub kind: IntegrationKind,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationRegistry {
    pub integrations: Vec<IntegrationConfig>,
}

pub fn load_registry(path: impl AsRef<Path>) -> Result<IntegrationRegistry> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub active_sheet: String,
    pub archive_sheet: String,
    pub store_path: PathBuf,
    pub registry_path: PathBuf,
    pub throttle_ms: u64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub cleanup_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            active_sheet: std::env::var("QUEUECAST_ACTIVE_SHEET")
                .unwrap_or_else(|_| "Sheet1".to_string()),
            archive_sheet: std::env::var("QUEUECAST_ARCHIVE_SHEET")
                .unwrap_or_else(|_| "Archive".to_string()),
            store_path: std::env::var("QUEUECAST_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sent-hashes.json")),
            registry_path: std::env::var("QUEUECAST_INTEGRATIONS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("integrations.yaml")),
            throttle_ms: std::env::var("QUEUECAST_THROTTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            scheduler_enabled: std::env::var("QUEUECAST_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("QUEUECAST_SYNC_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            cleanup_cron: std::env::var("QUEUECAST_CLEANUP_CRON")
                .unwrap_or_else(|_| "0 0 2 * * *".to_string()),
        }
    }

    /// Inter-row publish throttle. Always positive; the delay paces the
    /// publishing API's rate limits.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Sync pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub sent: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: usize,
    sent: usize,
    duplicates: usize,
    skipped: usize,
}

/// Drives one pass over the queue in sheet order. FIFO on sheet order is
/// intentional; downstream pacing may depend on stable ordering.
pub struct SyncOrchestrator {
    source: Box<dyn RowSource>,
    sink: Box<dyn RowSink>,
    publisher: Box<dyn Publisher>,
    columns: ColumnMap,
    store: FingerprintStore,
    throttle: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        source: Box<dyn RowSource>,
        sink: Box<dyn RowSink>,
        publisher: Box<dyn Publisher>,
        columns: ColumnMap,
        store: FingerprintStore,
        throttle: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            publisher,
            columns,
            store,
            throttle: throttle.max(Duration::from_millis(1)),
        }
    }

    /// One full pass: fetch, classify, act, flush once, summarize.
    /// A mid-run fatal error aborts the remaining rows but the store is
    /// still flushed so completed rows are not resubmitted next run.
    pub async fn run_once(&mut self) -> Result<SyncSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, service = self.publisher.service_name(), store = self.store.len(), "starting sync pass");

        let rows = self.source.fetch_rows().await.context("fetching queue rows")?;
        let mut counters = Counters::default();
        let outcome = self.process_rows(&rows, &mut counters).await;

        let flushed = self.store.flush().await.context("flushing fingerprint store");
        match (&outcome, flushed) {
            (Ok(()), Err(err)) => return Err(err),
            (Err(_), Err(err)) => error!(%run_id, err = %err, "store flush failed after aborted pass"),
            _ => {}
        }
        outcome?;

        let summary = SyncSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            processed: counters.processed,
            sent: counters.sent,
            duplicates: counters.duplicates,
            skipped: counters.skipped,
        };
        info!(
            %run_id,
            processed = summary.processed,
            sent = summary.sent,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "sync pass complete"
        );
        Ok(summary)
    }

    async fn process_rows(&mut self, rows: &[Vec<String>], counters: &mut Counters) -> Result<()> {
        for (index, cells) in rows.iter().enumerate().skip(1) {
            if cells.len() < self.columns.min_len() {
                continue;
            }
            let row = self.columns.row_from_cells(index, cells);
            match classify(&row, &self.store) {
                Action::Ignore => {}
                Action::Skip { reason } => {
                    counters.processed += 1;
                    counters.skipped += 1;
                    warn!(row = index + 1, %reason, "skipping row");
                }
                Action::MarkDuplicate => {
                    counters.processed += 1;
                    self.sink
                        .update_status(index, Status::Sent.as_str())
                        .await
                        .with_context(|| format!("marking duplicate row {}", index + 1))?;
                    counters.duplicates += 1;
                    info!(row = index + 1, "duplicate suppressed");
                }
                Action::Submit {
                    schedule,
                    fingerprint,
                } => {
                    counters.processed += 1;
                    let request = SubmitRequest {
                        content: row.content.clone(),
                        schedule,
                        platform: row.platform.ok_or_else(|| {
                            anyhow::anyhow!("submit action without platform on row {}", index + 1)
                        })?,
                        media_url: row.media_url.clone(),
                    };
                    // Publish must succeed before the fingerprint is added
                    // and before the status cell advances; a failed row
                    // stays Ready and is retried on the next pass.
                    match self.publisher.submit(&request).await {
                        Ok(()) => {
                            self.store.add(fingerprint);
                            self.sink
                                .update_status(index, Status::Sent.as_str())
                                .await
                                .with_context(|| {
                                    format!("marking sent row {}", index + 1)
                                })?;
                            counters.sent += 1;
                            info!(row = index + 1, platform = %row.raw_platform, "post scheduled");
                        }
                        Err(err) => {
                            counters.skipped += 1;
                            warn!(row = index + 1, %err, "publish failed, row stays Ready");
                        }
                    }
                    tokio::time::sleep(self.throttle).await;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Archival sweep
// ---------------------------------------------------------------------------

/// Result of one sweep: a pure partition of the input rows. The header is
/// always first in `kept`; blank rows appear in neither output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePartition {
    pub kept: Vec<Vec<String>>,
    pub archived: Vec<Vec<String>>,
}

fn cell<'a>(cells: &'a [String], index: usize) -> &'a str {
    cells.get(index).map(String::as_str).unwrap_or("")
}

/// Partition data rows between active and archive destinations. A row is
/// archived when its status is Sent or Skip, or its scheduled date is
/// strictly before `today` (date-only; the time cell is never consulted).
pub fn partition(rows: &[Vec<String>], today: NaiveDate, columns: &ColumnMap) -> ArchivePartition {
    let mut kept = Vec::new();
    let mut archived = Vec::new();
    let Some((header, data)) = rows.split_first() else {
        return ArchivePartition { kept, archived };
    };
    kept.push(header.clone());

    for cells in data {
        let platform = cell(cells, columns.platform).trim();
        let content = cell(cells, columns.content).trim();
        if platform.is_empty() && content.is_empty() {
            // Blank line; silently dropped from both outputs.
            continue;
        }
        let status = Status::parse(cell(cells, columns.status));
        let past_due = parse_date(cell(cells, columns.date))
            .map(|date| date < today)
            .unwrap_or(false);
        let archive = matches!(status, Some(Status::Sent) | Some(Status::Skip)) || past_due;
        if archive {
            archived.push(cells.clone());
        } else {
            kept.push(cells.clone());
        }
    }

    ArchivePartition { kept, archived }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub archived: usize,
    pub kept: usize,
}

/// Sweep completed/expired rows to the archive destination: append the
/// archived rows, clear the active range, rewrite the kept rows. Writes
/// nothing when no row is archivable; the archive destination is
/// provisioned first when something is.
pub async fn run_cleanup(
    source: &dyn RowSource,
    sink: &dyn RowSink,
    columns: &ColumnMap,
    today: NaiveDate,
) -> Result<CleanupSummary> {
    let rows = source.fetch_rows().await.context("fetching queue rows")?;
    if rows.len() <= 1 {
        info!("no data rows to sweep");
        return Ok(CleanupSummary {
            archived: 0,
            kept: 0,
        });
    }

    let parts = partition(&rows, today, columns);
    let summary = CleanupSummary {
        archived: parts.archived.len(),
        kept: parts.kept.len().saturating_sub(1),
    };
    if parts.archived.is_empty() {
        info!("nothing to archive");
        return Ok(summary);
    }

    sink.ensure_archive()
        .await
        .context("provisioning archive destination")?;
    sink.append_rows(&parts.archived)
        .await
        .context("appending archived rows")?;
    sink.clear_range().await.context("clearing active range")?;
    sink.replace_all(&parts.kept)
        .await
        .context("rewriting kept rows")?;
    info!(archived = summary.archived, kept = summary.kept, "sweep complete");
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Environment wiring
// ---------------------------------------------------------------------------

fn sheets_client_for(
    credentials: &dyn CredentialSource,
    config: &SyncConfig,
    kind: IntegrationKind,
) -> Result<SheetsClient> {
    let access_token = credentials.require("SHEETS_ACCESS_TOKEN")?;
    let spreadsheet_id = credentials.require("GOOGLE_SHEET_ID")?;
    SheetsClient::new(
        access_token,
        spreadsheet_id,
        config.active_sheet.clone(),
        config.archive_sheet.clone(),
        kind.column_range().to_string(),
        kind.column_map().status,
    )
}

async fn publisher_for(
    credentials: &dyn CredentialSource,
    kind: IntegrationKind,
) -> Result<Box<dyn Publisher>> {
    match kind {
        IntegrationKind::Buffer => {
            let access_token = credentials.require("BUFFER_ACCESS_TOKEN")?;
            let manual_ids = credentials.get("BUFFER_PROFILE_IDS").map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            });
            match manual_ids.filter(|ids| !ids.is_empty()) {
                Some(ids) => Ok(Box::new(BufferPublisher::with_profile_ids(
                    access_token,
                    ids,
                )?)),
                None => Ok(Box::new(BufferPublisher::connect(access_token).await?)),
            }
        }
        IntegrationKind::Typefully => {
            let api_key = credentials.require("TYPEFULLY_API_KEY")?;
            Ok(Box::new(TypefullyPublisher::connect(api_key).await?))
        }
    }
}

/// Build and run one sync pass for an integration. Missing credentials
/// abort before any row is touched.
pub async fn run_sync_once(
    kind: IntegrationKind,
    config: &SyncConfig,
    credentials: &dyn CredentialSource,
) -> Result<SyncSummary> {
    let client = sheets_client_for(credentials, config, kind)?;
    let publisher = publisher_for(credentials, kind).await?;
    let store = FingerprintStore::load(&config.store_path).await;
    let mut orchestrator = SyncOrchestrator::new(
        Box::new(client.clone()),
        Box::new(client),
        publisher,
        kind.column_map(),
        store,
        config.throttle(),
    );
    orchestrator.run_once().await
}

/// Run one archival sweep for an integration's sheet layout.
pub async fn run_cleanup_once(
    kind: IntegrationKind,
    config: &SyncConfig,
    credentials: &dyn CredentialSource,
) -> Result<CleanupSummary> {
    let client = sheets_client_for(credentials, config, kind)?;
    let source = client.clone();
    let today = civil_today(Utc::now());
    run_cleanup(&source, &client, &kind.column_map(), today).await
}

pub async fn run_sync_once_from_env(kind: IntegrationKind) -> Result<SyncSummary> {
    run_sync_once(kind, &SyncConfig::from_env(), &EnvCredentials).await
}

pub async fn run_cleanup_once_from_env(kind: IntegrationKind) -> Result<CleanupSummary> {
    run_cleanup_once(kind, &SyncConfig::from_env(), &EnvCredentials).await
}

/// Enabled integrations from the registry file, in declaration order.
pub fn enabled_integrations(config: &SyncConfig) -> Result<Vec<IntegrationConfig>> {
    let registry = load_registry(&config.registry_path)?;
    Ok(registry
        .integrations
        .into_iter()
        .filter(|integration| integration.enabled)
        .collect())
}

/// Cron scheduler for recurring sync and nightly cleanup passes, when
/// enabled by configuration. Each job rebuilds its collaborators from the
/// environment so a failed run never poisons the next one.
pub async fn maybe_build_scheduler(config: &SyncConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let kinds: Vec<IntegrationKind> = enabled_integrations(config)?
        .iter()
        .map(|integration| integration.kind)
        .collect();
    if kinds.is_empty() {
        warn!("scheduler enabled but no integrations are enabled");
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await.context("creating scheduler")?;

    let sync_kinds = kinds.clone();
    let sync_job = Job::new_async(config.sync_cron.as_str(), move |_uuid, _lock| {
        let kinds = sync_kinds.clone();
        Box::pin(async move {
            for kind in kinds {
                if let Err(err) = run_sync_once_from_env(kind).await {
                    error!(integration = kind.as_str(), %err, "scheduled sync failed");
                }
            }
        })
    })
    .with_context(|| format!("creating sync job for cron {}", config.sync_cron))?;
    scheduler.add(sync_job).await.context("adding sync job")?;

    let cleanup_kinds = kinds;
    let cleanup_job = Job::new_async(config.cleanup_cron.as_str(), move |_uuid, _lock| {
        let kinds = cleanup_kinds.clone();
        Box::pin(async move {
            for kind in kinds {
                if let Err(err) = run_cleanup_once_from_env(kind).await {
                    error!(integration = kind.as_str(), %err, "scheduled cleanup failed");
                }
            }
        })
    })
    .with_context(|| format!("creating cleanup job for cron {}", config.cleanup_cron))?;
    scheduler
        .add(cleanup_job)
        .await
        .context("adding cleanup job")?;

    Ok(Some(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use queuecast_core::Platform;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn data_row(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn buffer_header() -> Vec<String> {
        data_row(&["Platform", "Content", "MediaURL", "Date", "Time", "Status", "Notes"])
    }

    async fn empty_store() -> (tempfile::TempDir, FingerprintStore) {
        let dir = tempdir().expect("tempdir");
        let store = FingerprintStore::load(dir.path().join("sent-hashes.json")).await;
        (dir, store)
    }

    fn ready_row(index: usize) -> Row {
        ColumnMap::with_media().row_from_cells(
            index,
            &data_row(&["X", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
        )
    }

    #[tokio::test]
    async fn non_ready_rows_are_ignored() {
        let (_dir, store) = empty_store().await;
        for status in ["Draft", "Template", "Sent", "Skip", "Queued", "???", ""] {
            let row = ColumnMap::with_media().row_from_cells(
                1,
                &data_row(&["X", "hello", "", "2026-02-03", "09:00", status, ""]),
            );
            assert_eq!(classify(&row, &store), Action::Ignore, "status {status:?}");
        }
    }

    #[tokio::test]
    async fn missing_required_fields_skip() {
        let (_dir, store) = empty_store().await;
        let cases = [
            ["", "hello", "", "2026-02-03", "09:00", "Ready", ""],
            ["X", "", "", "2026-02-03", "09:00", "Ready", ""],
            ["X", "hello", "", "", "09:00", "Ready", ""],
            ["X", "hello", "", "2026-02-03", "", "Ready", ""],
        ];
        for cells in cases {
            let row = ColumnMap::with_media().row_from_cells(1, &data_row(&cells));
            assert_eq!(
                classify(&row, &store),
                Action::Skip {
                    reason: SkipReason::MissingFields
                }
            );
        }
    }

    #[tokio::test]
    async fn unparseable_schedule_skips() {
        let (_dir, store) = empty_store().await;
        let row = ColumnMap::with_media().row_from_cells(
            1,
            &data_row(&["X", "hello", "", "2026/02/03", "09:00", "Ready", ""]),
        );
        assert_eq!(
            classify(&row, &store),
            Action::Skip {
                reason: SkipReason::UnparseableSchedule
            }
        );
    }

    #[tokio::test]
    async fn submit_then_duplicate_is_idempotent() {
        let (_dir, mut store) = empty_store().await;
        let row = ready_row(1);

        let Action::Submit { fingerprint, schedule } = classify(&row, &store) else {
            panic!("expected submit");
        };
        assert_eq!(schedule.iso8601(), "2026-02-03T15:00:00Z");

        store.add(fingerprint);
        assert_eq!(classify(&row, &store), Action::MarkDuplicate);
    }

    #[tokio::test]
    async fn same_text_different_time_is_not_a_duplicate() {
        let (_dir, mut store) = empty_store().await;
        let first = ready_row(1);
        let Action::Submit { fingerprint, .. } = classify(&first, &store) else {
            panic!("expected submit");
        };
        store.add(fingerprint);

        let later = ColumnMap::with_media().row_from_cells(
            2,
            &data_row(&["X", "hello", "", "2026-02-03", "10:00", "Ready", ""]),
        );
        assert!(matches!(classify(&later, &store), Action::Submit { .. }));
    }

    // -- mock collaborators -------------------------------------------------

    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().expect("event log").push(event);
        }

        fn events(&self) -> Vec<String> {
            self.0.lock().expect("event log").clone()
        }
    }

    struct MockSource {
        rows: Vec<Vec<String>>,
    }

    #[async_trait]
    impl RowSource for MockSource {
        async fn fetch_rows(&self) -> Result<Vec<Vec<String>>> {
            Ok(self.rows.clone())
        }
    }

    #[derive(Clone)]
    struct RecordingSink {
        log: EventLog,
    }

    #[async_trait]
    impl RowSink for RecordingSink {
        async fn update_status(&self, sheet_index: usize, status: &str) -> Result<()> {
            self.log.push(format!("status:{sheet_index}:{status}"));
            Ok(())
        }

        async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
            self.log.push(format!("append:{}", rows.len()));
            Ok(())
        }

        async fn replace_all(&self, rows: &[Vec<String>]) -> Result<()> {
            self.log.push(format!("replace:{}", rows.len()));
            Ok(())
        }

        async fn clear_range(&self) -> Result<()> {
            self.log.push("clear".to_string());
            Ok(())
        }

        async fn ensure_archive(&self) -> Result<()> {
            self.log.push("ensure".to_string());
            Ok(())
        }
    }

    /// Sink whose status writes always fail; used to abort a pass mid-run.
    struct FailingSink;

    #[async_trait]
    impl RowSink for FailingSink {
        async fn update_status(&self, _sheet_index: usize, _status: &str) -> Result<()> {
            anyhow::bail!("status write rejected")
        }

        async fn append_rows(&self, _rows: &[Vec<String>]) -> Result<()> {
            Ok(())
        }

        async fn replace_all(&self, _rows: &[Vec<String>]) -> Result<()> {
            Ok(())
        }

        async fn clear_range(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct MockPublisher {
        log: EventLog,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        fn service_name(&self) -> &'static str {
            "mock"
        }

        async fn submit(&self, request: &SubmitRequest) -> Result<(), queuecast_adapters::PublishError> {
            if self.fail {
                return Err(queuecast_adapters::PublishError::Http {
                    service: "mock",
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.log.push(format!(
                "publish:{}:{}",
                request.platform.as_str(),
                request.content
            ));
            Ok(())
        }
    }

    fn orchestrator(
        rows: Vec<Vec<String>>,
        store: FingerprintStore,
        log: EventLog,
        fail: bool,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Box::new(MockSource { rows }),
            Box::new(RecordingSink { log: log.clone() }),
            Box::new(MockPublisher { log, fail }),
            ColumnMap::with_media(),
            store,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn first_pass_publishes_then_marks_sent() {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("sent-hashes.json");
        let store = FingerprintStore::load(&store_path).await;
        let log = EventLog::default();

        let rows = vec![
            buffer_header(),
            data_row(&["X", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
        ];
        let mut orchestrator = orchestrator(rows, store, log.clone(), false);
        let summary = orchestrator.run_once().await.expect("pass");

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(summary.skipped, 0);

        // Publish strictly precedes the status update.
        assert_eq!(
            log.events(),
            vec!["publish:x:hello".to_string(), "status:1:Sent".to_string()]
        );

        // The flushed store carries exactly the schedule fingerprint.
        let reloaded = FingerprintStore::load(&store_path).await;
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&fingerprint("hello", "2026-02-03T15:00:00Z")));
    }

    #[tokio::test]
    async fn second_pass_suppresses_the_duplicate_without_publishing() {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("sent-hashes.json");
        let rows = vec![
            buffer_header(),
            data_row(&["X", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
        ];

        let store = FingerprintStore::load(&store_path).await;
        let first_log = EventLog::default();
        let mut first = orchestrator(rows.clone(), store, first_log, false);
        first.run_once().await.expect("first pass");

        // A later pass sees the same row still marked Ready.
        let store = FingerprintStore::load(&store_path).await;
        let log = EventLog::default();
        let mut second = orchestrator(rows, store, log.clone(), false);
        let summary = second.run_once().await.expect("second pass");

        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.sent, 0);
        // Status converges to Sent but the publisher is never invoked.
        assert_eq!(log.events(), vec!["status:1:Sent".to_string()]);
    }

    #[tokio::test]
    async fn publish_failure_leaves_the_row_ready_for_retry() {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("sent-hashes.json");
        let store = FingerprintStore::load(&store_path).await;
        let log = EventLog::default();

        let rows = vec![
            buffer_header(),
            data_row(&["X", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
        ];
        let mut orchestrator = orchestrator(rows, store, log.clone(), true);
        let summary = orchestrator.run_once().await.expect("pass");

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.sent, 0);
        // No fingerprint, no status change.
        assert!(log.events().is_empty());
        let reloaded = FingerprintStore::load(&store_path).await;
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn aborted_pass_still_flushes_published_fingerprints() {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("sent-hashes.json");
        let store = FingerprintStore::load(&store_path).await;
        let log = EventLog::default();

        let rows = vec![
            buffer_header(),
            data_row(&["X", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
            data_row(&["X", "never reached", "", "2026-02-03", "10:00", "Ready", ""]),
        ];
        let mut orchestrator = SyncOrchestrator::new(
            Box::new(MockSource { rows }),
            Box::new(FailingSink),
            Box::new(MockPublisher {
                log: log.clone(),
                fail: false,
            }),
            ColumnMap::with_media(),
            store,
            Duration::from_millis(1),
        );

        // The status write after the first publish aborts the pass.
        assert!(orchestrator.run_once().await.is_err());
        assert_eq!(log.events(), vec!["publish:x:hello".to_string()]);

        // The published row's fingerprint survives the abort, so the next
        // pass suppresses it instead of posting twice.
        let reloaded = FingerprintStore::load(&store_path).await;
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&fingerprint("hello", "2026-02-03T15:00:00Z")));
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_and_the_pass_continues() {
        let dir = tempdir().expect("tempdir");
        let store = FingerprintStore::load(dir.path().join("sent-hashes.json")).await;
        let log = EventLog::default();

        let rows = vec![
            buffer_header(),
            data_row(&["X", "bad date", "", "2026/02/03", "09:00", "Ready", ""]),
            data_row(&["X", "good", "", "2026-02-03", "09:00", "Ready", ""]),
            data_row(&["mastodon", "draft", "", "2026-02-03", "09:00", "Draft", ""]),
        ];
        let mut orchestrator = orchestrator(rows, store, log.clone(), false);
        let summary = orchestrator.run_once().await.expect("pass");

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(
            log.events(),
            vec!["publish:x:good".to_string(), "status:2:Sent".to_string()]
        );
    }

    #[tokio::test]
    async fn rows_are_submitted_in_sheet_order() {
        let dir = tempdir().expect("tempdir");
        let store = FingerprintStore::load(dir.path().join("sent-hashes.json")).await;
        let log = EventLog::default();

        // Later schedule listed first; sheet order must win.
        let rows = vec![
            buffer_header(),
            data_row(&["X", "second-scheduled", "", "2026-03-01", "09:00", "Ready", ""]),
            data_row(&["X", "first-scheduled", "", "2026-02-03", "09:00", "Ready", ""]),
        ];
        let mut orchestrator = orchestrator(rows, store, log.clone(), false);
        orchestrator.run_once().await.expect("pass");

        let publishes: Vec<String> = log
            .events()
            .into_iter()
            .filter(|event| event.starts_with("publish:"))
            .collect();
        assert_eq!(
            publishes,
            vec![
                "publish:x:second-scheduled".to_string(),
                "publish:x:first-scheduled".to_string(),
            ]
        );
    }

    // -- archival sweep -----------------------------------------------------

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
    }

    fn compact_rows() -> Vec<Vec<String>> {
        vec![
            data_row(&["Platform", "Content", "Date", "Time", "Status", "Notes"]),
            data_row(&["X", "sent long ago", "2026-03-01", "09:00", "Sent", ""]),
            data_row(&["X", "skipped", "2026-03-01", "09:00", "Skip", ""]),
            data_row(&["X", "stale draft", "2026-01-01", "09:00", "Draft", ""]),
            data_row(&["X", "future ready", "2026-03-01", "09:00", "Ready", ""]),
            data_row(&["", "", "", "", "", ""]),
            data_row(&["X", "undated", "not-a-date", "09:00", "Ready", ""]),
        ]
    }

    #[test]
    fn partition_is_total_and_disjoint() {
        let rows = compact_rows();
        let parts = partition(&rows, today(), &ColumnMap::compact());

        // kept + archived (minus dropped blank) covers all data rows.
        assert_eq!(parts.kept.len() - 1 + parts.archived.len(), rows.len() - 2);
        for row in &parts.archived {
            assert!(!parts.kept.contains(row));
        }
        assert_eq!(parts.kept[0][0], "Platform");
    }

    #[test]
    fn sent_and_skip_archive_regardless_of_date() {
        let parts = partition(&compact_rows(), today(), &ColumnMap::compact());
        let archived: Vec<&str> = parts.archived.iter().map(|r| r[1].as_str()).collect();
        assert!(archived.contains(&"sent long ago"));
        assert!(archived.contains(&"skipped"));
    }

    #[test]
    fn past_date_archives_even_when_not_sent() {
        let parts = partition(&compact_rows(), today(), &ColumnMap::compact());
        let archived: Vec<&str> = parts.archived.iter().map(|r| r[1].as_str()).collect();
        assert!(archived.contains(&"stale draft"));
    }

    #[test]
    fn future_ready_rows_stay_active() {
        let parts = partition(&compact_rows(), today(), &ColumnMap::compact());
        let kept: Vec<&str> = parts.kept.iter().skip(1).map(|r| r[1].as_str()).collect();
        assert!(kept.contains(&"future ready"));
        // An unparseable date never triggers the past-date rule.
        assert!(kept.contains(&"undated"));
    }

    #[test]
    fn same_day_rows_are_not_archived() {
        let rows = vec![
            data_row(&["Platform", "Content", "Date", "Time", "Status", "Notes"]),
            data_row(&["X", "later today", "2026-2-10", "23:00", "Ready", ""]),
        ];
        let parts = partition(&rows, today(), &ColumnMap::compact());
        assert!(parts.archived.is_empty());
        assert_eq!(parts.kept.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_appends_clears_and_rewrites_in_order() {
        let log = EventLog::default();
        let source = MockSource {
            rows: compact_rows(),
        };
        let sink = RecordingSink { log: log.clone() };

        let summary = run_cleanup(&source, &sink, &ColumnMap::compact(), today())
            .await
            .expect("cleanup");

        assert_eq!(summary.archived, 3);
        assert_eq!(summary.kept, 2);
        assert_eq!(
            log.events(),
            vec![
                "ensure".to_string(),
                "append:3".to_string(),
                "clear".to_string(),
                "replace:3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn cleanup_with_nothing_archivable_writes_nothing() {
        let log = EventLog::default();
        let source = MockSource {
            rows: vec![
                data_row(&["Platform", "Content", "Date", "Time", "Status", "Notes"]),
                data_row(&["X", "future ready", "2026-03-01", "09:00", "Ready", ""]),
            ],
        };
        let sink = RecordingSink { log: log.clone() };

        let summary = run_cleanup(&source, &sink, &ColumnMap::compact(), today())
            .await
            .expect("cleanup");

        assert_eq!(summary.archived, 0);
        assert!(log.events().is_empty());
    }

    // -- configuration ------------------------------------------------------

    #[test]
    fn registry_yaml_round_trips() {
        let text = r#"
integrations:
  - integration_id: main-buffer
    kind: buffer
    enabled: true
  - integration_id: alt-typefully
    kind: typefully
    enabled: false
    notes: paused while the account migrates
"#;
        let registry: IntegrationRegistry = serde_yaml::from_str(text).expect("parse");
        assert_eq!(registry.integrations.len(), 2);
        assert_eq!(registry.integrations[0].kind, IntegrationKind::Buffer);
        assert!(registry.integrations[0].enabled);
        assert!(!registry.integrations[1].enabled);
    }

    #[test]
    fn integration_kind_parses_case_insensitively() {
        assert_eq!(
            "Buffer".parse::<IntegrationKind>().unwrap(),
            IntegrationKind::Buffer
        );
        assert_eq!(
            "TYPEFULLY".parse::<IntegrationKind>().unwrap(),
            IntegrationKind::Typefully
        );
        assert!("hootsuite".parse::<IntegrationKind>().is_err());
    }

    #[test]
    fn throttle_is_always_positive() {
        let mut config = SyncConfig::from_env();
        config.throttle_ms = 0;
        assert!(config.throttle() >= Duration::from_millis(1));
    }

    #[test]
    fn integration_layouts_differ_in_media_column() {
        assert!(IntegrationKind::Buffer.column_map().media_url.is_some());
        assert!(IntegrationKind::Typefully.column_map().media_url.is_none());
        assert_eq!(IntegrationKind::Buffer.column_map().status, 5);
        assert_eq!(IntegrationKind::Typefully.column_map().status, 4);
    }

    #[tokio::test]
    async fn unknown_platform_text_skips_instead_of_submitting() {
        let (_dir, store) = empty_store().await;
        let row = ColumnMap::with_media().row_from_cells(
            1,
            &data_row(&["myspace", "hello", "", "2026-02-03", "09:00", "Ready", ""]),
        );
        assert_eq!(row.platform, None::<Platform>);
        assert_eq!(
            classify(&row, &store),
            Action::Skip {
                reason: SkipReason::UnknownPlatform
            }
        );
    }
}
