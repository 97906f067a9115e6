//! External collaborator contracts: spreadsheet row source/sink,
//! publishing APIs, and credential lookup.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use queuecast_core::{Platform, ResolvedSchedule};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "queuecast-adapters";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required credential {0}")]
    MissingCredential(String),
}

/// Supplies opaque credential material for collaborator construction.
/// The core never inspects credential contents.
pub trait CredentialSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingCredential(key.to_string()))
    }
}

/// Reads credentials from process environment variables. Empty values
/// count as missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

/// Ordered row fetch; the first row is the header.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self) -> anyhow::Result<Vec<Vec<String>>>;
}

/// Writes back to the queue: status cells on the active sheet, appended
/// rows on the archive sheet, and whole-range rewrites for the sweep.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn update_status(&self, sheet_index: usize, status: &str) -> anyhow::Result<()>;
    async fn append_rows(&self, rows: &[Vec<String>]) -> anyhow::Result<()>;
    async fn replace_all(&self, rows: &[Vec<String>]) -> anyhow::Result<()>;
    async fn clear_range(&self) -> anyhow::Result<()>;

    /// Provision the archive destination if it does not exist yet. Sinks
    /// whose destinations always exist can keep the no-op default.
    async fn ensure_archive(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{service} api error {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no {service} destination for platform {platform}")]
    NoDestination {
        service: &'static str,
        platform: &'static str,
    },
    #[error("no {0} account connected")]
    NoAccount(&'static str),
}

/// One post handed to a publishing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub content: String,
    pub schedule: ResolvedSchedule,
    pub platform: Platform,
    pub media_url: Option<String>,
}

/// External collaborator that actually delivers a post to a social
/// platform's scheduling queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn service_name(&self) -> &'static str;
    async fn submit(&self, request: &SubmitRequest) -> Result<(), PublishError>;
}

fn build_http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .gzip(true)
        .timeout(std::time::Duration::from_secs(20))
        .build()
        .context("building reqwest client")
}

async fn error_for_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PublishError::Http {
        service,
        status: status.as_u16(),
        body,
    })
}

// ---------------------------------------------------------------------------
// Google Sheets values API
// ---------------------------------------------------------------------------

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Narrow client over the Sheets values endpoints. Authentication is an
/// opaque bearer token from the credential source; this client never
/// mints or refreshes it.
#[derive(Debug, Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    access_token: String,
    spreadsheet_id: String,
    active_sheet: String,
    archive_sheet: String,
    column_range: String,
    status_column: usize,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// A1 letter for a 0-based column index. The queue never grows past
/// column Z.
pub fn column_letter(index: usize) -> char {
    debug_assert!(index < 26);
    (b'A' + index as u8) as char
}

impl SheetsClient {
    pub fn new(
        access_token: String,
        spreadsheet_id: String,
        active_sheet: String,
        archive_sheet: String,
        column_range: String,
        status_column: usize,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            access_token,
            spreadsheet_id,
            active_sheet,
            archive_sheet,
            column_range,
            status_column,
        })
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{SHEETS_BASE_URL}/{}/values/{}{}",
            self.spreadsheet_id, range, suffix
        )
    }
}

#[async_trait]
impl RowSource for SheetsClient {
    async fn fetch_rows(&self) -> anyhow::Result<Vec<Vec<String>>> {
        let range = format!("{}!{}", self.active_sheet, self.column_range);
        let url = self.values_url(&range, "");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("fetching rows from {range}"))?
            .error_for_status()
            .with_context(|| format!("fetching rows from {range}"))?;
        let value_range: ValueRange = response
            .json()
            .await
            .with_context(|| format!("decoding value range {range}"))?;
        debug!(rows = value_range.values.len(), %range, "fetched sheet rows");
        Ok(value_range.values)
    }
}

#[async_trait]
impl RowSink for SheetsClient {
    async fn update_status(&self, sheet_index: usize, status: &str) -> anyhow::Result<()> {
        // sheet_index is 0-based over the fetched range; A1 rows are 1-based.
        let cell = format!(
            "{}!{}{}",
            self.active_sheet,
            column_letter(self.status_column),
            sheet_index + 1
        );
        let url = self.values_url(&cell, "?valueInputOption=RAW");
        self.http
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": [[status]] }))
            .send()
            .await
            .with_context(|| format!("updating status cell {cell}"))?
            .error_for_status()
            .with_context(|| format!("updating status cell {cell}"))?;
        Ok(())
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> anyhow::Result<()> {
        let range = format!("{}!{}", self.archive_sheet, self.column_range);
        let url = self.values_url(&range, ":append?valueInputOption=RAW");
        self.http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .with_context(|| format!("appending rows to {range}"))?
            .error_for_status()
            .with_context(|| format!("appending rows to {range}"))?;
        Ok(())
    }

    async fn replace_all(&self, rows: &[Vec<String>]) -> anyhow::Result<()> {
        let range = format!("{}!A1", self.active_sheet);
        let url = self.values_url(&range, "?valueInputOption=RAW");
        self.http
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .with_context(|| format!("rewriting rows at {range}"))?
            .error_for_status()
            .with_context(|| format!("rewriting rows at {range}"))?;
        Ok(())
    }

    async fn clear_range(&self) -> anyhow::Result<()> {
        let range = format!("{}!{}", self.active_sheet, self.column_range);
        let url = self.values_url(&range, ":clear");
        self.http
            .post(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("clearing range {range}"))?
            .error_for_status()
            .with_context(|| format!("clearing range {range}"))?;
        Ok(())
    }

    async fn ensure_archive(&self) -> anyhow::Result<()> {
        let url = format!(
            "{SHEETS_BASE_URL}/{}?fields=sheets.properties.title",
            self.spreadsheet_id
        );
        let metadata: SpreadsheetMetadata = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("fetching spreadsheet metadata")?
            .error_for_status()
            .context("fetching spreadsheet metadata")?
            .json()
            .await
            .context("decoding spreadsheet metadata")?;
        if metadata
            .sheets
            .iter()
            .any(|sheet| sheet.properties.title == self.archive_sheet)
        {
            return Ok(());
        }

        let url = format!("{SHEETS_BASE_URL}/{}:batchUpdate", self.spreadsheet_id);
        self.http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "requests": [
                    { "addSheet": { "properties": { "title": self.archive_sheet } } }
                ]
            }))
            .send()
            .await
            .with_context(|| format!("creating archive sheet {}", self.archive_sheet))?
            .error_for_status()
            .with_context(|| format!("creating archive sheet {}", self.archive_sheet))?;
        debug!(sheet = %self.archive_sheet, "created missing archive sheet");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

const BUFFER_BASE_URL: &str = "https://api.bufferapp.com/1";

/// Buffer profile service name for a queue platform.
pub fn buffer_service(platform: Platform) -> &'static str {
    match platform {
        Platform::X => "twitter",
        other => other.as_str(),
    }
}

#[derive(Debug, Deserialize)]
struct BufferProfile {
    id: String,
    service: String,
}

/// Schedules posts through the Buffer updates API. Profile IDs are
/// discovered once at construction and grouped by service, or supplied
/// explicitly to bypass discovery.
#[derive(Debug)]
pub struct BufferPublisher {
    http: reqwest::Client,
    access_token: String,
    profiles_by_service: HashMap<String, Vec<String>>,
    manual_profile_ids: Option<Vec<String>>,
}

/// Form parameters for an update, minus the per-profile IDs.
pub fn buffer_update_params(request: &SubmitRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("text".to_string(), request.content.clone()),
        (
            "scheduled_at".to_string(),
            request.schedule.unix_seconds().to_string(),
        ),
    ];
    if let Some(media_url) = &request.media_url {
        params.push(("media[link]".to_string(), media_url.clone()));
    }
    params
}

impl BufferPublisher {
    /// Connect with explicit profile IDs; no discovery round-trip.
    pub fn with_profile_ids(
        access_token: String,
        profile_ids: Vec<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            access_token,
            profiles_by_service: HashMap::new(),
            manual_profile_ids: Some(profile_ids),
        })
    }

    /// Connect and discover the account's profiles, grouped by service.
    pub async fn connect(access_token: String) -> anyhow::Result<Self> {
        let http = build_http_client()?;
        let url = format!("{BUFFER_BASE_URL}/profiles.json?access_token={access_token}");
        let response = http
            .get(&url)
            .send()
            .await
            .context("fetching buffer profiles")?;
        let response = error_for_status("buffer", response)
            .await
            .context("fetching buffer profiles")?;
        let profiles: Vec<BufferProfile> =
            response.json().await.context("decoding buffer profiles")?;

        let mut profiles_by_service: HashMap<String, Vec<String>> = HashMap::new();
        for profile in profiles {
            profiles_by_service
                .entry(profile.service.to_ascii_lowercase())
                .or_default()
                .push(profile.id);
        }
        debug!(services = profiles_by_service.len(), "discovered buffer profiles");

        Ok(Self {
            http,
            access_token,
            profiles_by_service,
            manual_profile_ids: None,
        })
    }

    /// Destination profile IDs for a platform: the manual override when
    /// configured, otherwise the discovered profiles for its service.
    pub fn profile_ids_for(&self, platform: Platform) -> Option<&[String]> {
        if let Some(manual) = &self.manual_profile_ids {
            return Some(manual);
        }
        self.profiles_by_service
            .get(buffer_service(platform))
            .map(Vec::as_slice)
            .filter(|ids| !ids.is_empty())
    }
}

#[async_trait]
impl Publisher for BufferPublisher {
    fn service_name(&self) -> &'static str {
        "buffer"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<(), PublishError> {
        let profile_ids = self
            .profile_ids_for(request.platform)
            .ok_or(PublishError::NoDestination {
                service: "buffer",
                platform: request.platform.as_str(),
            })?
            .to_vec();

        let mut params = buffer_update_params(request);
        params.push(("access_token".to_string(), self.access_token.clone()));
        for id in profile_ids {
            params.push(("profile_ids[]".to_string(), id));
        }

        let url = format!("{BUFFER_BASE_URL}/updates/create.json");
        let response = self.http.post(&url).form(&params).send().await?;
        error_for_status("buffer", response).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Typefully
// ---------------------------------------------------------------------------

const TYPEFULLY_BASE_URL: &str = "https://api.typefully.com";

#[derive(Debug, Deserialize)]
struct SocialSetsResponse {
    #[serde(default)]
    results: Vec<SocialSet>,
}

#[derive(Debug, Deserialize)]
struct SocialSet {
    id: i64,
    #[serde(default)]
    username: String,
}

/// Typefully platform key for a queue platform. Platforms Typefully does
/// not schedule fall back to X, matching the drafts API default.
pub fn typefully_platform_key(platform: Platform) -> &'static str {
    match platform {
        Platform::X => "x",
        Platform::Mastodon => "mastodon",
        Platform::Linkedin => "linkedin",
        Platform::Threads => "threads",
        Platform::Bluesky => "bluesky",
        Platform::Facebook | Platform::Instagram => "x",
    }
}

/// Request body for a scheduled draft.
pub fn typefully_draft_body(request: &SubmitRequest) -> serde_json::Value {
    let key = typefully_platform_key(request.platform);
    json!({
        "platforms": {
            key: {
                "enabled": true,
                "posts": [{ "text": request.content }],
            },
        },
        "publish_at": request.schedule.iso8601(),
    })
}

/// Schedules drafts through the Typefully social-sets API against the
/// account's primary social set.
#[derive(Debug)]
pub struct TypefullyPublisher {
    http: reqwest::Client,
    api_key: String,
    social_set_id: i64,
}

impl TypefullyPublisher {
    /// Connect and resolve the primary (first) social set.
    pub async fn connect(api_key: String) -> anyhow::Result<Self> {
        let http = build_http_client()?;
        let url = format!("{TYPEFULLY_BASE_URL}/v2/social-sets");
        let response = http
            .get(&url)
            .bearer_auth(&api_key)
            .send()
            .await
            .context("fetching typefully social sets")?;
        let response = error_for_status("typefully", response)
            .await
            .context("fetching typefully social sets")?;
        let sets: SocialSetsResponse = response
            .json()
            .await
            .context("decoding typefully social sets")?;
        let primary = sets
            .results
            .into_iter()
            .next()
            .ok_or(PublishError::NoAccount("typefully"))?;
        debug!(username = %primary.username, id = primary.id, "using typefully social set");

        Ok(Self {
            http,
            api_key,
            social_set_id: primary.id,
        })
    }
}

#[async_trait]
impl Publisher for TypefullyPublisher {
    fn service_name(&self) -> &'static str {
        "typefully"
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<(), PublishError> {
        let url = format!(
            "{TYPEFULLY_BASE_URL}/v2/social-sets/{}/drafts",
            self.social_set_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&typefully_draft_body(request))
            .send()
            .await?;
        error_for_status("typefully", response).await?;
        Ok(())
    }
}
