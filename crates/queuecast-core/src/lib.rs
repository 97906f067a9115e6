//! Core domain model and schedule resolution for Queuecast.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "queuecast-core";

/// Target networks the queue can schedule posts for. Parsed once at row
/// ingestion; downstream logic never re-inspects the raw cell text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    X,
    Mastodon,
    Linkedin,
    Threads,
    Bluesky,
    Facebook,
    Instagram,
}

impl Platform {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "x" | "twitter" => Some(Self::X),
            "mastodon" => Some(Self::Mastodon),
            "linkedin" => Some(Self::Linkedin),
            "threads" => Some(Self::Threads),
            "bluesky" => Some(Self::Bluesky),
            "facebook" => Some(Self::Facebook),
            "instagram" => Some(Self::Instagram),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Mastodon => "mastodon",
            Self::Linkedin => "linkedin",
            Self::Threads => "threads",
            Self::Bluesky => "bluesky",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
        }
    }
}

/// Workflow state of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Draft,
    Template,
    Ready,
    Sent,
    Skip,
    Queued,
}

impl Status {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "template" => Some(Self::Template),
            "ready" => Some(Self::Ready),
            "sent" => Some(Self::Sent),
            "skip" => Some(Self::Skip),
            "queued" => Some(Self::Queued),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Template => "Template",
            Self::Ready => "Ready",
            Self::Sent => "Sent",
            Self::Skip => "Skip",
            Self::Queued => "Queued",
        }
    }
}

/// Positional column layout of one spreadsheet integration. Layouts differ
/// between integrations (one omits the media column), so the mapping is
/// configuration handed to each component rather than hardcoded offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub platform: usize,
    pub content: usize,
    pub media_url: Option<usize>,
    pub date: usize,
    pub time: usize,
    pub status: usize,
    pub notes: Option<usize>,
}

impl ColumnMap {
    /// Platform, Content, MediaURL, Date, Time, Status, Notes (columns A:G).
    pub fn with_media() -> Self {
        Self {
            platform: 0,
            content: 1,
            media_url: Some(2),
            date: 3,
            time: 4,
            status: 5,
            notes: Some(6),
        }
    }

    /// Platform, Content, Date, Time, Status, Notes (no media column).
    pub fn compact() -> Self {
        Self {
            platform: 0,
            content: 1,
            media_url: None,
            date: 2,
            time: 3,
            status: 4,
            notes: Some(5),
        }
    }

    /// Minimum cell count a row must have to carry a status value.
    pub fn min_len(&self) -> usize {
        self.status + 1
    }

    fn cell<'a>(cells: &'a [String], index: usize) -> &'a str {
        cells.get(index).map(String::as_str).unwrap_or("")
    }

    /// Build a normalized [`Row`] from one fetched value-range row.
    /// Missing trailing cells read as empty strings.
    pub fn row_from_cells(&self, sheet_index: usize, cells: &[String]) -> Row {
        let raw_platform = Self::cell(cells, self.platform).trim().to_string();
        let raw_status = Self::cell(cells, self.status).trim().to_string();
        Row {
            sheet_index,
            platform: Platform::parse(&raw_platform),
            raw_platform,
            content: Self::cell(cells, self.content).to_string(),
            media_url: self.media_url.and_then(|idx| {
                let value = Self::cell(cells, idx).trim();
                if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }),
            date: Self::cell(cells, self.date).trim().to_string(),
            time: Self::cell(cells, self.time).trim().to_string(),
            status: Status::parse(&raw_status),
            raw_status,
            notes: self
                .notes
                .map(|idx| Self::cell(cells, idx).to_string())
                .unwrap_or_default(),
        }
    }
}

/// One scheduled-post record from the content queue, normalized at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// 0-based position in the fetched value range; the header is index 0.
    pub sheet_index: usize,
    pub platform: Option<Platform>,
    pub raw_platform: String,
    pub content: String,
    pub media_url: Option<String>,
    pub date: String,
    pub time: String,
    pub status: Option<Status>,
    pub raw_status: String,
    pub notes: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unparseable date {0:?}")]
    InvalidDate(String),
    #[error("unparseable time {0:?}")]
    InvalidTime(String),
}

/// Absolute instant a row is scheduled for. Both serializations derive from
/// the same UTC instant so every call site fingerprints identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSchedule {
    instant: DateTime<Utc>,
}

impl ResolvedSchedule {
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn iso8601(&self) -> String {
        self.instant.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.instant.timestamp()
    }
}

/// Parse a queue date cell: `M/D/YYYY` or `YYYY-M-D` (1-2 digit month/day).
pub fn parse_date(input: &str) -> Result<NaiveDate, ScheduleError> {
    let trimmed = input.trim();
    let invalid = || ScheduleError::InvalidDate(input.to_string());

    let (year, month, day) = if trimmed.contains('/') {
        let parts: Vec<&str> = trimmed.split('/').collect();
        let [month, day, year] = parts.as_slice() else {
            return Err(invalid());
        };
        if year.len() != 4 || month.len() > 2 || day.len() > 2 {
            return Err(invalid());
        }
        (
            parse_component(year).ok_or_else(invalid)?,
            parse_component(month).ok_or_else(invalid)?,
            parse_component(day).ok_or_else(invalid)?,
        )
    } else if trimmed.contains('-') {
        let parts: Vec<&str> = trimmed.split('-').collect();
        let [year, month, day] = parts.as_slice() else {
            return Err(invalid());
        };
        if year.len() != 4 || month.len() > 2 || day.len() > 2 {
            return Err(invalid());
        }
        (
            parse_component(year).ok_or_else(invalid)?,
            parse_component(month).ok_or_else(invalid)?,
            parse_component(day).ok_or_else(invalid)?,
        )
    } else {
        return Err(invalid());
    };

    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(invalid)
}

/// Parse a queue time cell into wall-clock (hour, minute). Accepts 24-hour
/// `H:MM[:SS]` and 12-hour `H:MM[:SS] AM|PM`; a seconds component is
/// validated but dropped, matching how the sheet templates fill the cell.
pub fn parse_time(input: &str) -> Result<(u32, u32), ScheduleError> {
    let trimmed = input.trim();
    let invalid = || ScheduleError::InvalidTime(input.to_string());

    let upper = trimmed.to_ascii_uppercase();
    let (clock_part, meridiem) = if let Some(stripped) = upper.strip_suffix("PM") {
        (stripped.trim_end(), Some(true))
    } else if let Some(stripped) = upper.strip_suffix("AM") {
        (stripped.trim_end(), Some(false))
    } else {
        (upper.as_str(), None)
    };

    let parts: Vec<&str> = clock_part.split(':').collect();
    let (hour_str, minute_str, second_str) = match parts.as_slice() {
        [h, m] => (*h, *m, None),
        [h, m, s] => (*h, *m, Some(*s)),
        _ => return Err(invalid()),
    };
    if hour_str.is_empty() || hour_str.len() > 2 || minute_str.len() != 2 {
        return Err(invalid());
    }

    let mut hour = parse_component(hour_str).ok_or_else(invalid)?;
    let minute = parse_component(minute_str).ok_or_else(invalid)?;
    if let Some(second_str) = second_str {
        if second_str.len() != 2 {
            return Err(invalid());
        }
        let second = parse_component(second_str).ok_or_else(invalid)?;
        if second > 59 {
            return Err(invalid());
        }
    }
    if minute > 59 {
        return Err(invalid());
    }

    match meridiem {
        Some(is_pm) => {
            if hour > 12 {
                return Err(invalid());
            }
            if is_pm && hour != 12 {
                hour += 12;
            }
            if !is_pm && hour == 12 {
                hour = 0;
            }
        }
        None => {
            if hour > 23 {
                return Err(invalid());
            }
        }
    }

    Ok((hour, minute))
}

fn parse_component(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// UTC offset for the queue's civil timezone. Daylight saving is
/// approximated by month: March through November uses the daylight offset.
/// Exact transition dates inside March/November are intentionally ignored;
/// the sheet owners accept the off-by-an-hour window at the edges.
fn civil_offset(month: u32) -> FixedOffset {
    let hours = if (3..=11).contains(&month) { -5 } else { -6 };
    FixedOffset::east_opt(hours * 3600).expect("offset in range")
}

/// Calendar date "today" in the queue's civil timezone. The offset is
/// picked from the UTC month; the divergence window around New Year
/// midnight is irrelevant for a date-only archive check.
pub fn civil_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&civil_offset(now.month())).date_naive()
}

/// Resolve separate date and time cells into an absolute instant.
pub fn resolve_schedule(date: &str, time: &str) -> Result<ResolvedSchedule, ScheduleError> {
    let day = parse_date(date)?;
    let (hour, minute) = parse_time(time)?;
    let naive = day
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| ScheduleError::InvalidTime(time.to_string()))?;
    let local = civil_offset(day.month())
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ScheduleError::InvalidDate(date.to_string()))?;
    Ok(ResolvedSchedule {
        instant: local.with_timezone(&Utc),
    })
}
