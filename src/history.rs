//! Call history cache
//!
//! Paginated retrieval and local accumulation of historical call records from
//! the telephony platform. Fetching degrades gracefully through an ordered
//! list of request strategies and, when every real strategy fails, falls back
//! to a small set of synthetic placeholder records so this non-critical
//! feature never surfaces a hard error. Synthetic data is clearly marked as
//! degraded so the operator can tell it apart from real records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call::CallDirection;
use crate::error::{ClientError, ClientResult};
use crate::events::{NoticeBoard, NoticeSeverity, Notifier};
use crate::provider::{
    AccessTokenSource, CallLogQuery, Clock, RawCallLogPage, RawCallLogRecord, TelephonyApi,
};

/// Where a history record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistorySource {
    /// Fetched from the telephony platform
    Platform,
    /// Synthetic placeholder substituted when every fetch strategy failed
    Synthetic,
}

/// An immutable, normalized past-call entry
#[derive(Debug, Clone)]
pub struct CallHistoryRecord {
    /// Record identifier
    pub id: String,
    /// Platform session identifier, when reported
    pub session_id: Option<String>,
    /// When the call started
    pub start_time: DateTime<Utc>,
    /// Call duration in seconds
    pub duration_secs: u64,
    /// Direction of the call
    pub direction: CallDirection,
    /// Outcome code, e.g. "Completed", "Missed", "Voicemail"
    pub result: String,
    /// Far-end number for inbound, near-end for outbound
    pub from_number: String,
    /// Display name of the `from` endpoint
    pub from_name: Option<String>,
    /// Location of the `from` endpoint
    pub from_location: Option<String>,
    /// Dialed number
    pub to_number: String,
    /// Display name of the `to` endpoint
    pub to_name: Option<String>,
    /// Location of the `to` endpoint
    pub to_location: Option<String>,
    /// Transport medium, e.g. "VoIP", "PSTN"
    pub transport: String,
    /// Recording descriptor, when the call was recorded
    pub recording_id: Option<String>,
    /// Billing cost, when reported
    pub cost: Option<f64>,
    /// Whether this record is real or synthetic
    pub source: HistorySource,
}

impl CallHistoryRecord {
    /// Whether this record represents a missed inbound call
    pub fn is_missed(&self) -> bool {
        self.direction == CallDirection::Inbound && self.result.eq_ignore_ascii_case("missed")
    }
}

/// Aggregate counts over the accumulated history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub total: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub missed: usize,
    pub with_recording: usize,
}

/// Configuration for the history cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Records per page
    pub page_size: u32,
    /// Bounded lookback window in days
    pub lookback_days: i64,
    /// Delay before the post-call refresh, giving provider-side indexing
    /// time to catch up
    pub post_call_refresh_delay_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            lookback_days: 30,
            post_call_refresh_delay_ms: 3000,
        }
    }
}

/// Named request strategies, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryStrategy {
    /// Detailed call-log view with the full parameter set
    DetailedLog,
    /// Reduced call-log view used when the detailed request fails
    SimpleLog,
}

impl HistoryStrategy {
    const ALL: [HistoryStrategy; 2] = [HistoryStrategy::DetailedLog, HistoryStrategy::SimpleLog];

    fn name(&self) -> &'static str {
        match self {
            HistoryStrategy::DetailedLog => "detailed_log",
            HistoryStrategy::SimpleLog => "simple_log",
        }
    }

    fn detailed(&self) -> bool {
        matches!(self, HistoryStrategy::DetailedLog)
    }
}

/// Paginated, strategy-backed call history store
pub struct CallHistoryCache {
    api: Arc<dyn TelephonyApi>,
    tokens: Arc<dyn AccessTokenSource>,
    clock: Arc<dyn Clock>,
    notifier: Arc<Notifier>,
    notices: Arc<NoticeBoard>,
    config: HistoryConfig,
    records: RwLock<Vec<CallHistoryRecord>>,
    next_page: Mutex<u32>,
    has_more: AtomicBool,
    degraded: AtomicBool,
    loading: AtomicBool,
}

impl CallHistoryCache {
    /// Create an empty cache
    pub fn new(
        api: Arc<dyn TelephonyApi>,
        tokens: Arc<dyn AccessTokenSource>,
        clock: Arc<dyn Clock>,
        notifier: Arc<Notifier>,
        notices: Arc<NoticeBoard>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            api,
            tokens,
            clock,
            notifier,
            notices,
            config,
            records: RwLock::new(Vec::new()),
            next_page: Mutex::new(1),
            has_more: AtomicBool::new(true),
            degraded: AtomicBool::new(false),
            loading: AtomicBool::new(false),
        }
    }

    /// Load one page of history
    ///
    /// A no-op while another load is in flight. With `reset`, accumulated
    /// records are discarded and pagination restarts from page 1. Always
    /// resolves: when every real strategy fails the cache degrades to
    /// synthetic placeholder records instead of erroring.
    pub async fn load(&self, reset: bool) -> ClientResult<()> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("history load already in flight, ignoring");
            return Ok(());
        }

        self.load_page(reset).await;

        self.loading.store(false, Ordering::SeqCst);
        self.notifier.notify();
        Ok(())
    }

    /// Fetch the next page; a no-op when exhausted or already loading
    pub async fn load_more(&self) -> ClientResult<()> {
        if !self.has_more.load(Ordering::SeqCst) || self.loading.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.load(false).await
    }

    /// Discard accumulated records and reload from page 1
    pub async fn refresh(&self) -> ClientResult<()> {
        self.load(true).await
    }

    async fn load_page(&self, reset: bool) {
        let page = if reset {
            self.has_more.store(true, Ordering::SeqCst);
            1
        } else {
            if !self.has_more.load(Ordering::SeqCst) {
                debug!("history pagination exhausted, nothing to load");
                return;
            }
            *self.next_page.lock().unwrap()
        };

        let fetched = self.try_strategies(page).await;

        match fetched {
            Some(raw) => {
                let now = self.clock.now();
                let normalized: Vec<CallHistoryRecord> = raw
                    .records
                    .iter()
                    .map(|record| normalize_record(record, now))
                    .collect();
                let fetched_count = normalized.len();

                {
                    let mut records = self.records.write().unwrap();
                    if reset {
                        records.clear();
                    }
                    records.extend(normalized);
                }

                let has_more = page_has_more(&raw, page, self.config.page_size, fetched_count);
                self.has_more.store(has_more, Ordering::SeqCst);
                self.degraded.store(false, Ordering::SeqCst);
                *self.next_page.lock().unwrap() = page + 1;

                info!(page, fetched = fetched_count, has_more, "call history page loaded");
            }
            None => {
                // Every real strategy failed: degrade to demo data rather
                // than surfacing a hard error for this non-critical feature
                let synthetic = synthetic_records(self.clock.now());
                {
                    let mut records = self.records.write().unwrap();
                    records.clear();
                    records.extend(synthetic);
                }
                self.has_more.store(false, Ordering::SeqCst);
                *self.next_page.lock().unwrap() = 1;

                if !self.degraded.swap(true, Ordering::SeqCst) {
                    self.notices.push(
                        NoticeSeverity::Warning,
                        "Call history is unavailable; showing demo data",
                        self.clock.now(),
                    );
                }
                warn!("all call history strategies failed, showing synthetic records");
            }
        }
    }

    async fn try_strategies(&self, page: u32) -> Option<RawCallLogPage> {
        let Some(token) = self.tokens.access_token() else {
            warn!("no access token available for call history fetch");
            return None;
        };
        let date_from = self.clock.now() - Duration::days(self.config.lookback_days);

        for strategy in HistoryStrategy::ALL {
            let query = CallLogQuery {
                page,
                per_page: self.config.page_size,
                date_from,
                detailed: strategy.detailed(),
            };
            match self.api.fetch_call_log(&token, &query).await {
                Ok(raw) => {
                    debug!(strategy = strategy.name(), page, "call log strategy succeeded");
                    return Some(raw);
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        page,
                        error = %e,
                        "call log strategy failed, trying next"
                    );
                }
            }
        }
        None
    }

    /// Accumulated records, newest-known-first per page ordering
    pub fn records(&self) -> Vec<CallHistoryRecord> {
        self.records.read().unwrap().clone()
    }

    /// Whether more pages remain
    pub fn has_more(&self) -> bool {
        self.has_more.load(Ordering::SeqCst)
    }

    /// Whether the cache currently holds synthetic fallback data
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Whether a load is currently in flight
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Records involving the given participant number, in either direction
    ///
    /// Matching is tolerant of formatting differences: both sides are reduced
    /// to their digit strings and match when either contains the other.
    pub fn records_for_number(&self, number: &str) -> Vec<CallHistoryRecord> {
        let needle = normalize_digits(number);
        if needle.is_empty() {
            return Vec::new();
        }
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|record| {
                digits_match(&needle, &record.from_number) || digits_match(&needle, &record.to_number)
            })
            .cloned()
            .collect()
    }

    /// Aggregate counts over the accumulated records
    pub fn stats(&self) -> HistoryStats {
        let records = self.records.read().unwrap();
        let mut stats = HistoryStats {
            total: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            match record.direction {
                CallDirection::Inbound => stats.inbound += 1,
                CallDirection::Outbound => stats.outbound += 1,
            }
            if record.is_missed() {
                stats.missed += 1;
            }
            if record.recording_id.is_some() {
                stats.with_recording += 1;
            }
        }
        stats
    }

    /// Fetch recording content for a history record
    pub async fn download_recording(&self, recording_id: &str) -> ClientResult<Vec<u8>> {
        let token = self.tokens.access_token().ok_or(ClientError::NotLoggedIn)?;
        self.api
            .fetch_recording(&token, recording_id)
            .await
            .map_err(|e| {
                warn!(recording_id, error = %e, "recording download failed");
                ClientError::RecordingUnavailable {
                    recording_id: recording_id.to_string(),
                }
            })
    }

    /// Drop all accumulated state (used on logout)
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
        *self.next_page.lock().unwrap() = 1;
        self.has_more.store(true, Ordering::SeqCst);
        self.degraded.store(false, Ordering::SeqCst);
        self.notifier.notify();
    }
}

impl std::fmt::Debug for CallHistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHistoryCache")
            .field("records", &self.records.read().unwrap().len())
            .field("has_more", &self.has_more())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Reduce a number to its digit string
fn normalize_digits(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn digits_match(needle: &str, candidate: &str) -> bool {
    let candidate = normalize_digits(candidate);
    if candidate.is_empty() {
        return false;
    }
    candidate.contains(needle) || needle.contains(&candidate)
}

/// Map a raw provider record into the canonical shape, defaulting explicitly
fn normalize_record(raw: &RawCallLogRecord, now: DateTime<Utc>) -> CallHistoryRecord {
    let from = raw.from.clone().unwrap_or_default();
    let to = raw.to.clone().unwrap_or_default();
    CallHistoryRecord {
        id: raw
            .id
            .clone()
            .unwrap_or_else(|| format!("log-{}", Uuid::new_v4())),
        session_id: raw.session_id.clone(),
        start_time: raw.start_time.unwrap_or(now),
        duration_secs: raw.duration.unwrap_or(0),
        direction: match raw.direction.as_deref() {
            Some(direction) if direction.eq_ignore_ascii_case("inbound") => CallDirection::Inbound,
            _ => CallDirection::Outbound,
        },
        result: raw.result.clone().unwrap_or_else(|| "Unknown".to_string()),
        from_number: from
            .phone_number
            .or(from.extension_number)
            .unwrap_or_default(),
        from_name: from.name,
        from_location: from.location,
        to_number: to.phone_number.or(to.extension_number).unwrap_or_default(),
        to_name: to.name,
        to_location: to.location,
        transport: raw.transport.clone().unwrap_or_else(|| "VoIP".to_string()),
        recording_id: raw.recording.as_ref().map(|r| r.id.clone()),
        cost: raw
            .billing
            .as_ref()
            .and_then(|b| b.cost_purchased.or(b.cost_included)),
        source: HistorySource::Platform,
    }
}

/// Placeholder records substituted when every real strategy fails
fn synthetic_records(now: DateTime<Utc>) -> Vec<CallHistoryRecord> {
    let demo = |id: &str,
                minutes_ago: i64,
                direction: CallDirection,
                result: &str,
                duration_secs: u64,
                recording: bool| CallHistoryRecord {
        id: id.to_string(),
        session_id: None,
        start_time: now - Duration::minutes(minutes_ago),
        duration_secs,
        direction,
        result: result.to_string(),
        from_number: "+15550100".to_string(),
        from_name: Some("Demo Caller".to_string()),
        from_location: None,
        to_number: "+15550199".to_string(),
        to_name: Some("Demo Extension".to_string()),
        to_location: None,
        transport: "Demo".to_string(),
        recording_id: recording.then(|| format!("demo-rec-{}", id)),
        cost: None,
        source: HistorySource::Synthetic,
    };
    vec![
        demo("demo-1", 30, CallDirection::Inbound, "Completed", 125, true),
        demo("demo-2", 120, CallDirection::Outbound, "Completed", 48, false),
        demo("demo-3", 300, CallDirection::Inbound, "Missed", 0, false),
    ]
}

fn page_has_more(raw: &RawCallLogPage, page: u32, requested_per_page: u32, fetched: usize) -> bool {
    if let Some(paging) = &raw.paging {
        if let (Some(page), Some(per_page), Some(total)) =
            (paging.page, paging.per_page, paging.total_elements)
        {
            return u64::from(page) * u64::from(per_page) < total;
        }
    }
    // No paging arithmetic reported: assume another page while full pages
    // keep coming back
    fetched as u32 == requested_per_page
}
