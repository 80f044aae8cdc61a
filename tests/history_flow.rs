//! Integration tests for call history through the composed store

mod common;

use std::sync::atomic::Ordering;

use common::{build_phone, default_page, raw_record};
use webphone_core::provider::{RawCallLogPage, RawPaging};
use webphone_core::HistorySource;

#[tokio::test]
async fn history_loads_and_paginates() {
    let h = build_phone(|config| {
        config.history.page_size = 2;
    });
    {
        let mut pages = h.api.call_log_pages.lock().unwrap();
        *pages = vec![
            RawCallLogPage {
                records: vec![
                    raw_record("r1", "Inbound", "Completed", "+15550101", "+15550199"),
                    raw_record("r2", "Outbound", "Completed", "+15550199", "+15550102"),
                ],
                paging: Some(RawPaging {
                    page: Some(1),
                    per_page: Some(2),
                    total_elements: Some(3),
                }),
            },
            RawCallLogPage {
                records: vec![raw_record(
                    "r3",
                    "Inbound",
                    "Missed",
                    "+15550103",
                    "+15550199",
                )],
                paging: Some(RawPaging {
                    page: Some(2),
                    per_page: Some(2),
                    total_elements: Some(3),
                }),
            },
        ];
    }
    h.phone.connect().await.unwrap();

    h.phone.load_call_history(true).await.unwrap();
    assert_eq!(h.phone.call_history().len(), 2);
    assert!(h.phone.call_history_has_more());
    assert!(!h.phone.call_history_degraded());

    h.phone.load_more_call_history().await.unwrap();
    assert_eq!(h.phone.call_history().len(), 3);
    assert!(!h.phone.call_history_has_more());

    // Reset replaces the accumulated sequence with exactly the first page
    h.phone.load_call_history(true).await.unwrap();
    assert_eq!(h.phone.call_history().len(), 2);
    assert!(h.phone.call_history_has_more());

    let stats = h.phone.call_stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.inbound, 1);
    assert_eq!(stats.outbound, 1);
}

#[tokio::test]
async fn history_filter_matches_number_formatting() {
    let h = build_phone(|_| {});
    h.phone.connect().await.unwrap();
    h.phone.refresh_call_history().await.unwrap();

    let matched = h.phone.call_history_for_number("(555) 0101");
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, "r1");

    assert!(h.phone.call_history_for_number("+4912345").is_empty());
}

#[tokio::test]
async fn history_degrades_to_demo_data_without_erroring() {
    let h = build_phone(|_| {});
    h.phone.connect().await.unwrap();
    h.api.fail_call_log.store(true, Ordering::SeqCst);

    // Resolves despite every strategy failing
    h.phone.load_call_history(true).await.unwrap();

    assert!(h.phone.call_history_degraded());
    assert!(!h.phone.call_history_has_more());
    let records = h.phone.call_history();
    assert!(!records.is_empty());
    assert!(records
        .iter()
        .all(|record| record.source == HistorySource::Synthetic));

    // Both strategies were attempted before degrading
    assert!(h.api.call_log_fetches.load(Ordering::SeqCst) >= 2);

    // A real fetch clears the degraded flag again
    h.api.fail_call_log.store(false, Ordering::SeqCst);
    h.phone.refresh_call_history().await.unwrap();
    assert!(!h.phone.call_history_degraded());
    let ids: Vec<String> = h.phone.call_history().iter().map(|r| r.id.clone()).collect();
    let expected: Vec<String> = default_page()
        .records
        .iter()
        .filter_map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn recording_download_round_trip() {
    let h = build_phone(|_| {});
    h.phone.connect().await.unwrap();

    let bytes = h.phone.download_recording("rec-1").await.unwrap();
    assert!(!bytes.is_empty());
}
