//! Channel-level behaviour through the public `FeedbackStore` API.

use std::fs;
use std::path::Path;

use outpost_core::ChannelName;
use outpost_eventlog::{event_types, FeedbackStore};
use tempfile::TempDir;

const MAX: u64 = 1_000_000;

fn channel_files(dir: &Path) -> Vec<(String, u64)> {
    let mut files: Vec<(String, u64)> = fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| {
            let len = e.metadata().map(|m| m.len()).unwrap_or(0);
            (e.file_name().to_string_lossy().into_owned(), len)
        })
        .filter(|(name, _)| name.starts_with("auditlog-"))
        .collect();
    files.sort_by_key(|(name, _)| {
        name.rsplit_once('.')
            .and_then(|(_, seq)| seq.parse::<u32>().ok())
            .unwrap_or(0)
    });
    files
}

fn kilobyte() -> Vec<(String, String)> {
    vec![("payload".to_string(), "x".repeat(1000))]
}

#[test]
fn channel_stays_within_budget_while_ids_keep_counting() {
    let dir = TempDir::new().expect("dir");
    let store = FeedbackStore::new(dir.path(), "dev1", MAX);
    let channel = store.channel(&ChannelName::from("auditlog")).expect("channel");

    let mut last = None;
    let mut largest_record = 0;
    for _ in 0..3_000 {
        let before = channel.total_size();
        let record = channel.write(event_types::AGENT_STARTED, kilobyte()).expect("write");
        largest_record = largest_record.max(channel.total_size().saturating_sub(before));
        last = Some(record);
    }
    let last = last.expect("records written");

    // Roughly 3 MB were written against a 1 MB budget.
    let on_disk: u64 = channel_files(dir.path()).iter().map(|(_, len)| len).sum();
    assert_eq!(on_disk, channel.total_size());
    assert!(on_disk <= MAX + largest_record, "on disk: {on_disk}");

    // Every file but the active one was rotated at about a tenth of the budget.
    let files = channel_files(dir.path());
    assert!(files.len() >= 8, "files: {files:?}");
    for (name, len) in &files[..files.len() - 1] {
        assert!(*len >= MAX / 10, "{name} rotated early at {len} bytes");
        assert!(*len < MAX / 10 + largest_record, "{name} rotated late at {len} bytes");
    }

    // One store throughout; the newest records survive, the oldest are gone.
    let store_id = last.store_id;
    assert_eq!(channel.store_ids().expect("ids"), vec![store_id]);
    assert_eq!(last.id, 3_000);
    assert_eq!(channel.highest_event_id(store_id).expect("highest"), 3_000);
    assert!(channel.get_events(store_id, 1, 1).expect("read").is_empty());
    let tail = channel.get_events(store_id, 2_990, 3_000).expect("read");
    assert_eq!(tail.len(), 11);
    assert!(tail.windows(2).all(|w| w[1].id == w[0].id + 1));
}

#[test]
fn budget_holds_after_every_single_write() {
    let dir = TempDir::new().expect("dir");
    let store = FeedbackStore::new(dir.path(), "dev1", 50_000);
    let channel = store.channel(&ChannelName::from("auditlog")).expect("channel");

    let mut over_budget_streak = 0;
    for _ in 0..500 {
        channel.write(1, kilobyte()).expect("write");
        if channel.total_size() > 50_000 {
            over_budget_streak += 1;
        } else {
            over_budget_streak = 0;
        }
        assert!(over_budget_streak <= 1, "budget exceeded for two writes in a row");
    }
}

#[test]
fn reopened_store_continues_numbering_and_reads_old_records() {
    let dir = TempDir::new().expect("dir");
    let store_id = {
        let store = FeedbackStore::new(dir.path(), "dev1", MAX);
        let channel = store.channel(&ChannelName::from("auditlog")).expect("channel");
        for _ in 0..5 {
            channel.write(event_types::INSTALLATION_STARTED, Vec::new()).expect("write");
        }
        channel.current_store_id().expect("store id")
    };

    let store = FeedbackStore::new(dir.path(), "dev1", MAX);
    let channel = store.channel(&ChannelName::from("auditlog")).expect("channel");
    assert_eq!(channel.highest_event_id(store_id).expect("highest"), 5);
    let record = channel.write(event_types::INSTALLATION_COMPLETED, Vec::new()).expect("write");
    assert_eq!((record.store_id, record.id), (store_id, 6));

    let events = channel.get_events(store_id, 1, 6).expect("read");
    assert_eq!(events.len(), 6);
    assert_eq!(events[0].event_type, event_types::INSTALLATION_STARTED);
    assert_eq!(events[0].target_id, "dev1");
}
