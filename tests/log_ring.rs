//! Log ring behavior through the public API
//!
//! The ring is process-global, so the assertions run in a single test to
//! keep them ordered.

use revsocks::logging::{
    self, get_log, LogEntry, LogLevel, MAX_LOG_ENTRIES,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn ring_filtering_eviction_callback_and_format() {
    logging::clear();
    logging::set_min_level(LogLevel::Debug);

    // Timestamp shape: 23 chars with fixed separators
    logging::log(LogLevel::Info, "timestamp probe");
    let entries = logging::snapshot();
    let ts = entries.last().unwrap().timestamp.as_bytes();
    assert_eq!(ts.len(), 23);
    for (pos, ch) in [(4, b'-'), (7, b'-'), (10, b' '), (13, b':'), (16, b':'), (19, b'.')] {
        assert_eq!(ts[pos], ch, "separator at offset {}", pos);
    }

    // Formatted output: "<ts> [LEVEL] message\n", oldest first
    logging::clear();
    logging::log(LogLevel::Warn, "first");
    logging::log(LogLevel::Error, "second");
    let text = get_log();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[WARN ] first"));
    assert!(lines[1].ends_with("[ERROR] second"));

    // Below-minimum entries are neither stored nor reported
    logging::clear();
    logging::set_min_level(LogLevel::Warn);
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    logging::set_callback(move |_: &LogEntry| {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    logging::log(LogLevel::Debug, "invisible");
    logging::log(LogLevel::Info, "invisible");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(logging::snapshot().is_empty());

    // At-or-above-minimum entries hit both the ring and the callback
    logging::log(LogLevel::Warn, "visible");
    logging::log(LogLevel::Error, "visible");
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(logging::snapshot().len(), 2);
    logging::clear_callback();

    // FIFO eviction keeps the newest MAX_LOG_ENTRIES
    logging::clear();
    logging::set_min_level(LogLevel::Debug);
    for i in 0..(MAX_LOG_ENTRIES + 25) {
        logging::log(LogLevel::Info, &format!("entry {}", i));
    }
    let entries = logging::snapshot();
    assert_eq!(entries.len(), MAX_LOG_ENTRIES);
    assert_eq!(entries[0].message, "entry 25");
    assert_eq!(
        entries.last().unwrap().message,
        format!("entry {}", MAX_LOG_ENTRIES + 24)
    );
}
