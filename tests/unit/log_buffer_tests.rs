use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp_relay::relay::log_buffer::{DeferredLog, LogRecord, Severity};
use tokio_util::sync::CancellationToken;

#[test]
fn drain_preserves_insertion_order() {
    let (log, mut flusher) = DeferredLog::channel();
    log.info("first");
    log.warn("second");
    log.error("third");
    log.debug("fourth");

    let records = flusher.drain();
    let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, ["first", "second", "third", "fourth"]);
    assert_eq!(records[1].severity, Severity::Warn);
    assert_eq!(records[3].severity, Severity::Debug);
    assert!(flusher.drain().is_empty());
}

#[test]
fn push_accepts_any_severity() {
    let (log, mut flusher) = DeferredLog::channel();
    log.push(Severity::Error, "explicit");
    assert_eq!(flusher.drain()[0].severity, Severity::Error);
}

#[test]
fn clones_share_one_queue() {
    let (log, mut flusher) = DeferredLog::channel();
    let other = log.clone();
    log.info("a");
    other.info("b");
    assert_eq!(flusher.drain().len(), 2);
}

#[tokio::test]
async fn periodic_flush_emits_records() {
    let (log, flusher) = DeferredLog::channel();
    let emitted: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&emitted);
    let stop = CancellationToken::new();

    let handle = flusher.spawn(Duration::from_millis(10), stop.clone(), move |record| {
        sink.lock().unwrap().push(record);
    });

    log.info("tick");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(emitted.lock().unwrap().len(), 1);

    stop.cancel();
    handle.await.expect("flusher joins");
}

#[tokio::test]
async fn stop_performs_final_drain() {
    let (log, flusher) = DeferredLog::channel();
    let emitted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&emitted);
    let stop = CancellationToken::new();

    // Long interval: only the first immediate tick and the final drain run.
    let handle = flusher.spawn(Duration::from_secs(3600), stop.clone(), move |record| {
        sink.lock().unwrap().push(record.message);
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    log.info("late one");
    log.error("late two");
    stop.cancel();
    handle.await.expect("flusher joins");

    assert_eq!(*emitted.lock().unwrap(), ["late one", "late two"]);
}

#[tokio::test]
async fn push_after_flusher_stopped_is_silent() {
    let (log, flusher) = DeferredLog::channel();
    let stop = CancellationToken::new();
    let handle = flusher.spawn(Duration::from_millis(10), stop.clone(), |_| {});
    stop.cancel();
    handle.await.expect("flusher joins");

    log.warn("nobody listening");
}
