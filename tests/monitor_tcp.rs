//! End-to-end runs of the monitor against a real TCP listener.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use telnet_recorder::config::{Endpoint, LogDirectory};
use telnet_recorder::monitor::Monitor;
use telnet_recorder::record::log_file_path;
use telnet_recorder::rotator::LogRotator;

fn endpoint(port: u16) -> Endpoint {
    Endpoint {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout: Duration::from_secs(2),
    }
}

fn today_log(dir: &Path) -> String {
    fs::read_to_string(log_file_path(dir, Local::now().date_naive())).unwrap_or_default()
}

async fn wait_for_lines(dir: &Path, count: usize) -> String {
    for _ in 0..500 {
        let text = today_log(dir);
        if text.lines().count() >= count {
            return text;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} lines, got:\n{}", count, today_log(dir));
}

#[tokio::test]
async fn test_records_lines_and_reconnects_after_peer_close() {
    let tmp = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();

    let rotator = LogRotator::new(LogDirectory::new(tmp.path(), 7)).with_echo(false);
    let mut monitor = Monitor::new(endpoint(port), rotator, cancel.clone())
        .with_backoff(Duration::from_millis(50));
    let handle = tokio::spawn(async move { monitor.run().await });

    // First connection: two lines split across writes, then the device hangs up
    let (mut first, _) = listener.accept().await.unwrap();
    first.write_all(b"temp=21.").await.unwrap();
    first.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.write_all(b"5\r\nfan=on\n").await.unwrap();
    wait_for_lines(tmp.path(), 2).await;
    drop(first);

    // The monitor dials again after the backoff
    let (mut second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("monitor should reconnect")
        .unwrap();
    second.write_all(b"after reconnect\n").await.unwrap();
    let text = wait_for_lines(tmp.path(), 3).await;

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor should stop after cancel")
        .unwrap()
        .unwrap();

    let texts: Vec<&str> = text.lines().map(|l| &l[22..]).collect();
    assert_eq!(texts, vec!["temp=21.5", "fan=on", "after reconnect"]);
    assert!(stats.connect_attempts >= 2);
    assert_eq!(stats.lines, 3);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying_until_cancelled() {
    let tmp = TempDir::new().unwrap();

    // Reserve a port, then free it so connections are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let cancel = CancellationToken::new();
    let rotator = LogRotator::new(LogDirectory::new(tmp.path(), 7)).with_echo(false);
    let mut monitor = Monitor::new(endpoint(port), rotator, cancel.clone())
        .with_backoff(Duration::from_millis(20));
    let handle = tokio::spawn(async move {
        let stats = monitor.run().await;
        (monitor, stats)
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let (monitor, stats) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor should stop after cancel")
        .unwrap();
    let stats = stats.unwrap();

    assert!(stats.connect_failures >= 2);
    assert_eq!(stats.lines, 0);
    assert!(!monitor.rotator().is_open());

    // The day's file exists but no failed attempt wrote anything to it
    assert_eq!(today_log(tmp.path()), "");
    assert!(log_file_path(tmp.path(), Local::now().date_naive()).exists());
}
