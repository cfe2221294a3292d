use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hrstream::prelude::*;


fn temp_log_dir() -> PathBuf {
    std::env::temp_dir().join(format!("hrstream-e2e-{}", rand::random::<u64>()))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn scan_select_connect_and_log_one_reading() {
    let transport = FakeTransport::new()
        .with_advertisement(Some("Polar H10"), "AA:11")
        .with_advertisement(Some(""), "AA:22")
        .with_payloads(vec![vec![0x00, 0x4B]]);
    let handle = transport.handle();
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let registry = DeviceRegistry::new();

    let selections = Arc::new(AtomicUsize::new(0));
    let s = selections.clone();
    let _subscription = registry.subscribe(Arc::new(move || { s.fetch_add(1, Ordering::SeqCst); }));

    let scanner = Scanner::new(transport.clone(), registry.clone());
    let found = scanner.scan(Duration::ZERO, DEFAULT_SCAN_LIMIT).await;
    assert_eq!(found, vec![ScanResult { name: "Polar H10".into(), address: "AA:11".into() }]);

    registry.set_device(found[0].address.clone(), Some(found[0].name.clone())).unwrap();
    assert_eq!(selections.load(Ordering::SeqCst), 1);

    let dir = temp_log_dir();
    let readings = Arc::new(Mutex::new(Vec::new()));
    let r = readings.clone();
    let sink = ReadingSink::with_callback(move |bpm| r.lock().unwrap().push(bpm))
        .logging_to(DailyLog::new(&dir));
    let monitor = HrMonitor::new(transport, registry, sink).with_poll_interval(Duration::from_millis(10));

    monitor.connect().await.unwrap();
    assert_eq!(monitor.state(), ConnectionState::Streaming);
    wait_until(|| !readings.lock().unwrap().is_empty()).await;

    // give the listener a moment to prove nothing else arrives
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(*readings.lock().unwrap(), vec![75]);

    let files: Vec<PathBuf> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let file_name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("hr_log_") && file_name.ends_with(".csv"));
    let contents = fs::read_to_string(&files[0]).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(",75"), "unexpected log line {:?}", lines[0]);

    monitor.disconnect().await;
    assert_eq!(monitor.state(), ConnectionState::Disconnected);
    assert!(!handle.is_link_up());
    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn failed_connect_reports_failure_and_can_retry() {
    let registry = DeviceRegistry::new();
    registry.set_device("AA:11", Some("Polar H10".into())).unwrap();

    let failing = HrMonitor::new(
        Arc::new(FakeTransport::new().failing_connect()),
        registry.clone(),
        ReadingSink::default(),
    );
    let err = failing.connect().await.unwrap_err();
    assert!(matches!(err, ConnectError::TransportFailure(_)));
    assert_eq!(failing.state().label(), "failed");

    failing.disconnect().await;
    assert_eq!(failing.state(), ConnectionState::Failed);

    let working = HrMonitor::new(Arc::new(FakeTransport::new()), registry, ReadingSink::default());
    working.connect().await.unwrap();
    assert_eq!(working.state().label(), "connected");
    working.disconnect().await;
}

#[tokio::test]
async fn readings_keep_transport_order() {
    let payloads: Vec<Vec<u8>> = (60..90).map(|bpm| vec![0x00, bpm]).collect();
    let transport = FakeTransport::new().with_payloads(payloads);
    let registry = DeviceRegistry::new();
    registry.set_device("AA:11", None).unwrap();

    let readings = Arc::new(Mutex::new(Vec::new()));
    let r = readings.clone();
    let monitor = HrMonitor::new(
        Arc::new(transport),
        registry,
        ReadingSink::with_callback(move |bpm| r.lock().unwrap().push(bpm)),
    );

    monitor.connect().await.unwrap();
    wait_until(|| readings.lock().unwrap().len() == 30).await;
    assert_eq!(*readings.lock().unwrap(), (60..90).collect::<Vec<u16>>());
    monitor.disconnect().await;
}

#[tokio::test]
async fn state_changes_are_pushed() {
    let transport = FakeTransport::new();
    let handle = transport.handle();
    let registry = DeviceRegistry::new();
    registry.set_device("AA:11", None).unwrap();
    let monitor = HrMonitor::new(Arc::new(transport), registry, ReadingSink::default())
        .with_poll_interval(Duration::from_millis(10));

    let mut states = monitor.watch_state();
    monitor.connect().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Streaming);

    handle.drop_link();
    tokio::time::timeout(Duration::from_secs(2), states.changed()).await.unwrap().unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
}
