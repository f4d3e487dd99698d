use adcrelay_watch::{CompletionDetector, Decision, DirectoryObserver, WatchError};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

/// Pull events until `want` file names have been seen or the deadline passes.
async fn collect_names(
    stream: &mut adcrelay_watch::EventStream,
    detector: &mut CompletionDetector,
    want: &[&str],
) -> (HashSet<String>, Vec<Decision>) {
    let mut seen = HashSet::new();
    let mut decisions = Vec::new();
    let deadline = Duration::from_secs(5);

    while !want.iter().all(|name| seen.contains(*name)) {
        let next = match timeout(deadline, stream.next()).await {
            Ok(Some(Ok(event))) => event,
            Ok(Some(Err(e))) => panic!("observer failed: {e}"),
            Ok(None) | Err(_) => break,
        };
        assert!(!next.is_directory);
        if let Some(name) = next.path.file_name() {
            seen.insert(name.to_string_lossy().into_owned());
        }
        decisions.push(detector.observe(&next));
    }

    (seen, decisions)
}

#[tokio::test]
async fn test_new_files_in_new_subdirectory_are_observed() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut observer, mut stream) = DirectoryObserver::start(tmp.path()).unwrap();
    assert!(observer.is_running());

    let run = tmp.path().join("run1");
    fs::create_dir(&run).unwrap();
    // Give the backend a moment to add the nested watch.
    tokio::time::sleep(Duration::from_millis(200)).await;

    fs::write(run.join("adc_data_Raw_0.bin"), vec![7u8; 100]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::write(run.join("adc_data_Raw_1.bin"), vec![8u8; 10]).unwrap();

    let mut detector = CompletionDetector::new();
    let (seen, decisions) = collect_names(
        &mut stream,
        &mut detector,
        &["adc_data_Raw_0.bin", "adc_data_Raw_1.bin"],
    )
    .await;

    assert!(seen.contains("adc_data_Raw_1.bin"), "saw {:?}", seen);
    let tasks: Vec<_> = decisions.iter().filter_map(|d| d.task()).collect();
    assert_eq!(tasks.len(), 1, "decisions: {:?}", decisions);
    assert_eq!(tasks[0].file_name(), "adc_data_Raw_0.bin");
    assert_eq!(tasks[0].remote_directory_name, "run1");

    observer.stop();
    assert!(!observer.is_running());
}

#[tokio::test]
async fn test_stream_ends_after_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut observer, mut stream) = DirectoryObserver::start(tmp.path()).unwrap();
    observer.stop();
    drop(observer);

    let end = timeout(Duration::from_secs(5), async {
        while let Some(item) = stream.next().await {
            item.unwrap();
        }
    })
    .await;
    assert!(end.is_ok(), "stream should close once the subscription is released");
}

#[test]
fn test_missing_root_is_startup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("does-not-exist");
    let err = DirectoryObserver::start(&missing).err().unwrap();
    assert!(matches!(err, WatchError::RootMissing(ref p) if p == &missing));
    assert!(err.is_startup());
}

#[test]
fn test_file_root_is_startup_error() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();
    let err = DirectoryObserver::start(Path::new(&file)).err().unwrap();
    assert!(matches!(err, WatchError::RootNotDirectory(_)));
}
