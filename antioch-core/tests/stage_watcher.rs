use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use antioch_core::extractor::MetadataExtractor;
use antioch_core::probe::{MediaProbe, ProbeResult};
use antioch_core::shutdown::ShutdownSignal;
use antioch_core::staging::{audit_pickup, PickupMover, StagingPaths};
use antioch_core::watcher::{list_staged_manifests, StageWatcher};

const PROBE_TEXT: &str = "  Duration: 00:10:00.50, start: 0.000000, bitrate: 800 kb/s\n    Stream #0:0(und): Video: vp9, yuv420p, 1920x1080, 25 fps\n";

#[derive(Default)]
struct CountingProbe {
    calls: AtomicUsize,
}

#[async_trait]
impl MediaProbe for CountingProbe {
    async fn probe(&self, _media: &Path) -> ProbeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PROBE_TEXT.to_string())
    }
}

fn staging(base: &TempDir) -> StagingPaths {
    let drop_dir = base.path().join("drop");
    let paths = StagingPaths::new(
        drop_dir.clone(),
        drop_dir.join("errors"),
        base.path().join("pickup"),
    );
    std::fs::create_dir_all(&paths.error_dir).unwrap();
    std::fs::create_dir_all(&paths.pickup_dir).unwrap();
    paths
}

fn stage_pair(dir: &Path, stem: &str) -> PathBuf {
    std::fs::write(dir.join(format!("{stem}.movie")), stem.as_bytes()).unwrap();
    let manifest = dir.join(format!("{stem}.json"));
    let tmp = dir.join(format!(".{stem}.json.0.tmp"));
    std::fs::write(
        &tmp,
        json!({"title": stem, "movie_file": dir.join(format!("{stem}.movie")), "filesize": stem.len()})
            .to_string(),
    )
    .unwrap();
    std::fs::rename(&tmp, &manifest).unwrap();
    manifest
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

async fn wait_for(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn watcher_handles_existing_and_new_manifests_once() {
    let base = TempDir::new().unwrap();
    let paths = staging(&base);
    stage_pair(&paths.drop_dir, "aaa");
    stage_pair(&paths.drop_dir, "bbb");
    let parked = paths.error_dir.join("parked.json");
    std::fs::write(&parked, b"{}").unwrap();

    let probe = Arc::new(CountingProbe::default());
    let extractor = MetadataExtractor::new(probe.clone(), paths.clone());
    let watcher = StageWatcher::new(extractor, Duration::from_millis(20), 2);
    let (trigger, signal) = ShutdownSignal::pair();
    let run = tokio::spawn(async move { watcher.run(signal).await });

    wait_for(&paths.pickup_dir.join("bbb.json")).await;
    stage_pair(&paths.drop_dir, "ccc");
    wait_for(&paths.pickup_dir.join("ccc.json")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    trigger.trigger();
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.picked_up, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    assert!(parked.exists());
    assert!(list_staged_manifests(&paths.drop_dir).await.unwrap().is_empty());

    let audit = audit_pickup(&paths.pickup_dir).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.paired, vec!["aaa", "bbb", "ccc"]);

    let value = read_json(&paths.pickup_dir.join("ccc.json"));
    assert_eq!(value["media_info"]["duration"], json!("00:10:00.50"));
    assert_eq!(value["media_info"]["duration_seconds"], json!(600));
    assert_eq!(value["media_info"]["resolution"]["height"], json!(1080));
    assert_eq!(value["title"], json!("ccc"));
}

#[tokio::test]
async fn watcher_ignores_temporary_and_unpaired_files() {
    let base = TempDir::new().unwrap();
    let paths = staging(&base);
    std::fs::write(paths.drop_dir.join(".abc.json.1234.tmp"), b"{}").unwrap();
    std::fs::write(paths.drop_dir.join("orphan.movie"), b"m").unwrap();
    let lonely = paths.drop_dir.join("lonely.json");
    std::fs::write(&lonely, b"{}").unwrap();

    let extractor = MetadataExtractor::new(Arc::new(CountingProbe::default()), paths.clone());
    let watcher = StageWatcher::new(extractor, Duration::from_millis(20), 4);
    let (trigger, signal) = ShutdownSignal::pair();
    let run = tokio::spawn(async move { watcher.run(signal).await });

    wait_for(&paths.error_dir.join("lonely.json")).await;
    trigger.trigger();
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.picked_up, 0);
    assert!(paths.drop_dir.join(".abc.json.1234.tmp").exists());
    assert!(paths.drop_dir.join("orphan.movie").exists());
}

#[tokio::test]
async fn missing_drop_folder_fails_fast() {
    let base = TempDir::new().unwrap();
    let paths = StagingPaths::new(
        base.path().join("absent"),
        base.path().join("absent/errors"),
        base.path().join("pickup"),
    );
    let extractor = MetadataExtractor::new(Arc::new(CountingProbe::default()), paths);
    let watcher = StageWatcher::new(extractor, Duration::from_millis(20), 4);
    let (_trigger, signal) = ShutdownSignal::pair();
    assert!(watcher.run(signal).await.is_err());
}

#[tokio::test]
async fn crash_between_pickup_renames_is_detected_and_recovered() {
    let base = TempDir::new().unwrap();
    let paths = staging(&base);
    let manifest = stage_pair(&paths.drop_dir, "torn");

    // Simulate a stop right after the media rename.
    let mover = PickupMover::new(paths.pickup_dir.clone());
    std::fs::rename(
        paths.drop_dir.join("torn.movie"),
        mover.media_target("torn"),
    )
    .unwrap();

    let audit = audit_pickup(&paths.pickup_dir).await.unwrap();
    assert!(!audit.is_consistent());
    assert_eq!(audit.orphaned_media, vec![paths.pickup_dir.join("torn.movie")]);

    let extractor = MetadataExtractor::new(Arc::new(CountingProbe::default()), paths.clone());
    extractor.process(&manifest).await.unwrap();

    let audit = audit_pickup(&paths.pickup_dir).await.unwrap();
    assert!(audit.is_consistent());
    assert_eq!(audit.paired, vec!["torn"]);
}
