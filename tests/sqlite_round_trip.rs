use object_sync::{
    DiffEngine, NamespaceTree, RemoteStore, TransferEngine,
    services::{
        progress::{CollectErrors, NoProgress},
        remote::list_all,
        storage_service::{StorageService, run_migrations},
        transfer::UploadOutcome,
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;

const SEG: u64 = 1024;

async fn engine(dir: &Path) -> TransferEngine<StorageService> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    let store = StorageService::new(Arc::new(pool), dir.join("objects"));
    TransferEngine::new(store, SEG).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn upload_then_download_reproduces_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path()).await;

    for (name, len) in [("small.bin", 1000usize), ("exact.bin", 1024), ("large.bin", 10_000)] {
        let src = dir.path().join(name);
        let data = pattern(len);
        std::fs::write(&src, &data).unwrap();

        let outcome = engine
            .upload_file("media", name, &src, None, false, &NoProgress)
            .await
            .unwrap();
        match (len as u64 > SEG, &outcome) {
            (true, UploadOutcome::Segmented { segments, .. }) => {
                assert_eq!(segments.len(), len.div_ceil(SEG as usize))
            }
            (false, UploadOutcome::Whole(_)) => {}
            other => panic!("unexpected outcome for {name}: {other:?}"),
        }

        let entry = engine.store().head("media", name).await.unwrap().unwrap();
        let target = dir.path().join("out").join(name);
        engine
            .download("media", &entry, &target, &NoProgress)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data, "{name}");
    }
}

#[tokio::test]
async fn shrink_prunes_and_reupload_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path()).await;
    let src = dir.path().join("video.raw");

    std::fs::write(&src, pattern(8 * 1024)).unwrap();
    engine
        .upload_file("media", "v/video.raw", &src, None, false, &NoProgress)
        .await
        .unwrap();
    assert_eq!(engine.list_segments("media", "v/video.raw").await.unwrap().len(), 8);

    std::fs::write(&src, pattern(3 * 1024 + 1)).unwrap();
    engine
        .upload_file("media", "v/video.raw", &src, None, true, &NoProgress)
        .await
        .unwrap();
    let segments = engine.list_segments("media", "v/video.raw").await.unwrap();
    let indices: Vec<u32> = segments.iter().map(|s| s.index).collect();
    assert_eq!(indices, [1, 2, 3, 4]);

    let again = engine
        .upload_file("media", "v/video.raw", &src, None, false, &NoProgress)
        .await
        .unwrap();
    assert!(matches!(again, UploadOutcome::Skipped(_)));
    assert_eq!(engine.list_segments("media", "v/video.raw").await.unwrap(), segments);
}

#[tokio::test]
async fn directory_sync_diff_and_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path()).await;
    let local = dir.path().join("album");
    std::fs::create_dir_all(local.join("2024/summer")).unwrap();
    std::fs::write(local.join("2024/summer/beach.jpg"), pattern(3000)).unwrap();
    std::fs::write(local.join("2024/notes.txt"), b"notes").unwrap();
    std::fs::write(local.join("cover.png"), pattern(10)).unwrap();

    let errors = CollectErrors::new();
    let summary = engine
        .upload_directory(
            &local,
            "photos",
            "album",
            false,
            &NoProgress,
            &errors,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.failed, 0, "{:?}", errors.take());

    let result = DiffEngine::new(&engine)
        .reconcile(&local, "photos", "album")
        .await
        .unwrap();
    assert!(result.is_in_sync(), "{result:?}");
    assert_eq!(result.identical, 5);

    std::fs::write(local.join("cover.png"), pattern(11)).unwrap();
    let result = DiffEngine::new(&engine)
        .reconcile(&local, "photos", "album")
        .await
        .unwrap();
    assert_eq!(result.differing.len(), 1);
    assert_eq!(result.differing[0].remote.remote_full_name(), "album/cover.png");

    let entries = list_all(engine.store(), "photos", "").await.unwrap();
    let tree = NamespaceTree::build("photos", entries);
    let album = tree.find("album").unwrap();
    assert!(album.is_virtual());
    let year = tree.find("album/2024").unwrap();
    assert!(year.is_directory_marker());
    let children: Vec<&str> = tree.children(year).map(|n| n.display_name.as_str()).collect();
    assert_eq!(children, ["notes.txt", "summer"]);
    assert!(tree.is_leaf(tree.find("album/2024/summer/beach.jpg").unwrap()));
}
