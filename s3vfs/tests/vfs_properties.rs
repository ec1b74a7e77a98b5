use s3vfs::cadapter::memory::{CallCounters, InMemoryBackend};
use s3vfs::vfs::{Node, NodeStatus, S3Path, S3Vfs, VfsConfig, VfsError};
use std::sync::Arc;

fn volume(backend: &Arc<InMemoryBackend>) -> S3Vfs {
    S3Vfs::new(backend.clone(), VfsConfig::default())
}

fn names(nodes: &[Node]) -> Vec<String> {
    nodes.iter().map(|n| n.name()).collect()
}

#[test]
fn test_path_canonical_form_is_stable() {
    for raw in ["\\bk\\a\\b.txt", "/bk//a/b.txt/", "bk", "/bk/", "\\x\\\\y"] {
        let p = S3Path::from_fs_path(raw).unwrap();
        let again = S3Path::from_fs_path(&p.to_fs_path()).unwrap();
        assert_eq!(p, again, "{raw}");
        assert_eq!(p.append("x").parent(), Some(p.clone()));
    }
}

#[tokio::test]
async fn test_new_file_reads_zero() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.create_bucket("bk");
    let vfs = volume(&backend);
    let f = vfs.create_file("/bk/new.bin").await.unwrap();
    assert_eq!(f.read(0, 4096).await.unwrap(), vec![0u8; 4096]);
    assert_eq!(f.read(1 << 20, 17).await.unwrap(), vec![0u8; 17]);
    assert_eq!(CallCounters::get(&backend.calls.get_object), 0);
}

#[tokio::test]
async fn test_write_middle_of_fresh_file() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.create_bucket("bk");
    let vfs = volume(&backend);
    let f = vfs.create_file("/bk/f").await.unwrap();
    let payload: Vec<u8> = (1..=10).collect();
    f.write(10, &payload).await.unwrap();

    let out = f.read(0, 30).await.unwrap();
    assert_eq!(&out[0..10], &[0u8; 10]);
    assert_eq!(&out[10..20], &payload[..]);
    assert_eq!(&out[20..30], &[0u8; 10]);
    assert_eq!(f.file_size(), 20);
}

#[tokio::test]
async fn test_truncate_then_grow_hides_old_bytes() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "data", &[0xAB; 300_000]);
    let vfs = volume(&backend);
    let node = vfs.lookup("/bk/data").await.unwrap();
    let f = node.as_file().unwrap();
    assert_eq!(f.read(299_990, 10).await.unwrap(), vec![0xAB; 10]);

    f.set_file_size(0, false).await.unwrap();
    assert_eq!(f.status(), NodeStatus::Modified);
    f.set_file_size(300_000, false).await.unwrap();
    assert_eq!(f.read(0, 300_000).await.unwrap(), vec![0u8; 300_000]);

    f.persist_changes().await.unwrap();
    assert_eq!(backend.object("bk", "data").unwrap(), vec![0u8; 300_000]);
    assert_eq!(f.status(), NodeStatus::Active);
}

#[tokio::test]
async fn test_after_marker_chain_matches_full_listing() {
    let backend = Arc::new(InMemoryBackend::new().with_page_size(2));
    for key in ["d1/x", "d2/y", "a.txt", "b.txt", "c.txt"] {
        backend.insert("bk", key, b"1");
    }
    let vfs = volume(&backend);
    let bucket = vfs.lookup("/bk").await.unwrap().as_directory().unwrap().clone();

    let full = bucket.get_children(None).await.unwrap();
    assert_eq!(names(&full), ["d1", "d2", "a.txt", "b.txt", "c.txt"]);
    assert!(CallCounters::get(&backend.calls.list_objects) >= 2);

    let mut chained = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let tail = bucket.get_children(marker.as_deref()).await.unwrap();
        let Some(first) = tail.first() else { break };
        chained.push(first.name());
        marker = Some(first.name());
    }
    assert_eq!(chained, names(&full));
}

#[tokio::test]
async fn test_delete_recursive_batches_bulk_deletes() {
    let backend = Arc::new(InMemoryBackend::new());
    for i in 0..2500 {
        backend.insert("bk", &format!("big/f{i:05}"), b"z");
    }
    backend.insert("bk", "outside", b"keep");
    let vfs = volume(&backend);
    let dir = vfs.lookup("/bk/big").await.unwrap();
    let files = dir.as_directory().unwrap().get_children(None).await.unwrap();
    assert_eq!(files.len(), 2500);

    dir.delete_recursive().await.unwrap();

    assert_eq!(CallCounters::get(&backend.calls.delete_objects), 3);
    assert_eq!(*backend.calls.delete_batches.lock(), vec![1000, 1000, 500]);
    assert_eq!(CallCounters::get(&backend.calls.delete_object), 0);
    assert!(files.iter().all(|f| f.status() == NodeStatus::Deleted));
    assert_eq!(dir.status(), NodeStatus::Deleted);
    assert_eq!(backend.object_count("bk"), 1);
    assert!(matches!(vfs.lookup("/bk/big").await, Err(VfsError::NotFound { .. })));
}

#[tokio::test]
async fn test_move_onto_existing_without_replace_fails() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bucketA", "foo.txt", b"source bytes");
    backend.insert("bucketB", "bar/foo.txt", b"already here");
    let vfs = volume(&backend);
    let src = vfs.lookup("/bucketA/foo.txt").await.unwrap();

    let err = src
        .move_to(&S3Path::new("bucketB", "bar/foo.txt"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::InvalidOperation { .. }));

    assert_eq!(src.path(), S3Path::new("bucketA", "foo.txt"));
    assert_eq!(src.status(), NodeStatus::Active);
    assert_eq!(backend.object("bucketA", "foo.txt").unwrap(), b"source bytes");
    assert_eq!(backend.object("bucketB", "bar/foo.txt").unwrap(), b"already here");
    assert_eq!(CallCounters::get(&backend.calls.copy_object), 0);
    let again = vfs.lookup("/bucketA/foo.txt").await.unwrap();
    assert_eq!(again.as_file().unwrap().read(0, 12).await.unwrap(), b"source bytes");
}

#[tokio::test]
async fn test_recursive_directory_move() {
    let backend = Arc::new(InMemoryBackend::new());
    for key in ["src/a.txt", "src/sub/b.txt", "src/sub/deep/c.txt"] {
        backend.insert("bk", key, key.as_bytes());
    }
    backend.create_bucket("other");
    let vfs = volume(&backend);

    let moved = vfs.rename("/bk/src", "/other/dst", false).await.unwrap();
    assert!(moved.is_directory());
    assert_eq!(moved.path(), S3Path::new("other", "dst"));

    for key in ["a.txt", "sub/b.txt", "sub/deep/c.txt"] {
        let expected = format!("src/{key}");
        assert_eq!(
            backend.object("other", &format!("dst/{key}")).unwrap(),
            expected.as_bytes()
        );
        assert!(backend.object("bk", &expected).is_none());
        let node = vfs.lookup(&format!("/other/dst/{key}")).await.unwrap();
        assert_eq!(node.status(), NodeStatus::Active);
    }
    let bucket = vfs.lookup("/bk").await.unwrap();
    assert!(bucket.as_directory().unwrap().get_children(None).await.unwrap().is_empty());
    assert!(vfs.lookup("/bk/src").await.is_err());
}

#[tokio::test]
async fn test_move_directory_into_itself_rejected() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "d/f", b"x");
    let vfs = volume(&backend);
    let err = vfs.rename("/bk/d", "/bk/d/inner", false).await.unwrap_err();
    assert!(matches!(err, VfsError::InvalidOperation { .. }));
    assert!(backend.object("bk", "d/f").is_some());
}

#[tokio::test]
async fn test_dirty_data_survives_small_cache_budget() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.create_bucket("bk");
    let config = VfsConfig::default().cache_capacity_blocks(1);
    let vfs = S3Vfs::new(backend.clone(), config);
    let mut files = Vec::new();
    for i in 0..8 {
        let f = vfs.create_file(&format!("/bk/f{i}")).await.unwrap();
        f.write(0, format!("content {i}").as_bytes()).await.unwrap();
        files.push(f);
    }
    vfs.registry().run_pending_tasks().await;
    vfs.flush().await.unwrap();
    for i in 0..8 {
        assert_eq!(
            backend.object("bk", &format!("f{i}")).unwrap(),
            format!("content {i}").as_bytes()
        );
    }
}

#[tokio::test]
async fn test_move_onto_ancestor_rejected() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "a/b/f", b"precious");
    let vfs = volume(&backend);

    let err = vfs.rename("/bk/a/b", "/bk/a", true).await.unwrap_err();
    assert!(matches!(err, VfsError::InvalidOperation { .. }));
    let err = vfs.rename("/bk/a/b/f", "/bk/a", true).await.unwrap_err();
    assert!(matches!(err, VfsError::InvalidOperation { .. }));
    let err = vfs.rename("/bk/a/b/f", "/bk/a/b", true).await.unwrap_err();
    assert!(matches!(err, VfsError::InvalidOperation { .. }));

    assert_eq!(backend.object("bk", "a/b/f").unwrap(), b"precious");
    assert_eq!(CallCounters::get(&backend.calls.delete_objects), 0);
    let f = vfs.lookup("/bk/a/b/f").await.unwrap();
    assert_eq!(f.as_file().unwrap().read(0, 8).await.unwrap(), b"precious");
}

#[tokio::test]
async fn test_recursive_bucket_delete_removes_marker_objects() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "d/", b"");
    backend.insert("bk", "d/f", b"x");
    let vfs = volume(&backend);
    vfs.remove("/bk", true).await.unwrap();
    assert!(!backend.has_bucket("bk"));
    assert!(vfs.lookup("/bk").await.is_err());
}

#[tokio::test]
async fn test_failed_bulk_delete_keeps_tree() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "x", b"1");
    backend.insert("bk", "y", b"2");
    let vfs = volume(&backend);
    backend.fail_next("delete_objects", 1);

    let err = vfs.remove("/bk", true).await.unwrap_err();
    assert!(matches!(err, VfsError::Backend { .. }));
    assert_eq!(backend.object_count("bk"), 2);
    assert_eq!(names(&vfs.list("/bk", None).await.unwrap()), ["x", "y"]);
    let x = vfs.lookup("/bk/x").await.unwrap();
    assert_eq!(x.status(), NodeStatus::Active);
    assert_eq!(x.as_file().unwrap().read(0, 1).await.unwrap(), b"1");
    assert_eq!(vfs.lookup("/bk").await.unwrap().status(), NodeStatus::Active);
}

#[tokio::test]
async fn test_failed_bucket_delete_keeps_bucket_and_local_files() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "x", b"1");
    let vfs = volume(&backend);
    let draft = vfs.create_file("/bk/draft").await.unwrap();
    backend.fail_next("delete_bucket", 1);

    assert!(vfs.remove("/bk", true).await.is_err());
    // the bulk delete went through before the bucket call failed
    assert!(backend.object("bk", "x").is_none());
    assert!(vfs.lookup("/bk/x").await.is_err());
    assert!(backend.has_bucket("bk"));
    assert_eq!(draft.status(), NodeStatus::New);
    assert_eq!(names(&vfs.list("/bk", None).await.unwrap()), ["draft"]);
    assert_eq!(names(&vfs.list("/", None).await.unwrap()), ["bk"]);

    vfs.remove("/bk", true).await.unwrap();
    assert!(!backend.has_bucket("bk"));
    assert_eq!(draft.status(), NodeStatus::Deleted);
}

#[tokio::test]
async fn test_failed_copy_leaves_source_in_place() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("a", "foo.txt", b"hello");
    backend.create_bucket("b");
    let vfs = volume(&backend);
    let before = vfs.lookup("/a/foo.txt").await.unwrap();
    backend.fail_next("copy_object", 1);

    let err = vfs.rename("/a/foo.txt", "/b/foo.txt", false).await.unwrap_err();
    assert!(matches!(err, VfsError::Backend { .. }));
    let after = vfs.lookup("/a/foo.txt").await.unwrap();
    let (before, after) = (before.as_file().unwrap(), after.as_file().unwrap());
    assert!(Arc::ptr_eq(before, after));
    assert_eq!(after.path(), S3Path::new("a", "foo.txt"));
    assert_eq!(after.read(0, 5).await.unwrap(), b"hello");
    assert!(vfs.list("/b", None).await.unwrap().is_empty());
    assert_eq!(CallCounters::get(&backend.calls.delete_object), 0);
}

#[tokio::test]
async fn test_failed_object_delete_keeps_file() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.insert("bk", "f", b"x");
    let vfs = volume(&backend);
    backend.fail_next("delete_object", 1);
    assert!(vfs.remove("/bk/f", false).await.is_err());
    let f = vfs.lookup("/bk/f").await.unwrap();
    assert_eq!(f.status(), NodeStatus::Active);
    assert!(backend.object("bk", "f").is_some());
}
