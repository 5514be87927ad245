//! Integration tests for the filesystem blob store.

use bytes::Bytes;
use futures::StreamExt;
use tempfile::tempdir;
use thumbwell_storage::backends::FilesystemBackend;
use thumbwell_storage::{BlobStore, StorageError};

async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
    let temp = tempdir().expect("tempdir");
    let store = FilesystemBackend::new(temp.path())
        .await
        .expect("create backend");
    (temp, store)
}

#[tokio::test]
async fn put_get_roundtrip() {
    let (_temp, store) = backend().await;

    let key = "thumb/d/d4/Foo.png/120px-Foo.png";
    let data = Bytes::from_static(b"not really a png");

    store.put(key, data.clone()).await.expect("put");
    assert!(store.exists(key).await.expect("exists"));
    assert_eq!(store.get(key).await.expect("get"), data);
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let (_temp, store) = backend().await;
    let result = store.get("thumb/nope").await;
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[tokio::test]
async fn head_reports_size_and_mtime() {
    let (_temp, store) = backend().await;
    store
        .put("public/a/ab/Foo.png", Bytes::from(vec![0u8; 512]))
        .await
        .expect("put");

    let meta = store.head("public/a/ab/Foo.png").await.expect("head");
    assert_eq!(meta.size, 512);
    assert!(meta.last_modified.is_some());
}

#[tokio::test]
async fn put_if_not_exists_preserves_first_write() {
    let (_temp, store) = backend().await;
    let key = "thumb/x/xy/Foo.png/80px-Foo.png";

    assert!(store
        .put_if_not_exists(key, Bytes::from_static(b"first"))
        .await
        .expect("first put"));
    assert!(!store
        .put_if_not_exists(key, Bytes::from_static(b"second"))
        .await
        .expect("second put"));
    assert_eq!(store.get(key).await.expect("get"), Bytes::from_static(b"first"));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_temp, store) = backend().await;
    let key = "thumb/gone";
    store.put(key, Bytes::from_static(b"x")).await.expect("put");
    store.delete(key).await.expect("delete");
    assert!(!store.exists(key).await.expect("exists"));
    store.delete(key).await.expect("second delete");
}

#[tokio::test]
async fn stream_reassembles_content() {
    let (_temp, store) = backend().await;
    let key = "thumb/big";
    // Larger than one stream chunk.
    let data = Bytes::from(vec![7u8; 200 * 1024]);
    store.put(key, data.clone()).await.expect("put");

    let mut stream = store.get_stream(key).await.expect("stream");
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.expect("chunk"));
    }
    assert_eq!(Bytes::from(collected), data);
}

#[tokio::test]
async fn traversal_keys_rejected() {
    let (_temp, store) = backend().await;
    for key in ["../escape", "/absolute", "a/../../b"] {
        let result = store.exists(key).await;
        assert!(
            matches!(result, Err(StorageError::InvalidKey(_))),
            "key {key:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn no_temp_files_left_behind() {
    let (temp, store) = backend().await;
    store
        .put("thumb/a/file.png", Bytes::from_static(b"data"))
        .await
        .expect("put");

    let mut entries = tokio::fs::read_dir(temp.path().join("thumb/a"))
        .await
        .expect("read_dir");
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.expect("entry") {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["file.png"]);
}
