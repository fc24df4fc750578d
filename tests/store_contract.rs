//! Store contract tests, run against the document (SQLite) and local
//! (ANN index) backends. The redis backend has its own ignored suite
//! since it needs a live server.

mod common;

use tempfile::TempDir;

use ragbrain::cache::HandleCache;
use ragbrain::models::{BackendKind, ProjectConfig, SourceFilter};
use ragbrain::store::{self, VectorStore};

use common::{metadata, test_config, test_models};

fn project_config(backend: BackendKind) -> ProjectConfig {
    ProjectConfig {
        name: "p1".into(),
        embeddings: "e1".into(),
        llm: "m1".into(),
        system: None,
        vectorstore: backend,
    }
}

async fn attach(
    tmp: &TempDir,
    backend: BackendKind,
) -> (ragbrain::config::Config, HandleCache, Box<dyn VectorStore>) {
    let config = test_config(tmp.path());
    let (models, _, _) = test_models();
    let cache = HandleCache::new(models);
    let store = store::attach(&config, &project_config(backend), &cache)
        .await
        .unwrap();
    (config, cache, store)
}

const BACKENDS: [BackendKind; 2] = [BackendKind::Document, BackendKind::Local];

#[tokio::test]
async fn add_then_find_roundtrip() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        let ids = store
            .add_texts(
                vec!["alpha bravo".into(), "charlie delta".into()],
                vec![
                    metadata("/tmp/a.txt", Some("alpha, bravo")),
                    metadata("/tmp/b.txt", None),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2, "{backend}: one id per input, in order");

        let found = store.find_by_source("/tmp/a.txt").await.unwrap();
        assert_eq!(found.len(), 1, "{backend}");
        assert_eq!(found[0].content, "alpha bravo", "{backend}");
        assert_eq!(found[0].id, ids[0], "{backend}");
        assert_eq!(
            found[0].metadata.get("keywords").and_then(|v| v.as_str()),
            Some("alpha, bravo"),
            "{backend}"
        );

        assert!(store.find_by_source("/tmp/missing").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn retrieval_respects_threshold_and_order() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        store
            .add_texts(
                vec!["the quick brown fox".into(), "zulu yankee xray whiskey".into()],
                vec![metadata("/tmp/a.txt", None), metadata("/tmp/b.txt", None)],
            )
            .await
            .unwrap();

        // An identical query embeds identically: similarity 1.0.
        let hits = store
            .retrieve("the quick brown fox", 0.95, 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "{backend}");
        assert_eq!(hits[0].content, "the quick brown fox", "{backend}");

        // Nothing clears an impossible threshold — empty, not an error.
        let none = store.retrieve("the quick brown fox", 1.1, 4).await.unwrap();
        assert!(none.is_empty(), "{backend}");
    }
}

#[tokio::test]
async fn retrieval_on_empty_store_is_empty() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, store) = attach(&tmp, backend).await;
        let hits = store.retrieve("anything", 0.0, 4).await.unwrap();
        assert!(hits.is_empty(), "{backend}");
    }
}

#[tokio::test]
async fn metadata_nulls_are_stripped() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        let mut meta = metadata("/tmp/a.txt", None);
        meta.insert("languages".into(), serde_json::Value::Null);
        meta.insert("keywords".into(), serde_json::json!(""));

        store.add_texts(vec!["text".into()], vec![meta]).await.unwrap();

        let found = store.find_by_source("/tmp/a.txt").await.unwrap();
        assert!(!found[0].metadata.contains_key("languages"), "{backend}");
        assert!(!found[0].metadata.contains_key("keywords"), "{backend}");
        assert!(found[0].metadata.contains_key("source"), "{backend}");
    }
}

#[tokio::test]
async fn delete_by_source_is_idempotent() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        store
            .add_texts(
                vec!["one".into(), "two".into(), "three".into()],
                vec![
                    metadata("/tmp/a.txt", None),
                    metadata("/tmp/a.txt", None),
                    metadata("/tmp/b.txt", None),
                ],
            )
            .await
            .unwrap();

        let first = store.delete_by_source("/tmp/a.txt").await.unwrap();
        assert_eq!(first.len(), 2, "{backend}");

        let second = store.delete_by_source("/tmp/a.txt").await.unwrap();
        assert!(second.is_empty(), "{backend}: second delete is a no-op");

        assert_eq!(store.info().await.unwrap().chunks, 1, "{backend}");
    }
}

#[tokio::test]
async fn delete_by_id_removes_one_chunk() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        let ids = store
            .add_texts(
                vec!["one".into(), "two".into()],
                vec![metadata("/tmp/a.txt", None), metadata("/tmp/a.txt", None)],
            )
            .await
            .unwrap();

        let deleted = store.delete_by_id(&ids[0]).await.unwrap();
        assert_eq!(deleted, ids[0], "{backend}");
        assert_eq!(store.info().await.unwrap().chunks, 1, "{backend}");

        // Unknown id is a no-op, not an error.
        store.delete_by_id(&ids[0]).await.unwrap();
        assert_eq!(store.info().await.unwrap().chunks, 1, "{backend}");
    }
}

/// Mixed local-path and URL sources: the partitions are disjoint and
/// their union covers every distinct source.
#[tokio::test]
async fn list_partitions_sources() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        store
            .add_texts(
                vec!["a".into(), "b".into(), "c".into()],
                vec![
                    metadata("http://a", None),
                    metadata("/tmp/b.txt", None),
                    metadata("http://a", None), // duplicate source
                ],
            )
            .await
            .unwrap();

        let all = store.list_sources(SourceFilter::All).await.unwrap();
        assert_eq!(all.urls.len(), 1, "{backend}");
        assert_eq!(all.other.len(), 1, "{backend}");
        assert!(all.urls.contains("http://a"), "{backend}");
        assert!(all.other.contains("/tmp/b.txt"), "{backend}");

        let urls = store.list_sources(SourceFilter::Urls).await.unwrap();
        assert!(urls.other.is_empty(), "{backend}");
        assert_eq!(urls.urls.len(), 1, "{backend}");

        let other = store.list_sources(SourceFilter::Other).await.unwrap();
        assert!(other.urls.is_empty(), "{backend}");
        assert_eq!(other.other.len(), 1, "{backend}");
    }
}

/// The end-to-end lifecycle scenario: two chunks, list, info, delete one
/// source, info again.
#[tokio::test]
async fn lifecycle_scenario() {
    let tmp = TempDir::new().unwrap();
    let (_config, _cache, mut store) = attach(&tmp, BackendKind::Local).await;

    store
        .add_texts(
            vec!["url content".into(), "file content".into()],
            vec![metadata("http://a", None), metadata("/tmp/b.txt", None)],
        )
        .await
        .unwrap();

    let all = store.list_sources(SourceFilter::All).await.unwrap();
    assert_eq!(all.urls.iter().collect::<Vec<_>>(), vec!["http://a"]);
    assert_eq!(all.other.iter().collect::<Vec<_>>(), vec!["/tmp/b.txt"]);

    let info = store.info().await.unwrap();
    assert_eq!((info.chunks, info.metadatas), (2, 2));

    let deleted = store.delete_by_source("/tmp/b.txt").await.unwrap();
    assert_eq!(deleted.len(), 1);

    let info = store.info().await.unwrap();
    assert_eq!((info.chunks, info.metadatas), (1, 1));
}

#[tokio::test]
async fn reset_yields_empty_store() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (config, cache, mut boxed) = attach(&tmp, backend).await;

        boxed
            .add_texts(vec!["one".into()], vec![metadata("/tmp/a.txt", None)])
            .await
            .unwrap();
        boxed.persist().await.unwrap();
        assert_eq!(boxed.info().await.unwrap().chunks, 1, "{backend}");

        store::reset(&mut boxed, &config, &project_config(backend), &cache)
            .await
            .unwrap();
        assert_eq!(boxed.info().await.unwrap().chunks, 0, "{backend}");
        assert!(
            boxed.find_by_source("/tmp/a.txt").await.unwrap().is_empty(),
            "{backend}"
        );
    }
}

/// Persist + re-attach restores content; ids survive the reload.
#[tokio::test]
async fn persisted_state_reopens() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let (models, _, _) = test_models();
        let cache = HandleCache::new(models);
        let project = project_config(backend);

        let ids = {
            let mut store = store::attach(&config, &project, &cache).await.unwrap();
            let ids = store
                .add_texts(vec!["persisted".into()], vec![metadata("/tmp/a.txt", None)])
                .await
                .unwrap();
            store.persist().await.unwrap();
            ids
        };

        let store = store::attach(&config, &project, &cache).await.unwrap();
        assert_eq!(store.info().await.unwrap().chunks, 1, "{backend}");
        let found = store.find_by_source("/tmp/a.txt").await.unwrap();
        assert_eq!(found[0].id, ids[0], "{backend}");
        assert_eq!(found[0].content, "persisted", "{backend}");
    }
}

/// Destroy is idempotent and tolerates a store that was never persisted.
#[tokio::test]
async fn destroy_is_idempotent() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let (_config, _cache, mut store) = attach(&tmp, backend).await;

        store
            .add_texts(vec!["one".into()], vec![metadata("/tmp/a.txt", None)])
            .await
            .unwrap();
        store.persist().await.unwrap();

        store.destroy().await.unwrap();
        store.destroy().await.unwrap();
    }
}

/// A corrupt local snapshot surfaces as a store-init failure rather than
/// silently starting empty.
#[tokio::test]
async fn corrupt_local_snapshot_fails_attach() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let (models, _, _) = test_models();
    let cache = HandleCache::new(models);
    let project = project_config(BackendKind::Local);

    let dir = config.storage.embeddings_path.join("p1_1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.json"), "{ not json").unwrap();

    let err = store::attach(&config, &project, &cache).await.unwrap_err();
    assert!(matches!(err, ragbrain::error::Error::StoreInit { .. }));
}
