use atheneum_core::embedding::DeterministicEmbedder;
use atheneum_core::metrics::MetricsRegistry;
use ingestion::embedding_cache::CachedEmbedder;
use ingestion::policy::ForbiddenTermPolicy;
use ingestion::processor::{
    IngestError, IngestOptions, IngestPayload, IngestionPipeline, StrategySelection,
};
use std::collections::HashMap;
use std::sync::Arc;
use storage::backend::VectorBackend;
use storage::embedded::EmbeddedVectorStore;
use storage::repo::DocumentRepository;

const DIMS: usize = 32;

fn pipeline_parts() -> (
    Arc<DocumentRepository>,
    Arc<EmbeddedVectorStore>,
    IngestionPipeline,
) {
    let repo = Arc::new(DocumentRepository::new());
    let backend = Arc::new(EmbeddedVectorStore::new("kb_test", DIMS));
    let embedder = Arc::new(CachedEmbedder::new(
        Arc::new(DeterministicEmbedder::new("m0", DIMS)),
        256,
    ));
    let pipeline = IngestionPipeline::new(
        "p1",
        repo.clone(),
        backend.clone(),
        embedder,
        Arc::new(MetricsRegistry::new()),
    )
    .unwrap();
    (repo, backend, pipeline)
}

#[tokio::test]
async fn ingest_stores_chunks_and_document() {
    let (repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    let outcome = pipeline
        .ingest_document(
            IngestPayload::text("d1", "Hello world. This is a short ingestion test."),
            &IngestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.doc_id, "d1");
    assert!(!outcome.chunk_ids.is_empty());
    assert!(outcome.chunk_ids[0].starts_with("d1_chunk"));

    let stats = backend.get_statistics().await.unwrap();
    assert_eq!(stats.total_documents, outcome.chunk_ids.len());

    let doc = repo.get_document("d1").await.unwrap();
    assert!(doc.content.contains("Hello world"));
}

#[tokio::test]
async fn reingest_replaces_previous_chunks() {
    let (_repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    pipeline
        .ingest_document(
            IngestPayload::text("d1", "ancient manuscript text"),
            &IngestOptions::default(),
        )
        .await
        .unwrap();
    let second = pipeline
        .ingest_document(
            IngestPayload::text("d1", "modern replacement text"),
            &IngestOptions::default(),
        )
        .await
        .unwrap();

    let stats = backend.get_statistics().await.unwrap();
    assert_eq!(stats.total_documents, second.chunk_ids.len());

    let stale = backend.query_keyword("ancient", 5, None).await.unwrap();
    assert!(stale.is_empty());
    let fresh = backend.query_keyword("modern", 5, None).await.unwrap();
    assert_eq!(fresh.len(), 1);
}

#[tokio::test]
async fn batch_continues_past_failing_items() {
    let (_repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    let outcomes = pipeline
        .ingest_batch(
            vec![
                IngestPayload::text("good-1", "valid content one"),
                IngestPayload::text("bad", "   "),
                IngestPayload::text("good-2", "valid content two"),
            ],
            &IngestOptions::default(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(IngestError::EmptyContent)
    ));
    assert!(outcomes[2].result.is_ok());
}

#[tokio::test]
async fn policy_rejection_fails_single_document() {
    let (_repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();
    let pipeline = pipeline.with_policy(Arc::new(ForbiddenTermPolicy::new(["classified"])));

    let result = pipeline
        .ingest_document(
            IngestPayload::text("d1", "This mentions classified material."),
            &IngestOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(IngestError::Policy(_))));
    assert_eq!(
        backend.get_statistics().await.unwrap().total_documents,
        0
    );
}

#[tokio::test]
async fn file_payload_goes_through_extractor() {
    let (repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    let outcome = pipeline
        .ingest_document(
            IngestPayload::File {
                doc_id: "f1".to_string(),
                filename: "notes.txt".to_string(),
                bytes: b"Extracted file body.".to_vec(),
                content_type: "text/plain".to_string(),
                metadata: HashMap::new(),
            },
            &IngestOptions::default(),
        )
        .await
        .unwrap();

    assert!(!outcome.chunk_ids.is_empty());
    let doc = repo.get_document("f1").await.unwrap();
    assert_eq!(doc.content, "Extracted file body.");
    assert_eq!(doc.metadata.get("filename").unwrap(), "notes.txt");
}

#[tokio::test]
async fn unsupported_file_type_is_rejected() {
    let (_repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    let result = pipeline
        .ingest_document(
            IngestPayload::File {
                doc_id: "f1".to_string(),
                filename: "image.png".to_string(),
                bytes: vec![0x89, 0x50, 0x4e, 0x47],
                content_type: "image/png".to_string(),
                metadata: HashMap::new(),
            },
            &IngestOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(IngestError::Extraction(_))));
}

#[tokio::test]
async fn explicit_recursive_strategy_is_honored() {
    let (_repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    let options = IngestOptions {
        strategy: StrategySelection::Recursive(
            ingestion::chunkers::RecursiveConfig {
                chunk_size: 200,
                chunk_overlap: 0,
            },
        ),
        ..IngestOptions::default()
    };
    let outcome = pipeline
        .ingest_document(
            IngestPayload::text("d1", "Librosa is a Python package for audio analysis"),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(outcome.chunk_ids, vec!["d1_chunk0".to_string()]);
}

#[tokio::test]
async fn delete_document_removes_chunks() {
    let (repo, backend, pipeline) = pipeline_parts();
    backend.initialize().await.unwrap();

    pipeline
        .ingest_document(
            IngestPayload::text("d1", "temporary document body"),
            &IngestOptions::default(),
        )
        .await
        .unwrap();

    assert!(pipeline.delete_document("d1").await.unwrap());
    assert!(repo.get_document("d1").await.is_none());
    assert_eq!(
        backend.get_statistics().await.unwrap().total_documents,
        0
    );
}
