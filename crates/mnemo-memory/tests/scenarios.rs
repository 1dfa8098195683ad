//! End-to-end scenarios against an on-disk engine.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mnemo_embed::MockEmbedder;
use mnemo_memory::{
    AssociationQuery, CaptureRequest, EngineSettings, ExpandRequest, MemoryEngine, MemoryError,
    NewMemory, RecallQuery,
};

fn open_engine(dir: &Path) -> MemoryEngine {
    MemoryEngine::open(
        dir.join("memory.db"),
        Arc::new(MockEmbedder::new(64)),
        EngineSettings::default(),
    )
    .expect("engine init failed")
}

#[tokio::test]
async fn test_importance_update_surfaces_in_associations() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let a = engine
        .store_memory(
            NewMemory::new("Learned X")
                .with_importance(5)
                .with_topics(["python"]),
        )
        .await
        .unwrap()
        .into_inner();

    let before = engine
        .find_associations(AssociationQuery::new().topics(["python"]).min_importance(8))
        .unwrap();
    assert!(before.is_empty());

    let update = engine
        .update_memory_importance(a.id, 9, Some("reviewed"))
        .unwrap();
    assert_eq!(update.new.get(), 9);

    let after = engine
        .find_associations(AssociationQuery::new().topics(["python"]).min_importance(8))
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, a.id);

    let history = engine.importance_history(a.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason.as_deref(), Some("reviewed"));
}

#[tokio::test]
async fn test_importance_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    for bad in [0, 11] {
        let err = engine
            .store_memory(NewMemory::new("out of range").with_importance(bad))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "importance {} accepted", bad);
    }
    assert_eq!(engine.stats().unwrap().memory_count, 0);

    let m = engine
        .store_memory(NewMemory::new("in range").with_importance(10))
        .await
        .unwrap()
        .into_inner();
    assert!(matches!(
        engine.update_memory_importance(m.id, 11, None),
        Err(MemoryError::Validation { .. })
    ));
    assert_eq!(engine.get_memory(m.id).unwrap().importance.get(), 10);
}

#[tokio::test]
async fn test_recall_today_stays_in_window() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());
    let now = Utc::now();

    engine
        .store_memory(NewMemory::new("just now"))
        .await
        .unwrap();
    engine
        .store_memory(NewMemory::new("two days ago").with_timestamp(now - Duration::days(2)))
        .await
        .unwrap();
    engine
        .store_memory(NewMemory::new("tomorrow").with_timestamp(now + Duration::days(1)))
        .await
        .unwrap();

    let result = engine.recall_by_time(RecallQuery::new("today")).unwrap();
    for memory in &result.memories {
        assert!(result.range.contains(memory.timestamp));
        assert!(memory.timestamp < Utc::now());
    }
    assert!(result.memories.iter().any(|m| m.content == "just now"));
    assert!(!result.memories.iter().any(|m| m.content == "two days ago"));
    assert!(!result.memories.iter().any(|m| m.content == "tomorrow"));
}

#[tokio::test]
async fn test_capture_then_progress_reports_pending() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    engine
        .quick_capture(CaptureRequest::new("note").with_tags(["x"]))
        .await
        .unwrap();

    let progress = engine.track_learning_progress("today").unwrap();
    assert!(!progress.pending_expansion.is_empty());
    assert_eq!(progress.captures, 1);
    assert_eq!(progress.expansions, 0);
}

#[tokio::test]
async fn test_double_expansion_fails_and_keeps_first() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let capture = engine
        .quick_capture(CaptureRequest::new("borrow checker quirk"))
        .await
        .unwrap()
        .into_inner();

    let first = engine
        .expand_learning(
            capture.id,
            ExpandRequest::new("Two-phase borrows allow vec.push(vec.len())")
                .with_key_insight("reservation then activation"),
        )
        .await
        .unwrap()
        .into_inner();

    let err = engine
        .expand_learning(capture.id, ExpandRequest::new("something else"))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::AlreadyExpanded(id) if id == capture.id));

    let stored = engine.store().get_learning(first.id).unwrap().unwrap();
    assert_eq!(stored.expanded_content, first.expanded_content);
    assert_eq!(stored.key_insight, first.key_insight);
    assert_eq!(engine.stats().unwrap().learning_count, 1);
}

#[tokio::test]
async fn test_reinforcement_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let capture = engine
        .quick_capture(CaptureRequest::new("lifetimes"))
        .await
        .unwrap()
        .into_inner();
    let learning = engine
        .expand_learning(capture.id, ExpandRequest::new("Elision rules").with_importance(6))
        .await
        .unwrap()
        .into_inner();

    let mut previous = learning.importance;
    for n in 1..=12u32 {
        let reinforced = engine
            .reinforce_learning(learning.id, Some("code review"), None)
            .unwrap();
        assert!(reinforced.importance >= previous);
        assert!(reinforced.importance.get() <= 10);
        assert_eq!(reinforced.reinforcement_count, n);
        previous = reinforced.importance;
    }

    let stored = engine.store().get_learning(learning.id).unwrap().unwrap();
    assert_eq!(stored.reinforcements.len(), 12);
}

#[tokio::test]
async fn test_associations_need_a_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    assert!(matches!(
        engine.find_associations(AssociationQuery::new()),
        Err(MemoryError::UnderspecifiedQuery)
    ));
    assert!(matches!(
        engine.find_associations(AssociationQuery::new().min_importance(3).limit(5)),
        Err(MemoryError::UnderspecifiedQuery)
    ));
}

#[tokio::test]
async fn test_consolidating_identical_memories() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let a = engine
        .store_memory(
            NewMemory::new("Rust traits enable static dispatch")
                .with_topics(["rust", "traits"])
                .with_people(["ana"]),
        )
        .await
        .unwrap()
        .into_inner();
    let b = engine
        .store_memory(
            NewMemory::new("Rust traits enable static dispatch")
                .with_topics(["rust", "generics"])
                .with_places(["office"]),
        )
        .await
        .unwrap()
        .into_inner();

    let visible = |engine: &MemoryEngine| {
        engine
            .find_associations(AssociationQuery::new().topics(["rust"]))
            .unwrap()
    };
    assert_eq!(visible(&engine).len(), 2);

    let report = engine
        .consolidate_knowledge("rust", Some(0.5), None)
        .await
        .unwrap();
    assert_eq!(report.merged.len(), 1);
    assert!(!report.exact_match_only);

    let survivors = visible(&engine);
    assert_eq!(survivors.len(), 1);
    let survivor = &survivors[0];
    assert!([a.id, b.id].contains(&survivor.id));
    for topic in ["rust", "traits", "generics"] {
        assert!(survivor.topics.contains(topic));
    }
    assert!(survivor.people.contains("ana"));
    assert!(survivor.places.contains("office"));
}

#[tokio::test]
async fn test_reopen_keeps_records_and_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let engine = open_engine(dir.path());
        let stored = engine
            .store_memory(NewMemory::new("persisted fact").with_topics(["disk"]))
            .await
            .unwrap();
        assert!(!stored.is_degraded());
        engine.shutdown().unwrap();
        stored.value.id
    };

    let engine = open_engine(dir.path());
    assert_eq!(engine.get_memory(id).unwrap().content, "persisted fact");
    assert_eq!(engine.stats().unwrap().embedding_count, 1);

    let organized = engine
        .organize_knowledge("persisted fact", "archive", None)
        .await
        .unwrap()
        .into_inner();
    assert!(organized.iter().any(|o| o.memory.id == id));
}
