//! Tests for Engine
//!
//! These tests verify:
//! - Segment discovery and id allocation
//! - Sealing blocks and dedup across segments
//! - Cached indexes follow a block that is sealed again
//! - Restart round-trip (seal, close, reopen)
//! - Segment drop and configuration validation
//! - Concurrent dedup

use std::fs;

use pillar::config::Config;
use pillar::engine::Engine;
use pillar::index::{BlockIndex, MutableIndex};
use pillar::jobs::build_and_flush_block_index;
use pillar::schema::Schema;
use pillar::{Key, PillarError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> Schema {
    Schema::with_columns(&["id", "name", "amount"], 0).unwrap()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(&temp_dir);
    (temp_dir, engine)
}

fn open_engine(temp_dir: &TempDir) -> Engine {
    let config = Config::builder()
        .data_dir(temp_dir.path().join("table"))
        .build();
    Engine::open(config, schema()).unwrap()
}

fn range(start: i64, end: i64) -> Vec<Key> {
    (start..end).map(Key::Int).collect()
}

fn assert_all_flagged(engine: &Engine, keys: &[Key]) {
    for key in keys {
        assert!(
            engine.dedup(key).unwrap_err().is_possible_duplicate(),
            "false negative for {}",
            key
        );
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let config = Config::builder().data_dir(&data_dir).build();
    let engine = Engine::open(config, schema()).unwrap();

    assert!(data_dir.exists());
    assert_eq!(engine.segment_count(), 0);
}

#[test]
fn test_engine_rejects_bad_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .bloom_false_positive_rate(2.0)
        .build();

    assert!(matches!(
        Engine::open(config, schema()),
        Err(PillarError::Config(_))
    ));
}

#[test]
fn test_create_segment_allocates_ids() {
    let (_temp, engine) = setup_temp_engine();

    let first = engine.create_segment().unwrap();
    let second = engine.create_segment().unwrap();

    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 2);
    assert_eq!(engine.segment_ids(), vec![1, 2]);
    assert!(engine.segment_dir(1).ends_with("seg_000001"));
    assert!(engine.segment_dir(2).join("SEGMENT").exists());
}

#[test]
fn test_engine_ignores_foreign_directories() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(&temp_dir);
        engine.create_segment().unwrap();
        engine.close().unwrap();
    }
    fs::create_dir_all(temp_dir.path().join("table").join("backup")).unwrap();
    fs::write(temp_dir.path().join("table").join("seg_notes"), b"x").unwrap();

    let engine = open_engine(&temp_dir);
    assert_eq!(engine.segment_ids(), vec![1]);
}

// =============================================================================
// Dedup Tests
// =============================================================================

#[test]
fn test_dedup_across_sealed_blocks() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();

    engine.seal_block(seg, 1, &range(0, 1_000)).unwrap();
    engine.seal_block(seg, 2, &range(5_000, 6_000)).unwrap();

    assert_all_flagged(&engine, &range(0, 1_000));
    assert_all_flagged(&engine, &range(5_000, 6_000));
    assert!(engine.dedup(&Key::Int(-1)).is_ok());
    assert!(engine.dedup(&Key::Int(10_000)).is_ok());
}

#[test]
fn test_unsealed_blocks_are_not_probed() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();

    engine.open_block(seg, 1).unwrap();
    assert!(engine.dedup(&Key::Int(1)).is_ok());
    assert!(matches!(
        engine.block_index(seg, 1),
        Err(PillarError::NotFound(_))
    ));
}

#[test]
fn test_batch_dedup_unions_blocks() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();
    engine.seal_block(seg, 1, &range(0, 10)).unwrap();
    engine.seal_block(seg, 2, &range(100, 110)).unwrap();

    let probe = vec![Key::Int(3), Key::Int(50), Key::Int(105), Key::Int(500)];
    match engine.batch_dedup(&probe) {
        Err(PillarError::PossibleDuplicates(mask)) => {
            assert!(mask.contains(0));
            assert!(mask.contains(2));
            assert!(!mask.contains(1));
            assert!(!mask.contains(3));
        }
        other => panic!("expected duplicates, got {:?}", other),
    }

    assert!(engine.batch_dedup(&[Key::Int(-5), Key::Int(1_000)]).is_ok());
}

#[test]
fn test_block_index_is_cached() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();
    engine.seal_block(seg, 1, &range(0, 100)).unwrap();

    let _ = engine.dedup(&Key::Int(50));
    let _ = engine.dedup(&Key::Int(51));
    assert_eq!(engine.block_index(seg, 1).unwrap().bloom_probes(), 2);
}

#[test]
fn test_resealed_block_is_reread() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();
    engine.seal_block(seg, 1, &[Key::Int(1), Key::Int(5)]).unwrap();
    assert!(engine.dedup(&Key::Int(1)).unwrap_err().is_possible_duplicate());
    assert!(engine.dedup(&Key::Int(100)).is_ok());

    // seal the same block again outside the engine
    let block = engine.open_block(seg, 1).unwrap();
    let generation = block.seal_generation();
    let mutable = MutableIndex::new(0.01);
    mutable.batch_upsert(&[Key::Int(1), Key::Int(5), Key::Int(100)], 0).unwrap();
    mutable.write_to(&block).unwrap();
    assert_eq!(block.seal_generation(), generation + 1);

    assert_all_flagged(&engine, &[Key::Int(1), Key::Int(5), Key::Int(100)]);
    assert!(matches!(
        engine.batch_dedup(&[Key::Int(100)]),
        Err(PillarError::PossibleDuplicates(_))
    ));

    build_and_flush_block_index(&block, &range(200, 210), 0.01).unwrap();
    assert_all_flagged(&engine, &range(200, 210));
}

#[test]
fn test_concurrent_dedup() {
    let (_temp, engine) = setup_temp_engine();
    let seg = engine.create_segment().unwrap().id();
    engine.seal_block(seg, 1, &range(0, 2_000)).unwrap();

    crossbeam::scope(|s| {
        for t in 0..4i64 {
            let engine = &engine;
            s.spawn(move |_| {
                for i in (t * 500)..((t + 1) * 500) {
                    assert!(engine.dedup(&Key::Int(i)).unwrap_err().is_possible_duplicate());
                    assert!(engine.dedup(&Key::Int(10_000 + i)).is_ok());
                }
            });
        }
    })
    .unwrap();
}

// =============================================================================
// Restart Tests
// =============================================================================

#[test]
fn test_restart_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(&temp_dir);
        let s1 = engine.create_segment().unwrap().id();
        let s2 = engine.create_segment().unwrap().id();
        engine.seal_block(s1, 1, &range(0, 500)).unwrap();
        engine.seal_block(s2, 7, &range(1_000, 1_500)).unwrap();

        let block = engine.open_block(s2, 8).unwrap();
        block.open_column(1).unwrap().write_version(64).unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(&temp_dir);
    assert_eq!(engine.segment_ids(), vec![1, 2]);
    assert_eq!(engine.segment(2).unwrap().block_ids(), vec![7, 8]);
    assert_eq!(
        engine.segment(2).unwrap().block(8).unwrap().open_column(1).unwrap().read_ts(),
        64
    );

    assert_all_flagged(&engine, &range(0, 500));
    assert_all_flagged(&engine, &range(1_000, 1_500));
    assert!(engine.dedup(&Key::Int(700)).is_ok());

    assert_eq!(engine.create_segment().unwrap().id(), 3);
}

#[test]
fn test_drop_segment_removes_files() {
    let (_temp, engine) = setup_temp_engine();
    let s1 = engine.create_segment().unwrap().id();
    let s2 = engine.create_segment().unwrap().id();
    engine.seal_block(s1, 1, &range(0, 100)).unwrap();
    engine.seal_block(s2, 1, &range(200, 300)).unwrap();

    engine.drop_segment(s1).unwrap();

    assert!(!engine.segment_dir(s1).exists());
    assert!(engine.segment_dir(s2).exists());
    assert!(matches!(engine.segment(s1), Err(PillarError::NotFound(_))));
    assert!(engine.dedup(&Key::Int(50)).is_ok());
    assert_all_flagged(&engine, &range(200, 300));

    assert!(matches!(
        engine.drop_segment(s1),
        Err(PillarError::NotFound(_))
    ));
}

#[test]
fn test_seal_unknown_segment() {
    let (_temp, engine) = setup_temp_engine();
    assert!(matches!(
        engine.seal_block(9, 1, &range(0, 10)),
        Err(PillarError::NotFound(_))
    ));
}
