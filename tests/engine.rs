//! Integration tests for the six concrete scenarios in the storage
//! engine's specification, plus a couple of whole-crate sanity checks
//! that don't fit naturally as unit tests next to the code they exercise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use segkv::{Config, Engine};
use tempfile::tempdir;

/// Installs a terminal logger so compactor/recovery log output is visible
/// under `cargo test -- --nocapture`. Error ignored: harmless if another
/// test in this binary already installed one.
fn init_logging() {
    use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
    let _ = TermLogger::init(
        LevelFilter::Debug,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

fn small_segment_config(dir: &std::path::Path) -> Config {
    let mut config = Config::new(dir);
    config.max_segment_size_bytes = 64;
    config.merge_threshold_segments = 3;
    config
}

#[test]
fn scenario_1_single_key_churn() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(small_segment_config(dir.path())).unwrap();

    engine.insert(b"k", b"v1").unwrap();
    engine.insert(b"k", b"v2").unwrap();
    engine.insert(b"k", b"v3").unwrap();

    assert_eq!(engine.query(b"k").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn scenario_2_rollover() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(small_segment_config(dir.path())).unwrap();

    for c in b'a'..=b'j' {
        let key = [c];
        let value: Vec<u8> = std::iter::repeat(c.to_ascii_uppercase()).take(10).collect();
        engine.insert(&key, &value).unwrap();
    }

    assert_eq!(
        engine.query(b"a").unwrap(),
        Some(b"AAAAAAAAAA".to_vec())
    );
    assert_eq!(
        engine.query(b"j").unwrap(),
        Some(b"JJJJJJJJJJ".to_vec())
    );
}

#[test]
fn scenario_3_shadowing_across_segments() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(small_segment_config(dir.path())).unwrap();

    engine.insert(b"k", b"old").unwrap();
    for i in 0..5u8 {
        engine.insert(&[b'x', i], b"0123456789").unwrap();
    }
    engine.insert(b"k", b"new").unwrap();

    assert_eq!(engine.query(b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn scenario_4_tombstone() {
    let dir = tempdir().unwrap();
    let engine = Engine::new(small_segment_config(dir.path())).unwrap();

    engine.insert(b"k", b"v").unwrap();
    engine.delete(b"k").unwrap();
    assert_eq!(engine.query(b"k").unwrap(), None);

    engine.insert(b"k", b"v2").unwrap();
    assert_eq!(engine.query(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn scenario_5_compaction_correctness() {
    init_logging();
    let dir = tempdir().unwrap();
    let engine = Engine::new(small_segment_config(dir.path())).unwrap();

    // drive the store through several rollovers with overlapping keys
    // and a mix of updates and deletes.
    for round in 0..6u8 {
        engine
            .insert(&[b'k', round % 3], format!("round{round}").as_bytes())
            .unwrap();
        engine
            .insert(&[b'f', round], b"0123456789")
            .unwrap();
    }
    engine.delete(&[b'k', 0]).unwrap();

    // give the background compactor a chance to run.
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(engine.query(&[b'k', 0]).unwrap(), None);
    assert_eq!(
        engine.query(&[b'k', 1]).unwrap(),
        Some(b"round4".to_vec())
    );
    assert_eq!(
        engine.query(&[b'k', 2]).unwrap(),
        Some(b"round5".to_vec())
    );
    for round in 0..6u8 {
        assert_eq!(
            engine.query(&[b'f', round]).unwrap(),
            Some(b"0123456789".to_vec())
        );
    }

    engine.shutdown().unwrap();
}

#[test]
fn scenario_6_concurrent_read_during_compaction() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(Engine::new(small_segment_config(dir.path())).unwrap());
    engine.insert(b"k", b"v").unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader_failed = Arc::new(AtomicBool::new(false));

    let reader = {
        let engine = engine.clone();
        let stop = stop.clone();
        let reader_failed = reader_failed.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                match engine.query(b"k") {
                    Ok(Some(v)) if v == b"v" => {}
                    _ => {
                        reader_failed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        })
    };

    for round in 0..40u32 {
        let key = round.to_le_bytes();
        engine.insert(&key, b"0123456789").unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    reader.join().unwrap();

    assert!(!reader_failed.load(Ordering::Relaxed));
    assert_eq!(engine.query(b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn restart_recovers_all_surviving_keys() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::new(small_segment_config(dir.path())).unwrap();
        for i in 0..10u8 {
            engine.insert(&[i], &[i; 10]).unwrap();
        }
        engine.delete(&[3]).unwrap();
        engine.shutdown().unwrap();
    }

    let engine = Engine::new(small_segment_config(dir.path())).unwrap();
    for i in 0..10u8 {
        if i == 3 {
            assert_eq!(engine.query(&[i]).unwrap(), None);
        } else {
            assert_eq!(engine.query(&[i]).unwrap(), Some(vec![i; 10]));
        }
    }
}
