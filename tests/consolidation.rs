use std::{error::Error, fs};

use sweepstore::{
    consolidated_path, ChunkManager, Consolidator, IndexArray, Record, Scalar, SweepError,
    SweepStore,
};
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;
use common::{counting_block, data_values, frequencies, settings, test_options, test_store};

fn write_step(store: &SweepStore, target: &std::path::Path, step: i64) -> Result<(), SweepError> {
    store.save_or_append_dict(target, &settings(step), "settings")?;
    store.extend(
        target,
        &counting_block(3, 1, (step * 3) as f64),
        &["mag"],
        &[IndexArray::from(vec![step]), IndexArray::from(vec![1i64, 2, 3])],
        &["step", "f"],
        "sweep",
    )?;
    Ok(())
}

#[test]
fn consolidated_series_matches_unchunked_file() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = test_store();
    let options = test_options().remove_chunks_after_consolidate(false);
    let mut series = ChunkManager::new(options.clone()).create_chunk_series("run", dir.path())?;
    let reference = dir.path().join("reference.swp");

    let mut rng = fastrand::Rng::with_seed(42);
    for step in 0..12 {
        let target = series.check_and_roll(rng.u64(300..3000))?;
        write_step(&store, &target, step)?;
        write_step(&store, &reference, step)?;
    }
    assert!(series.chunks()?.len() > 1);

    let report = Consolidator::new(options).consolidate_series(series)?;
    assert!(!report.chunks_removed);
    assert_eq!(
        report.keys,
        vec![("settings".to_string(), 12), ("sweep".to_string(), 36)]
    );
    assert!(report.chunks.iter().all(|chunk| chunk.exists()));

    let merged = store.read_table(&report.output, "sweep")?;
    let direct = store.read_table(&reference, "sweep")?;
    assert_eq!(merged.batch(), direct.batch());
    assert_eq!(data_values(&merged, "mag"), (0..36).map(f64::from).collect::<Vec<_>>());
    assert_eq!(
        store.read_dict(&report.output, "settings")?.batch(),
        store.read_dict(&reference, "settings")?.batch()
    );
    Ok(())
}

#[test]
fn keys_from_every_chunk_are_merged_in_chunk_order() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = test_store();
    let chunks = dir.path().join("run");
    fs::create_dir(&chunks)?;
    let chunk0 = chunks.join("run_chunk000000.swp");
    let chunk1 = chunks.join("run_chunk000001.swp");

    store.save_dict(&chunk0, &Record::new().with("a", 1i64), "settings")?;
    store.append_dict(&chunk0, &Record::new().with("a", 2i64), "settings")?;
    store.save_dict(&chunk1, &Record::new().with("a", 3i64), "settings")?;
    store.save(
        &chunk1,
        &counting_block(5, 1, 0.0),
        &["mag"],
        &frequencies(5),
        &["f"],
        "sweep",
    )?;

    let output = consolidated_path(&chunks);
    let report = Consolidator::new(test_options()).consolidate(&chunks, &output)?;
    assert_eq!(report.chunks, vec![chunk0, chunk1]);
    assert_eq!(store.keys(&output)?, vec!["settings", "sweep"]);

    let merged = store.read_dict(&output, "settings")?;
    let values: Vec<_> = (0..merged.num_rows())
        .map(|r| merged.row(r).map(|row| row.get("a").cloned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(values, [1, 2, 3].map(|v| Some(Scalar::Int(v))).to_vec());
    assert_eq!(store.read_table(&output, "sweep")?.num_rows(), 5);
    Ok(())
}

#[test]
fn chunk_index_not_listing_order_decides_merge_order() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = test_store();
    // Written out of order on purpose; mtimes disagree with indices.
    for index in [10u64, 2, 7] {
        let chunk = dir.path().join(format!("run_chunk{index:06}.swp"));
        store.save_dict(&chunk, &Record::new().with("chunk", index as i64), "settings")?;
    }

    let output = dir.path().join("merged.swp");
    Consolidator::new(test_options()).consolidate(dir.path(), &output)?;
    let merged = store.read_dict(&output, "settings")?;
    let order: Vec<_> = (0..merged.num_rows())
        .map(|r| merged.row(r).map(|row| row.get("chunk").cloned()))
        .collect::<Result<_, _>>()?;
    assert_eq!(order, [2, 7, 10].map(|v| Some(Scalar::Int(v))).to_vec());
    Ok(())
}

#[test]
fn incompatible_chunks_are_reported_not_merged() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = test_store();
    store.save_dict(
        dir.path().join("run_chunk000000.swp"),
        &Record::new().with("a", 1i64),
        "settings",
    )?;
    store.save_dict(
        dir.path().join("run_chunk000001.swp"),
        &Record::new().with("a", "one"),
        "settings",
    )?;

    let output = dir.path().join("merged.swp");
    let err = Consolidator::new(test_options())
        .consolidate(dir.path(), &output)
        .expect_err("type changed between chunks");
    assert!(matches!(err, SweepError::SchemaMismatch { key, .. } if key == "settings"));
    assert!(!output.exists());
    Ok(())
}

#[test]
fn existing_output_is_not_overwritten() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let store = test_store();
    store.save_dict(dir.path().join("run_chunk000000.swp"), &settings(0), "settings")?;
    let output = dir.path().join("merged.swp");
    fs::write(&output, b"keep me")?;

    let err = Consolidator::new(test_options())
        .consolidate(dir.path(), &output)
        .expect_err("output exists");
    assert!(matches!(err, SweepError::Io { .. }));
    assert_eq!(fs::read(&output)?, b"keep me");
    Ok(())
}
