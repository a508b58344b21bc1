//! Integration tests for the external sort: partitions, k-way merge and
//! spill-file cleanup.

use bamforge::io::bam::{CoordinateKey, Partition, PartitionBuilder, SortKey, SortOptions, SortedMerge};
use bamforge::Result;
use proptest::prelude::*;

fn partitions<K: SortKey + Clone>(runs: &[&[K]], dir: &std::path::Path) -> Result<(Vec<Partition<K>>, Vec<K>)> {
    let mut keys = Vec::new();
    let mut partitions = Vec::new();
    for run in runs {
        let rows: Vec<(K, u64)> = run
            .iter()
            .map(|key| {
                keys.push(key.clone());
                (key.clone(), keys.len() as u64 - 1)
            })
            .collect();
        partitions.push(Partition::from_sorted_rows(&rows, Some(dir))?);
    }
    Ok((partitions, keys))
}

fn merged_keys<K: SortKey + Clone>(runs: &[&[K]]) -> Result<Vec<K>> {
    let dir = tempfile::tempdir()?;
    let (partitions, keys) = partitions(runs, dir.path())?;
    let order = SortedMerge::new(partitions)?.collect::<Result<Vec<u64>>>()?;
    Ok(order.into_iter().map(|i| keys[i as usize].clone()).collect())
}

#[test]
fn test_read_name_merge() -> Result<()> {
    let names = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let (a, b, c) = (names(&["a", "c", "e"]), names(&["b", "d"]), names(&["f"]));
    let merged = merged_keys(&[&a[..], &b[..], &c[..]])?;
    assert_eq!(merged, names(&["a", "b", "c", "d", "e", "f"]));
    Ok(())
}

#[test]
fn test_coordinate_merge() -> Result<()> {
    let key = |position| CoordinateKey { reference: 0, position };
    let merged = merged_keys(&[&[key(1), key(5), key(9)][..], &[key(2), key(3)][..], &[key(4)][..]])?;
    let positions: Vec<u32> = merged.iter().map(|k| k.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4, 5, 9]);
    Ok(())
}

#[test]
fn test_empty_partition_list() -> Result<()> {
    let mut merge = SortedMerge::<u64>::new(Vec::new())?;
    assert!(merge.next().is_none());
    Ok(())
}

#[test]
fn test_partitions_removed_after_early_stop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = SortOptions::default()
        .with_spill_threshold(3)
        .with_temp_dir(dir.path());
    let mut builder = PartitionBuilder::new(&options);
    for i in 0..10u64 {
        builder.push(format!("read{:02}", 9 - i), i)?;
    }

    let mut merge = builder.finish()?;
    assert_eq!(merge.partition_count(), 4);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 4);

    assert_eq!(merge.next().transpose()?, Some(9));
    assert_eq!(merge.next().transpose()?, Some(8));
    drop(merge);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_close_removes_partitions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (partitions, _) = partitions(&[&[1u32, 2][..], &[3u32][..]], dir.path())?;
    let merge = SortedMerge::new(partitions)?;
    let paths = merge.partition_paths();
    merge.close()?;
    assert!(paths.iter().all(|path| !path.exists()));
    Ok(())
}

proptest! {
    #[test]
    fn test_merge_is_a_stable_sort(keys in proptest::collection::vec(0u32..50, 0..200), threshold in 1usize..40) {
        let dir = tempfile::tempdir().unwrap();
        let options = SortOptions::default()
            .with_spill_threshold(threshold)
            .with_temp_dir(dir.path());
        let mut builder = PartitionBuilder::new(&options);
        for (index, key) in keys.iter().enumerate() {
            builder.push(*key, index as u64).unwrap();
        }
        let order = builder.finish().unwrap().collect::<Result<Vec<u64>>>().unwrap();

        let mut expected: Vec<u64> = (0..keys.len() as u64).collect();
        expected.sort_by_key(|&i| keys[i as usize]);
        prop_assert_eq!(order, expected);
    }
}
