//! Filtered query execution tests.

mod common;

use std::sync::Arc;
use std::thread;

use vecindex_core::{index_enum, keys, Bitset, BitsetView, Config, Dataset, IndexError, IndexMode, SENTINEL_ID};
use vecindex_index::{IndexFactory, MAX_TOPK};

use common::{build, factory, manager_with_device, random_dataset, top_k, SUPPORTED};

fn assert_sorted_ascending(distances: &[f32]) {
    for pair in distances.windows(2) {
        assert!(pair[0] <= pair[1], "distances not ascending: {:?}", distances);
    }
}

#[test]
fn test_excluded_rows_never_returned() {
    common::init_tracing();
    let manager = manager_with_device(0, 2);
    let factory = factory(&manager);
    let data = random_dataset(200, 8, 11);
    let queries = random_dataset(6, 8, 12);

    // Exclude every even row.
    let mut bits = Bitset::new(200);
    for i in (0..200).step_by(2) {
        bits.set(i);
    }

    for (kind, mode) in SUPPORTED {
        println!("kind={} mode={}", kind, mode);
        let index = build(&factory, kind, mode, &data);
        let result = index
            .query(&queries, &top_k(10), Some(bits.view()))
            .expect("query failed");
        for q in 0..queries.rows() {
            let ids = result.row_ids(q);
            assert!(
                ids.iter().all(|&id| id == SENTINEL_ID || id % 2 == 1),
                "{} {}: excluded row returned: {:?}",
                kind,
                mode,
                ids
            );
            assert_sorted_ascending(&result.row_distances(q)[..result.num_valid_results(q)]);
        }
    }
}

#[test]
fn test_all_excluded_returns_sentinels() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(30, 4, 13);
    let mut bits = Bitset::new(30);
    for i in 0..30 {
        bits.set(i);
    }

    for kind in [index_enum::FLAT, index_enum::IVF_FLAT, index_enum::HNSW] {
        let index = build(&factory, kind, IndexMode::Cpu, &data);
        let result = index
            .query(&random_dataset(2, 4, 14), &top_k(5), Some(bits.view()))
            .unwrap();
        assert_eq!(result.ids(), &[SENTINEL_ID; 10]);
        assert!(result.distances().iter().all(|&d| d == f32::MAX));
    }
}

#[test]
fn test_short_bitset_rejected_longer_accepted() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(20, 4, 15);
    let index = build(&factory, index_enum::FLAT, IndexMode::Cpu, &data);

    let short = Bitset::new(19);
    assert!(matches!(
        index.query(&data, &top_k(1), Some(short.view())),
        Err(IndexError::DimensionMismatch { expected: 20, actual: 19 })
    ));

    let long = Bitset::new(64);
    let result = index.query(&data, &top_k(1), Some(long.view())).unwrap();
    for q in 0..20 {
        assert_eq!(result.row_ids(q), &[q as i64]);
    }
}

#[test]
fn test_caller_owned_bitset_bytes() {
    let factory = IndexFactory::with_defaults();
    let data = Dataset::from_flat(1, (0..16).map(|i| i as f32).collect::<Vec<_>>()).unwrap();
    let index = build(&factory, index_enum::FLAT, IndexMode::Cpu, &data);

    // Rows 0..8 excluded.
    let bytes = [0xffu8, 0x00];
    let view = BitsetView::new(&bytes, 16).expect("view");
    let query = Dataset::from_flat(1, vec![0.0f32]).unwrap();
    let result = index.query(&query, &top_k(3), Some(view)).unwrap();
    assert_eq!(result.row_ids(0), &[8, 9, 10]);
}

#[test]
fn test_k_larger_than_count_is_padded() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(3, 4, 16);
    let index = build(&factory, index_enum::FLAT, IndexMode::Cpu, &data);

    let result = index.query(&data, &top_k(5), None).unwrap();
    for q in 0..3 {
        assert_eq!(result.num_valid_results(q), 3);
        assert_eq!(&result.row_ids(q)[3..], &[SENTINEL_ID, SENTINEL_ID]);
        assert_eq!(result.top_result(q), Some((q as i64, 0.0)));
        assert!(result.query_results(q).all(|(id, _)| id != SENTINEL_ID));
    }
    assert_eq!(result.all_results().count(), 9);
}

#[test]
fn test_oversized_k_rejected() {
    let manager = manager_with_device(0, 1);
    let factory = factory(&manager);
    let data = random_dataset(8, 4, 21);

    for (kind, mode) in SUPPORTED {
        let index = build(&factory, kind, mode, &data);
        for k in [i64::MAX, MAX_TOPK as i64 + 1] {
            let conf = Config::new().with(keys::TOPK, k);
            assert!(
                matches!(index.query(&data, &conf, None), Err(IndexError::InvalidConfig(_))),
                "{} {}: k = {} accepted",
                kind,
                mode,
                k
            );
        }
    }
    assert_eq!(manager.stats(0).unwrap().in_use, 0);
}

#[test]
fn test_inner_product_descending() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(100, 8, 17);
    let mut index = factory.create(index_enum::FLAT, IndexMode::Cpu).unwrap();
    index
        .train(&data, &Config::new().with(keys::DIM, 8).with(keys::METRIC, "IP"))
        .unwrap();
    index.add(&data).unwrap();

    let result = index.query(&random_dataset(1, 8, 18), &top_k(10), None).unwrap();
    for pair in result.row_distances(0).windows(2) {
        assert!(pair[0] >= pair[1]);
    }
}

#[test]
fn test_gpu_matches_cpu_rankings() {
    let manager = manager_with_device(0, 1);
    let factory = factory(&manager);
    let data = random_dataset(500, 16, 19);
    // More queries than one staging batch holds.
    let queries = random_dataset(1500, 16, 20);

    for kind in [index_enum::FLAT, index_enum::IVF_FLAT, index_enum::IVF_SQ8] {
        let cpu = build(&factory, kind, IndexMode::Cpu, &data);
        let gpu = build(&factory, kind, IndexMode::Gpu, &data);
        let a = cpu.query(&queries, &top_k(5), None).unwrap();
        let b = gpu.query(&queries, &top_k(5), None).unwrap();
        assert_eq!(a.ids(), b.ids(), "{} rankings differ", kind);
    }
    assert_eq!(manager.dump()[0].in_use, 0);
}

#[test]
fn test_concurrent_queries() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(300, 8, 21);
    let index = Arc::new(build(&factory, index_enum::IVF_FLAT, IndexMode::Cpu, &data));
    let expected = index.query(&data, &top_k(3), None).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let index = Arc::clone(&index);
            let data = data.clone();
            thread::spawn(move || index.query(&data, &top_k(3), None).expect("query failed"))
        })
        .collect();
    for handle in handles {
        let result = handle.join().expect("query thread panicked");
        assert_eq!(result, expected);
    }
}

#[test]
fn test_concurrent_gpu_queries_share_pool() {
    let manager = manager_with_device(0, 2);
    let factory = factory(&manager);
    let data = random_dataset(100, 8, 22);
    let index = Arc::new(build(&factory, index_enum::FLAT, IndexMode::Gpu, &data));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let index = Arc::clone(&index);
            let data = data.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let r = index.query(&data, &top_k(1), None).expect("query failed");
                    assert_eq!(r.row_ids(7), &[7]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("query thread panicked");
    }
    let snapshot = &manager.dump()[0];
    assert_eq!(snapshot.in_use, 0);
    // train + add + 60 queries
    assert_eq!(snapshot.total_acquires, 62);
}
