//! Index state machine tests across every supported kind and mode.

mod common;

use vecindex_core::{index_enum, keys, Config, IndexError, IndexMode};
use vecindex_device::DeviceConfig;
use vecindex_index::{IndexFactory, IndexState};

use common::{build, factory, manager_with_device, random_dataset, top_k, train_config, SUPPORTED};

#[test]
fn test_out_of_order_operations_fail() {
    common::init_tracing();
    let manager = manager_with_device(0, 2);
    let factory = factory(&manager);
    let data = random_dataset(64, 8, 7);

    for (kind, mode) in SUPPORTED {
        println!("kind={} mode={}", kind, mode);
        let mut index = factory.create(kind, mode).expect("create failed");
        assert_eq!(index.state(), IndexState::Untrained);

        assert!(
            matches!(index.add(&data), Err(IndexError::IndexNotTrained)),
            "{} {}: add before train",
            kind,
            mode
        );
        assert!(
            matches!(
                index.query(&data, &top_k(1), None),
                Err(IndexError::IndexNotReady)
            ),
            "{} {}: query before build",
            kind,
            mode
        );
        assert!(matches!(
            index.serialize(&Config::new()),
            Err(IndexError::IndexNotBuilt)
        ));
        assert_eq!(index.count(), 0);
        assert!(matches!(index.dim(), Err(IndexError::IndexEmpty)));

        index
            .train(&data, &train_config(8, 4))
            .expect("train failed");
        assert!(matches!(
            index.query(&data, &top_k(1), None),
            Err(IndexError::IndexNotReady)
        ));
        assert!(matches!(
            index.serialize(&Config::new()),
            Err(IndexError::IndexNotBuilt)
        ));

        index.add(&data).expect("add failed");
        assert_eq!(index.state(), IndexState::Built);
        assert_eq!(index.count(), 64);
        assert_eq!(index.dim().expect("dim"), 8);
    }

    // Every lease taken along the way was returned.
    assert_eq!(manager.dump()[0].in_use, 0);
}

#[test]
fn test_retrain_rejected_for_every_kind() {
    let manager = manager_with_device(0, 1);
    let factory = factory(&manager);
    let data = random_dataset(32, 4, 1);

    for (kind, mode) in SUPPORTED {
        let mut index = build(&factory, kind, mode, &data);
        assert!(
            matches!(
                index.train(&data, &train_config(4, 4)),
                Err(IndexError::InvalidConfig(_))
            ),
            "{} {}: re-train",
            kind,
            mode
        );
        assert_eq!(index.count(), 32);
    }
}

#[test]
fn test_train_config_errors() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(16, 4, 2);

    let mut index = factory.create(index_enum::IVF_FLAT, IndexMode::Cpu).unwrap();
    // nlist missing
    assert!(matches!(
        index.train(&data, &Config::new().with(keys::DIM, 4)),
        Err(IndexError::InvalidConfig(_))
    ));
    // fewer rows than lists
    assert!(matches!(
        index.train(&data, &train_config(4, 32)),
        Err(IndexError::InvalidConfig(_))
    ));
    // dimensionality disagrees with the data
    assert!(matches!(
        index.train(&data, &train_config(8, 2)),
        Err(IndexError::DimensionMismatch { expected: 8, actual: 4 })
    ));
    assert_eq!(index.state(), IndexState::Untrained);

    index.train(&data, &train_config(4, 2)).unwrap();
    assert_eq!(index.state(), IndexState::Trained);
}

#[test]
fn test_add_accumulates_and_checks_dim() {
    let factory = IndexFactory::with_defaults();
    let mut index = build(
        &factory,
        index_enum::IVF_SQ8,
        IndexMode::Cpu,
        &random_dataset(40, 4, 3),
    );
    index.add(&random_dataset(10, 4, 4)).unwrap();
    assert_eq!(index.count(), 50);

    assert!(matches!(
        index.add(&random_dataset(5, 6, 5)),
        Err(IndexError::DimensionMismatch { expected: 4, actual: 6 })
    ));
}

#[test]
fn test_query_validation() {
    let factory = IndexFactory::with_defaults();
    let data = random_dataset(20, 4, 6);
    let index = build(&factory, index_enum::FLAT, IndexMode::Cpu, &data);

    assert!(matches!(
        index.query(&data, &Config::new(), None),
        Err(IndexError::InvalidConfig(_))
    ));
    assert!(matches!(
        index.query(&random_dataset(1, 3, 0), &top_k(1), None),
        Err(IndexError::DimensionMismatch { expected: 4, actual: 3 })
    ));

    // topK is accepted as an alias of k.
    let alias = Config::new().with(keys::TOPK_ALIAS, 2);
    let result = index.query(&data, &alias, None).unwrap();
    assert_eq!(result.k(), 2);
    assert_eq!(result.nq(), 20);
}

#[test]
fn test_gpu_train_on_uninitialized_device() {
    let manager = manager_with_device(0, 1);
    let factory = factory(&manager);
    let data = random_dataset(16, 4, 8);

    let mut index = factory.create(index_enum::FLAT, IndexMode::Gpu).unwrap();
    let conf = train_config(4, 2).with(keys::GPU_ID, 3);
    assert!(matches!(
        index.train(&data, &conf),
        Err(IndexError::InvalidDevice(3))
    ));
    assert_eq!(index.state(), IndexState::Untrained);
    // The failed train keeps the original binding, so a plain retry works.
    assert_eq!(index.device_id(), Some(0));
    index.train(&data, &train_config(4, 2)).expect("retrain failed");
    assert_eq!(index.state(), IndexState::Trained);
    assert_eq!(index.device_id(), Some(0));
    assert_eq!(manager.dump()[0].in_use, 0);
}

#[test]
fn test_gpu_train_rebinds_to_requested_device() {
    let manager = manager_with_device(0, 1);
    manager
        .init_device(DeviceConfig::for_device(1))
        .expect("init_device failed");
    let factory = factory(&manager);
    let data = random_dataset(16, 4, 10);

    let mut index = factory.create(index_enum::FLAT, IndexMode::Gpu).unwrap();
    index
        .train(&data, &train_config(4, 2).with(keys::GPU_ID, 1))
        .expect("train failed");
    assert_eq!(index.device_id(), Some(1));

    let stats = manager.stats(1).expect("device 1 has a pool");
    assert_eq!(stats.total_acquires, 1);
    assert_eq!(manager.stats(0).expect("device 0 has a pool").total_acquires, 0);
}

#[test]
fn test_gpu_query_after_free_fails() {
    let manager = manager_with_device(0, 1);
    let factory = factory(&manager);
    let data = random_dataset(16, 4, 9);
    let index = build(&factory, index_enum::FLAT, IndexMode::Gpu, &data);

    manager.free();
    assert!(matches!(
        index.query(&data, &top_k(1), None),
        Err(IndexError::InvalidDevice(0))
    ));
}
