//! Shared fixtures for index integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use vecindex_core::{index_enum, keys, Config, Dataset, IndexMode};
use vecindex_device::{DeviceConfig, DeviceResourceManager};
use vecindex_index::{Index, IndexFactory};

/// Every registered (kind, mode) pair.
pub const SUPPORTED: [(&str, IndexMode); 7] = [
    (index_enum::FLAT, IndexMode::Cpu),
    (index_enum::FLAT, IndexMode::Gpu),
    (index_enum::IVF_FLAT, IndexMode::Cpu),
    (index_enum::IVF_FLAT, IndexMode::Gpu),
    (index_enum::IVF_SQ8, IndexMode::Cpu),
    (index_enum::IVF_SQ8, IndexMode::Gpu),
    (index_enum::HNSW, IndexMode::Cpu),
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Uniform [0, 1) vectors from a fixed seed.
pub fn random_dataset(rows: usize, dim: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let tensor: Vec<f32> = (0..rows * dim).map(|_| rng.gen::<f32>()).collect();
    Dataset::from_flat(dim, tensor).expect("dataset construction failed")
}

pub fn manager_with_device(device_id: i64, resources: usize) -> Arc<DeviceResourceManager> {
    let manager = DeviceResourceManager::new();
    manager
        .init_device(DeviceConfig::new(device_id, 64 * 1024, 16 * 1024, resources))
        .expect("init_device failed");
    Arc::new(manager)
}

pub fn factory(manager: &Arc<DeviceResourceManager>) -> IndexFactory {
    IndexFactory::with_defaults().with_device_manager(Arc::clone(manager))
}

/// Train config that suits every kind at `dim`.
pub fn train_config(dim: usize, nlist: usize) -> Config {
    Config::new()
        .with(keys::DIM, dim)
        .with(keys::NLIST, nlist)
        .with(keys::NPROBE, nlist)
}

pub fn build(factory: &IndexFactory, kind: &str, mode: IndexMode, data: &Dataset) -> Index {
    let mut index = factory.create(kind, mode).expect("create failed");
    index
        .train(data, &train_config(data.dim(), 4))
        .expect("train failed");
    index.add(data).expect("add failed");
    index
}

pub fn top_k(k: usize) -> Config {
    Config::new().with(keys::TOPK, k)
}
