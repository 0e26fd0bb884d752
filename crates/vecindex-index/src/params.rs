//! Typed per-kind parameters parsed from a [`Config`].
//!
//! Parsing is the validation step: every backend parses its parameter struct
//! before touching data, so a bad config fails `train` with `InvalidConfig`
//! and leaves the index untrained.

use vecindex_core::{keys, Config, IndexError, IndexResult, Metric};

/// Default buckets scanned per query when `nprobe` is absent.
pub const DEFAULT_NPROBE: usize = 8;
/// Default Lloyd iterations for k-means training.
pub const DEFAULT_NITER: usize = 10;
/// Default k-means seed.
pub const DEFAULT_SEED: u64 = 1234;
/// Training sample cap per centroid.
pub const MAX_POINTS_PER_CENTROID: usize = 256;

/// Largest accepted result width.
pub const MAX_TOPK: usize = 1 << 16;

/// Default HNSW connectivity (M).
pub const DEFAULT_HNSW_M: usize = 16;
/// Default HNSW construction beam width.
pub const DEFAULT_EF_CONSTRUCTION: usize = 128;
/// Default HNSW search beam width.
pub const DEFAULT_EF_SEARCH: usize = 64;

fn parse_dim(config: &Config) -> IndexResult<usize> {
    let dim = config.require_usize(keys::DIM)?;
    if dim == 0 {
        return Err(IndexError::config("dim must be > 0"));
    }
    Ok(dim)
}

fn positive(config: &Config, key: &str, default: usize) -> IndexResult<usize> {
    match config.get_usize(key)? {
        Some(0) => Err(IndexError::config(format!("{} must be > 0", key))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

/// Exhaustive index parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatParams {
    pub dim: usize,
    pub metric: Metric,
}

impl FlatParams {
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        Ok(Self {
            dim: parse_dim(config)?,
            metric: config.metric()?,
        })
    }
}

/// Inverted-file parameters (IVF_FLAT, IVF_SQ8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfParams {
    pub dim: usize,
    pub metric: Metric,
    /// Number of buckets (k-means centroids).
    pub nlist: usize,
    /// Buckets scanned per query, at most `nlist`.
    pub nprobe: usize,
    pub niter: usize,
    pub seed: u64,
}

impl IvfParams {
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        let dim = parse_dim(config)?;
        let nlist = config.require_usize(keys::NLIST)?;
        if nlist == 0 {
            return Err(IndexError::config("nlist must be > 0"));
        }
        let nprobe = positive(config, keys::NPROBE, DEFAULT_NPROBE)?.min(nlist);
        let seed = match config.get_i64(keys::SEED)? {
            Some(s) if s < 0 => {
                return Err(IndexError::config(format!("seed must be >= 0, got {}", s)))
            }
            Some(s) => s as u64,
            None => DEFAULT_SEED,
        };
        Ok(Self {
            dim,
            metric: config.metric()?,
            nlist,
            nprobe,
            niter: positive(config, keys::NITER, DEFAULT_NITER)?,
            seed,
        })
    }
}

/// Graph index parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    pub dim: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl HnswParams {
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        Ok(Self {
            dim: parse_dim(config)?,
            metric: config.metric()?,
            m: positive(config, keys::HNSW_M, DEFAULT_HNSW_M)?,
            ef_construction: positive(config, keys::EF_CONSTRUCTION, DEFAULT_EF_CONSTRUCTION)?,
            ef_search: positive(config, keys::EF, DEFAULT_EF_SEARCH)?,
        })
    }
}

/// Per-query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Result width.
    pub k: usize,
    /// Overrides the trained `nprobe` for IVF kinds.
    pub nprobe: Option<usize>,
    /// Widens the HNSW search beam; at or below the trained `ef` it has no
    /// effect.
    pub ef: Option<usize>,
}

impl SearchParams {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            nprobe: None,
            ef: None,
        }
    }

    /// # Errors
    ///
    /// `InvalidConfig` if `k` (or `topK`) is missing, zero or above
    /// [`MAX_TOPK`], or an override is zero.
    pub fn from_config(config: &Config) -> IndexResult<Self> {
        let nonzero = |key: &str| -> IndexResult<Option<usize>> {
            match config.get_usize(key)? {
                Some(0) => Err(IndexError::config(format!("{} must be > 0", key))),
                other => Ok(other),
            }
        };
        let k = config.top_k()?;
        if k > MAX_TOPK {
            return Err(IndexError::config(format!(
                "k must be <= {}, got {}",
                MAX_TOPK, k
            )));
        }
        Ok(Self {
            k,
            nprobe: nonzero(keys::NPROBE)?,
            ef: nonzero(keys::EF)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ivf_defaults() {
        let c = Config::new().with(keys::DIM, 16).with(keys::NLIST, 4);
        let p = IvfParams::from_config(&c).unwrap();
        assert_eq!(p.nlist, 4);
        // nprobe is capped at nlist
        assert_eq!(p.nprobe, 4);
        assert_eq!(p.niter, DEFAULT_NITER);
        assert_eq!(p.seed, DEFAULT_SEED);
        assert_eq!(p.metric, Metric::L2);
    }

    #[test]
    fn test_ivf_requires_nlist() {
        let c = Config::new().with(keys::DIM, 16);
        let err = IvfParams::from_config(&c).unwrap_err();
        assert!(err.to_string().contains("nlist"));
    }

    #[test]
    fn test_missing_dim() {
        let err = FlatParams::from_config(&Config::new()).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_values_rejected() {
        let c = Config::new().with(keys::DIM, 0);
        assert!(FlatParams::from_config(&c).is_err());
        let c = Config::new()
            .with(keys::DIM, 8)
            .with(keys::NLIST, 2)
            .with(keys::NPROBE, 0);
        assert!(IvfParams::from_config(&c).is_err());
        let c = Config::new().with(keys::DIM, 8).with(keys::HNSW_M, 0);
        assert!(HnswParams::from_config(&c).is_err());
    }

    #[test]
    fn test_search_params() {
        let c = Config::new().with(keys::TOPK_ALIAS, 10).with(keys::EF, 32);
        let p = SearchParams::from_config(&c).unwrap();
        assert_eq!(p.k, 10);
        assert_eq!(p.ef, Some(32));
        assert_eq!(p.nprobe, None);

        assert!(SearchParams::from_config(&Config::new()).is_err());
        assert!(SearchParams::from_config(&Config::new().with(keys::TOPK, 0)).is_err());
        assert!(SearchParams::from_config(&Config::new().with(keys::TOPK, MAX_TOPK)).is_ok());
        assert!(matches!(
            SearchParams::from_config(&Config::new().with(keys::TOPK, MAX_TOPK + 1)),
            Err(IndexError::InvalidConfig(_))
        ));
        assert!(matches!(
            SearchParams::from_config(&Config::new().with(keys::TOPK, i64::MAX)),
            Err(IndexError::InvalidConfig(_))
        ));
    }
}
