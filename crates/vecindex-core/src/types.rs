//! Index kind identifiers, execution modes and distance metrics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// Opaque name of a backend algorithm family.
///
/// Immutable once an index is constructed. Any string is a valid identifier;
/// whether a backend exists for it is decided by the factory registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexType(String);

impl IndexType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IndexType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Well-known index kind names.
pub mod index_enum {
    pub const INVALID: &str = "";

    pub const BIN_FLAT: &str = "BIN_FLAT";
    pub const BIN_IVF_FLAT: &str = "BIN_IVF_FLAT";

    pub const FLAT: &str = "FLAT";
    pub const IVF_FLAT: &str = "IVF_FLAT";
    pub const IVF_PQ: &str = "IVF_PQ";
    pub const IVF_SQ8: &str = "IVF_SQ8";
    pub const IVF_SQ8_HYBRID: &str = "IVF_SQ8_HYBRID";
    pub const IVF_HNSW: &str = "IVF_HNSW";

    pub const ANNOY: &str = "ANNOY";
    pub const HNSW: &str = "HNSW";
    pub const RHNSW_FLAT: &str = "RHNSW_FLAT";
    pub const RHNSW_PQ: &str = "RHNSW_PQ";
    pub const RHNSW_SQ: &str = "RHNSW_SQ";
    pub const NSG: &str = "NSG";
}

/// Where an index executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexMode {
    Cpu,
    Gpu,
}

impl IndexMode {
    pub const fn name(&self) -> &'static str {
        match self {
            IndexMode::Cpu => "CPU",
            IndexMode::Gpu => "GPU",
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Distance metric used for ranking.
///
/// `L2` ranks by ascending squared Euclidean distance, `InnerProduct` by
/// descending dot product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Metric {
    #[default]
    L2,
    InnerProduct,
}

impl Metric {
    /// Parse the config spelling (`"L2"` / `"IP"`), case-insensitive.
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(Metric::L2),
            "IP" => Ok(Metric::InnerProduct),
            other => Err(IndexError::config(format!(
                "unknown metric '{}' (expected L2 or IP)",
                other
            ))),
        }
    }

    /// Distance between two equal-length vectors under this metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            Metric::InnerProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }

    /// True when `a` ranks strictly ahead of `b`.
    #[inline]
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        match self {
            Metric::L2 => a < b,
            Metric::InnerProduct => a > b,
        }
    }

    /// Distance reported in padded (sentinel) result slots.
    #[inline]
    pub const fn worst(&self) -> f32 {
        match self {
            Metric::L2 => f32::MAX,
            Metric::InnerProduct => f32::MIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_type_display() {
        let t = IndexType::from(index_enum::IVF_FLAT);
        assert_eq!(t.to_string(), "IVF_FLAT");
        assert_eq!(t.as_str(), "IVF_FLAT");
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!(Metric::parse("l2").unwrap(), Metric::L2);
        assert_eq!(Metric::parse("IP").unwrap(), Metric::InnerProduct);
        assert!(matches!(
            Metric::parse("cosine"),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_metric_distance() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0];
        assert_eq!(Metric::L2.distance(&a, &b), 8.0);
        assert_eq!(Metric::InnerProduct.distance(&a, &b), 11.0);
    }

    #[test]
    fn test_metric_ordering() {
        assert!(Metric::L2.is_better(1.0, 2.0));
        assert!(Metric::InnerProduct.is_better(2.0, 1.0));
        assert!(!Metric::L2.is_better(Metric::L2.worst(), 0.0));
        assert!(!Metric::InnerProduct.is_better(Metric::InnerProduct.worst(), 0.0));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(IndexMode::Cpu.to_string(), "CPU");
        assert_eq!(IndexMode::Gpu.to_string(), "GPU");
    }
}
