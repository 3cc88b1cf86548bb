use serde::{Deserialize, Serialize};

/// Tunables for a [`BonusSystem`](crate::system::BonusSystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusConfig {
    /// Memoize individual formula results per source. Effect and resource
    /// values are always memoized.
    pub memoize_formulas: bool,
    /// Upper bound on memoized formula results per source. When a source's
    /// table is full it is cleared before the next insert.
    pub max_formula_entries_per_source: usize,
    /// Log a warning when an unregistered effect or resource is queried.
    pub warn_on_soft_miss: bool,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            memoize_formulas: true,
            max_formula_entries_per_source: 256,
            warn_on_soft_miss: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BonusConfig::default();
        assert!(config.memoize_formulas);
        assert_eq!(config.max_formula_entries_per_source, 256);
        assert!(config.warn_on_soft_miss);
    }
}
