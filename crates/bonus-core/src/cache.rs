use crate::id::*;
use crate::registry::ModifierCategory;
use crate::resource::ResourceValue;
use crate::state::SourceState;
use std::collections::HashMap;

/// Inputs of one memoized formula evaluation.
///
/// Floats are keyed by their bit patterns so that identical inputs hash
/// identically. The modifier itself is identified by its category and target
/// alongside the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaKey {
    pub level: u32,
    pub efficiency_bits: u64,
    pub deps_bits: Vec<u64>,
}

impl FormulaKey {
    pub fn new(state: &SourceState, deps: &[f64]) -> Self {
        Self {
            level: state.level,
            efficiency_bits: state.efficiency.to_bits(),
            deps_bits: deps.iter().map(|d| d.to_bits()).collect(),
        }
    }
}

/// Memoized formula results of one source, grouped by modifier. Lookups
/// borrow the target id; only the first insert for a modifier allocates it.
#[derive(Debug, Clone, Default)]
struct SourceFormulas {
    modifiers: HashMap<ModifierCategory, HashMap<String, HashMap<FormulaKey, f64>>>,
    len: usize,
}

impl SourceFormulas {
    fn get(&self, category: ModifierCategory, target: &str, key: &FormulaKey) -> Option<f64> {
        self.modifiers.get(&category)?.get(target)?.get(key).copied()
    }

    fn insert(&mut self, category: ModifierCategory, target: &str, key: FormulaKey, value: f64) {
        let targets = self.modifiers.entry(category).or_default();
        if !targets.contains_key(target) {
            targets.insert(target.to_string(), HashMap::new());
        }
        let Some(results) = targets.get_mut(target) else {
            return;
        };
        if results.insert(key, value).is_none() {
            self.len += 1;
        }
    }
}

/// Hit / miss / eviction counters for the three caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub formula_hits: u64,
    pub formula_misses: u64,
    pub effect_hits: u64,
    pub effect_misses: u64,
    pub resource_hits: u64,
    pub resource_misses: u64,
    /// Entries removed by targeted invalidation.
    pub evictions: u64,
}

/// The three memo tables of the bonus system.
///
/// Formula results are grouped by source so that invalidating a source drops
/// all of its entries at once.
#[derive(Debug, Clone, Default)]
pub struct BonusCaches {
    formula_results: HashMap<SourceId, SourceFormulas>,
    effect_values: HashMap<EffectId, f64>,
    resource_values: HashMap<ResourceId, ResourceValue>,
    stats: CacheStats,
}

impl BonusCaches {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Formula results
    // -----------------------------------------------------------------------

    pub fn formula(
        &mut self,
        source: &str,
        category: ModifierCategory,
        target: &str,
        key: &FormulaKey,
    ) -> Option<f64> {
        let hit = self
            .formula_results
            .get(source)
            .and_then(|table| table.get(category, target, key));
        match hit {
            Some(_) => self.stats.formula_hits += 1,
            None => self.stats.formula_misses += 1,
        }
        hit
    }

    /// Memoize a formula result, clearing the source's table first if it
    /// already holds `limit` entries.
    pub fn insert_formula(
        &mut self,
        source: &SourceId,
        category: ModifierCategory,
        target: &str,
        key: FormulaKey,
        value: f64,
        limit: usize,
    ) {
        if limit == 0 {
            return;
        }
        if !self.formula_results.contains_key(source) {
            self.formula_results
                .insert(source.clone(), SourceFormulas::default());
        }
        let Some(table) = self.formula_results.get_mut(source) else {
            return;
        };
        if table.len >= limit {
            *table = SourceFormulas::default();
        }
        table.insert(category, target, key, value);
    }

    pub fn formula_entries(&self, source: &str) -> usize {
        self.formula_results.get(source).map_or(0, |table| table.len)
    }

    // -----------------------------------------------------------------------
    // Effect values
    // -----------------------------------------------------------------------

    pub fn effect(&mut self, id: &str) -> Option<f64> {
        let hit = self.effect_values.get(id).copied();
        match hit {
            Some(_) => self.stats.effect_hits += 1,
            None => self.stats.effect_misses += 1,
        }
        hit
    }

    /// Read a cached effect value without touching the counters.
    pub fn peek_effect(&self, id: &str) -> Option<f64> {
        self.effect_values.get(id).copied()
    }

    pub fn insert_effect(&mut self, id: EffectId, value: f64) {
        self.effect_values.insert(id, value);
    }

    pub fn is_effect_cached(&self, id: &str) -> bool {
        self.effect_values.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Resource values
    // -----------------------------------------------------------------------

    pub fn resource(&mut self, id: &str) -> Option<ResourceValue> {
        let hit = self.resource_values.get(id).copied();
        match hit {
            Some(_) => self.stats.resource_hits += 1,
            None => self.stats.resource_misses += 1,
        }
        hit
    }

    pub fn insert_resource(&mut self, id: ResourceId, value: ResourceValue) {
        self.resource_values.insert(id, value);
    }

    pub fn is_resource_cached(&self, id: &str) -> bool {
        self.resource_values.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Evict the entries of every node in `targets`. Returns how many
    /// entries were removed.
    pub fn invalidate(&mut self, targets: &[NodeKey]) -> usize {
        let mut evicted = 0;
        for key in targets {
            match key {
                NodeKey::Source(id) => {
                    if let Some(table) = self.formula_results.remove(id) {
                        evicted += table.len;
                    }
                }
                NodeKey::Effect(id) => {
                    if self.effect_values.remove(id).is_some() {
                        evicted += 1;
                    }
                }
                NodeKey::Resource(id) => {
                    if self.resource_values.remove(id).is_some() {
                        evicted += 1;
                    }
                }
            }
        }
        self.stats.evictions += evicted as u64;
        evicted
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.formula_results.clear();
        self.effect_values.clear();
        self.resource_values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.formula_results.values().all(|table| table.len == 0)
            && self.effect_values.is_empty()
            && self.resource_values.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
