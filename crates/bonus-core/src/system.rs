use crate::cache::{BonusCaches, CacheStats, FormulaKey};
use crate::config::BonusConfig;
use crate::graph::{DependencyGraph, GraphError, format_cycles};
use crate::id::*;
use crate::registry::{
    EffectContribution, EffectDef, ModifierCategory, Registry, ResourceContribution, SourceDef,
};
use crate::resource::ResourceValue;
use crate::state::SourceState;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the bonus system. All of them are fatal for the caller:
/// they indicate malformed catalog data or a programming error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BonusError {
    #[error("cyclic dependency: {}", format_cycles(.cycles))]
    CyclicDependency { cycles: Vec<Vec<NodeKey>> },
    #[error("unknown source: {0}")]
    UnknownSource(SourceId),
    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for BonusError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CyclicDependency { cycles } => BonusError::CyclicDependency { cycles },
            other => BonusError::Graph(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// Preview of one modifier of a source, for upgrade UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct BonusDetail {
    /// Whether the target is an effect or a resource.
    pub kind: NodeKind,
    pub id: String,
    /// Display name of the target effect, or the resource id.
    pub name: String,
    pub bonus_type: ModifierCategory,
    pub current_level_value: f64,
    pub next_level_value: f64,
}

/// One source's contribution to an effect.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceContribution {
    pub source: SourceId,
    pub kind: EffectContribution,
    pub value: f64,
}

/// How an effect value is put together.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectBreakdown {
    pub effect: EffectId,
    pub initial_value: f64,
    pub contributions: Vec<SourceContribution>,
    /// Sum of income contributions.
    pub income: f64,
    /// Product of multiplier contributions.
    pub multiplier: f64,
    /// `(initial_value + income) * multiplier`
    pub total: f64,
}

/// Running income sum and multiplier product of one effect.
#[derive(Debug, Clone, Copy)]
struct EffectTotals {
    income: f64,
    multiplier: f64,
}

impl Default for EffectTotals {
    fn default() -> Self {
        Self {
            income: EffectContribution::Income.aggregation().identity(),
            multiplier: EffectContribution::Multiplier.aggregation().identity(),
        }
    }
}

impl EffectTotals {
    fn apply(&mut self, kind: EffectContribution, value: f64) {
        let slot = match kind {
            EffectContribution::Income => &mut self.income,
            EffectContribution::Multiplier => &mut self.multiplier,
        };
        *slot = kind.aggregation().combine(*slot, value);
    }

    fn total(&self, initial_value: f64) -> f64 {
        (initial_value + self.income) * self.multiplier
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Registration phase of a bonus system.
///
/// Sources and effects can only be registered here; the dependency graph is
/// built once by [`build_dependency_graph`](Self::build_dependency_graph),
/// which consumes the builder. A system with a partially built or cyclic
/// graph therefore cannot exist.
#[derive(Debug, Clone, Default)]
pub struct BonusSystemBuilder {
    registry: Registry,
    config: BonusConfig,
}

impl BonusSystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: BonusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_source(&mut self, source: SourceDef) -> &mut Self {
        self.registry.register_source(source);
        self
    }

    pub fn register_effect(&mut self, effect: EffectDef) -> &mut Self {
        self.registry.register_effect(effect);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &BonusConfig {
        &self.config
    }

    /// Build the dependency graph and enter the runtime phase.
    pub fn build_dependency_graph(self) -> Result<BonusSystem, BonusError> {
        let graph = DependencyGraph::build(&self.registry)?;
        Ok(BonusSystem {
            registry: self.registry,
            graph,
            config: self.config,
            states: HashMap::new(),
            caches: BonusCaches::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// BonusSystem
// ---------------------------------------------------------------------------

/// The runtime bonus system: source states plus memoized effect and
/// resource values, kept consistent by targeted invalidation.
///
/// Queries take `&mut self` because they fill the caches. Every mutation
/// evicts exactly the entries in the source's update order before
/// returning, so a query always observes every earlier mutation.
#[derive(Debug, Clone)]
pub struct BonusSystem {
    registry: Registry,
    graph: DependencyGraph,
    config: BonusConfig,
    states: HashMap<SourceId, SourceState>,
    caches: BonusCaches,
}

impl BonusSystem {
    pub fn builder() -> BonusSystemBuilder {
        BonusSystemBuilder::new()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn config(&self) -> &BonusConfig {
        &self.config
    }

    pub fn caches(&self) -> &BonusCaches {
        &self.caches
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    /// Back to the registration phase. States and caches are dropped.
    pub fn into_builder(self) -> BonusSystemBuilder {
        BonusSystemBuilder {
            registry: self.registry,
            config: self.config,
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Create or overwrite the state of `id` and evict everything
    /// downstream of it.
    pub fn set_source_state(
        &mut self,
        id: &str,
        level: u32,
        efficiency: f64,
    ) -> Result<(), BonusError> {
        let Some(source) = self.registry.get_source(id) else {
            return Err(BonusError::UnknownSource(SourceId::from(id)));
        };
        let source_id = source.id.clone();
        self.states
            .insert(source_id, SourceState::new(level, efficiency));
        self.invalidate(id);
        Ok(())
    }

    /// Set the level of `id`, keeping its efficiency. Does nothing if the
    /// source already has a state at `level`.
    pub fn update_bonus_source_level(&mut self, id: &str, level: u32) -> Result<(), BonusError> {
        if !self.registry.is_source_registered(id) {
            return Err(BonusError::UnknownSource(SourceId::from(id)));
        }
        let efficiency = match self.states.get(id) {
            Some(state) if state.level == level => return Ok(()),
            Some(state) => state.efficiency,
            None => SourceState::default().efficiency,
        };
        self.set_source_state(id, level, efficiency)
    }

    /// Drop every source state and every cached value. The registry and
    /// graph are kept.
    pub fn reset(&mut self) {
        self.states.clear();
        self.caches.clear();
        tracing::info!("bonus system reset");
    }

    fn invalidate(&mut self, source: &str) {
        let targets = self.graph.update_order(source);
        let evicted = self.caches.invalidate(&targets);
        tracing::debug!(
            source,
            targets = targets.len(),
            evicted,
            "invalidated downstream caches"
        );
    }

    // -----------------------------------------------------------------------
    // State inspection
    // -----------------------------------------------------------------------

    pub fn source_state(&self, id: &str) -> Option<&SourceState> {
        self.states.get(id)
    }

    /// Every recorded state, in source registration order.
    pub fn source_states(&self) -> impl Iterator<Item = (&SourceId, &SourceState)> {
        self.registry
            .sources()
            .filter_map(|source| self.states.get_key_value(source.id.as_str()))
    }

    pub fn update_order(&self, source: &str) -> Vec<NodeKey> {
        self.graph.update_order(source)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The current value of an effect: `(initial + Σ income) × Π multiplier`
    /// over every source with a recorded state.
    ///
    /// An unregistered effect is a soft miss and resolves to 0.
    pub fn get_effect_value(&mut self, id: &str) -> f64 {
        let Some(effect) = self.registry.get_effect(id) else {
            self.soft_miss("effect", id);
            return 0.0;
        };
        let effect_id = effect.id.clone();
        let initial_value = effect.initial_value;
        if let Some(value) = self.caches.effect(id) {
            return value;
        }

        let mut totals = EffectTotals::default();
        let providers = self.graph.effect_providers(id).to_vec();
        for source in &providers {
            for kind in EffectContribution::ALL {
                if let Some(value) = self.contribution(source, ModifierCategory::Effect(kind), id) {
                    totals.apply(kind, value);
                }
            }
        }

        let value = totals.total(initial_value);
        tracing::trace!(effect = id, value, "effect value recomputed");
        self.caches.insert_effect(effect_id, value);
        value
    }

    /// The aggregate of every contribution to a resource.
    ///
    /// A resource no source contributes to is a soft miss and resolves to
    /// the neutral [`ResourceValue::default`].
    pub fn get_resource_value(&mut self, id: &str) -> ResourceValue {
        if self.graph.resource_providers(id).is_empty() {
            self.soft_miss("resource", id);
            return ResourceValue::default();
        }
        if let Some(value) = self.caches.resource(id) {
            return value;
        }
        let providers = self.graph.resource_providers(id).to_vec();

        let mut value = ResourceValue::default();
        for source in &providers {
            for kind in ResourceContribution::ALL {
                if let Some(v) = self.contribution(source, ModifierCategory::Resource(kind), id) {
                    value.apply(kind, v);
                }
            }
        }

        tracing::trace!(resource = id, ?value, "resource value recomputed");
        self.caches.insert_resource(ResourceId::from(id), value);
        value
    }

    /// Per-source contributions to an effect, with the resolved total.
    /// Returns `None` for an unregistered effect.
    pub fn effect_breakdown(&mut self, id: &str) -> Option<EffectBreakdown> {
        let Some(effect) = self.registry.get_effect(id) else {
            self.soft_miss("effect", id);
            return None;
        };
        let effect_id = effect.id.clone();
        let initial_value = effect.initial_value;

        let mut totals = EffectTotals::default();
        let mut contributions = Vec::new();
        let providers = self.graph.effect_providers(id).to_vec();
        for source in providers {
            for kind in EffectContribution::ALL {
                if let Some(value) = self.contribution(&source, ModifierCategory::Effect(kind), id) {
                    totals.apply(kind, value);
                    contributions.push(SourceContribution {
                        source: source.clone(),
                        kind,
                        value,
                    });
                }
            }
        }

        Some(EffectBreakdown {
            effect: effect_id,
            initial_value,
            contributions,
            income: totals.income,
            multiplier: totals.multiplier,
            total: totals.total(initial_value),
        })
    }

    /// Resolve every registered effect and every resource in dependency
    /// order, so the first queries of a session are cache hits.
    pub fn warm_caches(&mut self) {
        for key in self.graph.evaluation_order() {
            match key {
                NodeKey::Effect(id) if self.registry.is_effect_registered(id.as_str()) => {
                    self.get_effect_value(id.as_str());
                }
                NodeKey::Resource(id) => {
                    self.get_resource_value(id.as_str());
                }
                _ => {}
            }
        }
    }

    /// Current and next-level value of every modifier of `source`.
    ///
    /// Read-only: nothing is cached and no state is created. A source
    /// without a recorded state is previewed at level 0.
    pub fn get_bonus_details(&self, source: &str) -> Vec<BonusDetail> {
        let Some(def) = self.registry.get_source(source) else {
            self.soft_miss("source", source);
            return Vec::new();
        };
        let current = self.states.get(source).copied().unwrap_or_default();
        let next = current.next_level();
        let mut resolved = HashMap::new();

        def.modifiers
            .iter()
            .map(|(category, target, modifier)| {
                let deps: Vec<f64> = modifier
                    .deps
                    .iter()
                    .map(|dep| self.peek_effect_value(dep.as_str(), &mut resolved))
                    .collect();
                let formula = modifier.formula.instantiate(&deps);
                let (kind, name) = match category {
                    ModifierCategory::Effect(_) => (
                        NodeKind::Effect,
                        self.registry
                            .get_effect(target)
                            .map_or_else(|| target.to_string(), |e| e.name.clone()),
                    ),
                    ModifierCategory::Resource(_) => (NodeKind::Resource, target.to_string()),
                };
                BonusDetail {
                    kind,
                    id: target.to_string(),
                    name,
                    bonus_type: category,
                    current_level_value: formula.evaluate(&current),
                    next_level_value: formula.evaluate(&next),
                }
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Evaluation internals
    // -----------------------------------------------------------------------

    /// Evaluate the `category` modifier of `source` on `target`. `None` if
    /// the source has no such modifier or no recorded state.
    fn contribution(
        &mut self,
        source: &SourceId,
        category: ModifierCategory,
        target: &str,
    ) -> Option<f64> {
        let state = *self.states.get(source.as_str())?;
        let modifier = self
            .registry
            .get_source(source.as_str())?
            .modifiers
            .get(category, target)?;
        let template = modifier.formula;
        let dep_ids = modifier.deps.clone();

        // Acyclicity was checked at build time, so this recursion terminates.
        let deps: Vec<f64> = dep_ids
            .iter()
            .map(|dep| self.get_effect_value(dep.as_str()))
            .collect();

        if !self.config.memoize_formulas {
            return Some(template.instantiate(&deps).evaluate(&state));
        }

        let key = FormulaKey::new(&state, &deps);
        if let Some(value) = self.caches.formula(source.as_str(), category, target, &key) {
            return Some(value);
        }
        let value = template.instantiate(&deps).evaluate(&state);
        self.caches.insert_formula(
            source,
            category,
            target,
            key,
            value,
            self.config.max_formula_entries_per_source,
        );
        Some(value)
    }

    /// Like [`get_effect_value`](Self::get_effect_value) but never writes a
    /// cache or touches the counters. Values computed along the way are kept
    /// in `resolved`, so each effect is evaluated once per call.
    fn peek_effect_value(&self, id: &str, resolved: &mut HashMap<EffectId, f64>) -> f64 {
        if let Some(value) = self.caches.peek_effect(id) {
            return value;
        }
        if let Some(&value) = resolved.get(id) {
            return value;
        }
        let Some(effect) = self.registry.get_effect(id) else {
            return 0.0;
        };

        let mut totals = EffectTotals::default();
        for source in self.graph.effect_providers(id) {
            let Some(state) = self.states.get(source.as_str()) else {
                continue;
            };
            let Some(def) = self.registry.get_source(source.as_str()) else {
                continue;
            };
            for kind in EffectContribution::ALL {
                if let Some(modifier) = def.modifiers.effect_modifier(kind, id) {
                    let deps: Vec<f64> = modifier
                        .deps
                        .iter()
                        .map(|dep| self.peek_effect_value(dep.as_str(), resolved))
                        .collect();
                    totals.apply(kind, modifier.formula.instantiate(&deps).evaluate(state));
                }
            }
        }
        let value = totals.total(effect.initial_value);
        resolved.insert(effect.id.clone(), value);
        value
    }

    fn soft_miss(&self, kind: &'static str, id: &str) {
        if self.config.warn_on_soft_miss {
            tracing::warn!(kind, id, "query for an unregistered id; using the neutral value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Coefficient, FormulaTemplate};
    use crate::registry::Modifier;
    use crate::test_utils::*;

    // -----------------------------------------------------------------------
    // Test 1: An effect with no sources resolves to its initial value
    // -----------------------------------------------------------------------
    #[test]
    fn effect_without_sources_is_initial_value() {
        let mut builder = BonusSystemBuilder::new();
        builder.register_effect(EffectDef::new("speed", "Speed", 1.0));
        let mut system = builder.build_dependency_graph().unwrap();
        assert_eq!(system.get_effect_value("speed"), 1.0);
    }

    // -----------------------------------------------------------------------
    // Test 2: Worked multiplier scenario
    // -----------------------------------------------------------------------
    #[test]
    fn multiplier_upgrade_scenario() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        assert_close(system.get_effect_value("speed"), 2.0);
    }

    #[test]
    fn efficiency_scales_the_level() {
        let mut builder = BonusSystemBuilder::new();
        builder
            .register_effect(EffectDef::new("output", "Output", 0.0))
            .register_source(SourceDef::new("plant", "Plant").effect(
                EffectContribution::Income,
                "output",
                Modifier::linear(3.0, 1.0),
            ));
        let mut system = build(builder);

        // 3 * (3 * 2) + 1
        system.set_source_state("plant", 3, 2.0).unwrap();
        assert_close(system.get_effect_value("output"), 19.0);

        system.set_source_state("plant", 3, 0.5).unwrap();
        assert_close(system.get_effect_value("output"), 5.5);

        // The level update keeps the recorded efficiency.
        system.update_bonus_source_level("plant", 4).unwrap();
        assert_close(system.get_effect_value("output"), 7.0);
    }

    // -----------------------------------------------------------------------
    // Test 3: Income is summed before multipliers apply
    // -----------------------------------------------------------------------
    #[test]
    fn income_then_multiplier() {
        let mut builder = BonusSystemBuilder::new();
        builder.register_effect(EffectDef::new("e", "E", 0.0));
        builder.register_source(SourceDef::new("a", "A").effect(
            EffectContribution::Income,
            "e",
            Modifier::linear(5.0, 0.0),
        ));
        builder.register_source(SourceDef::new("b", "B").effect(
            EffectContribution::Multiplier,
            "e",
            Modifier::linear(2.0, 0.0),
        ));
        let mut system = builder.build_dependency_graph().unwrap();
        system.set_source_state("a", 1, 1.0).unwrap();
        system.set_source_state("b", 1, 1.0).unwrap();

        assert_close(system.get_effect_value("e"), 10.0);
    }

    // -----------------------------------------------------------------------
    // Test 4: Resource caps sum across sources
    // -----------------------------------------------------------------------
    #[test]
    fn resource_caps_sum() {
        let mut system = build(energy_cap_builder());
        system.set_source_state("a", 3, 1.0).unwrap();
        system.set_source_state("b", 1, 1.0).unwrap();

        let energy = system.get_resource_value("energy");
        assert_close(energy.cap, 225.0);
        assert_eq!(energy.multiplier, 1.0);
        assert_eq!(energy.income, 0.0);
    }

    // -----------------------------------------------------------------------
    // Test 5: Unknown source mutation fails without side effects
    // -----------------------------------------------------------------------
    #[test]
    fn unknown_source_mutation_is_rejected() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        system.get_effect_value("speed");
        let stats = system.cache_stats();

        let err = system.set_source_state("nonexistent", 1, 1.0).unwrap_err();
        assert_eq!(err, BonusError::UnknownSource(SourceId::from("nonexistent")));
        assert!(system.source_state("nonexistent").is_none());
        assert!(system.caches().is_effect_cached("speed"));
        assert_eq!(system.cache_stats(), stats);

        match system.update_bonus_source_level("nonexistent", 3) {
            Err(BonusError::UnknownSource(id)) => assert_eq!(id.as_str(), "nonexistent"),
            other => panic!("expected UnknownSource, got: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Test 6: Repeated queries hit the cache
    // -----------------------------------------------------------------------
    #[test]
    fn second_query_is_a_cache_hit() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 4, 1.0).unwrap();

        let first = system.get_effect_value("speed");
        let after_first = system.cache_stats();
        let second = system.get_effect_value("speed");
        let after_second = system.cache_stats();

        assert_eq!(first.to_bits(), second.to_bits());
        assert_eq!(after_second.effect_hits, after_first.effect_hits + 1);
        assert_eq!(after_second.effect_misses, after_first.effect_misses);
        assert_eq!(after_second.formula_misses, after_first.formula_misses);
    }

    // -----------------------------------------------------------------------
    // Test 7: Mutations are observed by the next query
    // -----------------------------------------------------------------------
    #[test]
    fn level_update_invalidates_effect() {
        let mut system = speed_upgrade_system();
        system.update_bonus_source_level("upgrade1", 2).unwrap();
        assert_close(system.get_effect_value("speed"), 2.0);

        system.update_bonus_source_level("upgrade1", 4).unwrap();
        assert_close(system.get_effect_value("speed"), 3.0);
    }

    // -----------------------------------------------------------------------
    // Test 8: Unchanged level is a no-op
    // -----------------------------------------------------------------------
    #[test]
    fn unchanged_level_keeps_caches() {
        let mut system = speed_upgrade_system();
        system.update_bonus_source_level("upgrade1", 2).unwrap();
        system.get_effect_value("speed");
        let evictions = system.cache_stats().evictions;

        system.update_bonus_source_level("upgrade1", 2).unwrap();
        assert!(system.caches().is_effect_cached("speed"));
        assert_eq!(system.cache_stats().evictions, evictions);
    }

    #[test]
    fn level_update_keeps_efficiency() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 1, 0.5).unwrap();
        system.update_bonus_source_level("upgrade1", 4).unwrap();

        let state = system.source_state("upgrade1").unwrap();
        assert_eq!(state.level, 4);
        assert_eq!(state.efficiency, 0.5);
    }

    #[test]
    fn first_level_update_uses_full_efficiency() {
        let mut system = speed_upgrade_system();
        system.update_bonus_source_level("upgrade1", 0).unwrap();
        assert_eq!(
            system.source_state("upgrade1"),
            Some(&SourceState::new(0, 1.0))
        );
        // Level 0 still evaluates: 0.5 * 0 + 1.
        assert_close(system.get_effect_value("speed"), 1.0);
    }

    // -----------------------------------------------------------------------
    // Test 9: Sources without state contribute nothing
    // -----------------------------------------------------------------------
    #[test]
    fn inactive_source_contributes_nothing() {
        let mut system = build(outpost_builder());
        system.set_source_state("solar", 2, 1.0).unwrap();
        assert_close(system.get_effect_value("speed"), 1.0);

        let energy = system.get_resource_value("energy");
        assert_close(energy.income, 4.0);
        assert_close(energy.cap, 0.0);
    }

    // -----------------------------------------------------------------------
    // Test 10: Soft misses resolve to neutral values
    // -----------------------------------------------------------------------
    #[test]
    fn soft_misses_are_neutral() {
        let mut system = speed_upgrade_system();
        assert_eq!(system.get_effect_value("warp"), 0.0);
        assert_eq!(system.get_resource_value("plasma"), ResourceValue::default());
        assert!(system.get_bonus_details("nobody").is_empty());
        assert!(system.effect_breakdown("warp").is_none());
        assert!(!system.caches().is_effect_cached("warp"));
    }

    #[test]
    fn soft_misses_leave_counters_alone() {
        let mut system = speed_upgrade_system();
        let before = system.cache_stats();
        system.get_effect_value("warp");
        system.get_effect_value("warp");
        system.get_resource_value("plasma");
        assert_eq!(system.cache_stats(), before);
    }

    // -----------------------------------------------------------------------
    // Test 11: Dependencies resolve recursively and invalidate downstream
    // -----------------------------------------------------------------------
    #[test]
    fn dependency_values_flow_through() {
        let mut system = build(outpost_builder());
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        system.set_source_state("drone", 3, 1.0).unwrap();

        // speed = 2, mining income = speed * 3
        assert_close(system.get_effect_value("mining"), 6.0);

        system.update_bonus_source_level("upgrade1", 4).unwrap();
        // speed = 3
        assert_close(system.get_effect_value("mining"), 9.0);
    }

    #[test]
    fn unrelated_caches_survive_invalidation() {
        let mut system = build(outpost_builder());
        activate_outpost(&mut system);
        system.warm_caches();
        assert!(system.caches().is_effect_cached("mining"));
        assert!(system.caches().is_resource_cached("energy"));
        assert!(system.caches().is_effect_cached("storage"));

        system.update_bonus_source_level("battery", 5).unwrap();

        assert!(system.caches().is_effect_cached("speed"));
        assert!(system.caches().is_effect_cached("mining"));
        assert!(system.caches().is_effect_cached("storage"));
        assert!(!system.caches().is_resource_cached("energy"));
    }

    // -----------------------------------------------------------------------
    // Test 12: Cycles are rejected at build
    // -----------------------------------------------------------------------
    #[test]
    fn cyclic_registry_fails_to_build() {
        let mut builder = BonusSystemBuilder::new();
        builder.register_effect(EffectDef::new("a", "A", 1.0));
        builder.register_effect(EffectDef::new("b", "B", 1.0));
        builder.register_source(
            SourceDef::new("sa", "SA").effect(
                EffectContribution::Income,
                "a",
                Modifier::new(FormulaTemplate::linear(Coefficient::dependency(0), 0.0))
                    .with_deps(["b"]),
            ),
        );
        builder.register_source(
            SourceDef::new("sb", "SB").effect(
                EffectContribution::Income,
                "b",
                Modifier::new(FormulaTemplate::linear(Coefficient::dependency(0), 0.0))
                    .with_deps(["a"]),
            ),
        );

        match builder.build_dependency_graph() {
            Err(BonusError::CyclicDependency { cycles }) => assert!(!cycles.is_empty()),
            other => panic!("expected CyclicDependency, got: {other:?}"),
        }
    }

    #[test]
    fn slot_errors_pass_through() {
        let mut builder = BonusSystemBuilder::new();
        builder.register_effect(EffectDef::new("a", "A", 1.0));
        builder.register_source(SourceDef::new("s", "S").effect(
            EffectContribution::Income,
            "a",
            Modifier::new(FormulaTemplate::linear(Coefficient::dependency(1), 0.0)),
        ));
        match builder.build_dependency_graph() {
            Err(BonusError::Graph(GraphError::DependencySlotOutOfRange { slot, .. })) => {
                assert_eq!(slot, 1)
            }
            other => panic!("expected DependencySlotOutOfRange, got: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Test 13: Bonus details are a read-only preview
    // -----------------------------------------------------------------------
    #[test]
    fn bonus_details_preview_next_level() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        let stats = system.cache_stats();

        let details = system.get_bonus_details("upgrade1");
        assert_eq!(details.len(), 1);
        let detail = &details[0];
        assert_eq!(detail.kind, NodeKind::Effect);
        assert_eq!(detail.id, "speed");
        assert_eq!(detail.name, "Speed");
        assert_eq!(
            detail.bonus_type,
            ModifierCategory::Effect(EffectContribution::Multiplier)
        );
        assert_close(detail.current_level_value, 2.0);
        assert_close(detail.next_level_value, 2.5);

        assert!(system.caches().is_empty());
        assert_eq!(system.cache_stats(), stats);
    }

    #[test]
    fn bonus_details_without_state_preview_level_zero() {
        let system = build(energy_cap_builder());
        let details = system.get_bonus_details("b");
        assert_eq!(details[0].kind, NodeKind::Resource);
        assert_eq!(details[0].name, "energy");
        assert_close(details[0].current_level_value, 100.0);
        assert_close(details[0].next_level_value, 150.0);
        assert!(system.source_state("b").is_none());
    }

    #[test]
    fn bonus_details_evaluate_each_effect_once_on_diamonds() {
        // Every layer reads both effects of the layer below, so an
        // unshared walk would visit the bottom layer 2^40 times.
        let depth = 40;
        let mut system = build(diamond_builder(depth));
        for layer in 1..=depth {
            system.update_bonus_source_level(&format!("l{layer}_src"), 1).unwrap();
            system.update_bonus_source_level(&format!("r{layer}_src"), 1).unwrap();
        }

        let details = system.get_bonus_details(&format!("l{depth}_src"));
        assert!(system.caches().is_empty());

        assert_eq!(details.len(), 1);
        let expected = system.get_effect_value(&format!("l{depth}"));
        assert!(expected > 1.0);
        assert!((details[0].current_level_value - expected).abs() <= expected * 1e-12);
    }

    #[test]
    fn bonus_details_resolve_deps() {
        let mut system = build(outpost_builder());
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        system.set_source_state("drone", 1, 1.0).unwrap();

        let details = system.get_bonus_details("drone");
        // mining income = speed (2) * level
        assert_close(details[0].current_level_value, 2.0);
        assert_close(details[0].next_level_value, 4.0);
    }

    // -----------------------------------------------------------------------
    // Test 14: Reset and rebuild
    // -----------------------------------------------------------------------
    #[test]
    fn reset_clears_states_and_caches() {
        let mut system = speed_upgrade_system();
        system.set_source_state("upgrade1", 2, 1.0).unwrap();
        system.get_effect_value("speed");

        system.reset();
        assert!(system.source_state("upgrade1").is_none());
        assert!(system.caches().is_empty());
        assert_close(system.get_effect_value("speed"), 1.0);
        assert_eq!(system.registry().source_count(), 1);
    }

    #[test]
    fn into_builder_allows_more_registration() {
        let system = speed_upgrade_system();
        let mut builder = system.into_builder();
        builder.register_effect(EffectDef::new("luck", "Luck", 0.5));
        let mut system = builder.build_dependency_graph().unwrap();
        assert_close(system.get_effect_value("luck"), 0.5);
        assert_close(system.get_effect_value("speed"), 1.0);
    }

    // -----------------------------------------------------------------------
    // Test 15: Breakdown, states, memo settings
    // -----------------------------------------------------------------------
    #[test]
    fn breakdown_matches_effect_value() {
        let mut system = build(outpost_builder());
        activate_outpost(&mut system);

        let breakdown = system.effect_breakdown("speed").unwrap();
        assert_eq!(breakdown.contributions.len(), 1);
        assert_eq!(breakdown.contributions[0].source.as_str(), "upgrade1");
        assert_eq!(breakdown.income, 0.0);
        assert_close(breakdown.total, system.get_effect_value("speed"));
    }

    #[test]
    fn source_states_follow_registration_order() {
        let mut system = build(outpost_builder());
        system.set_source_state("battery", 1, 1.0).unwrap();
        system.set_source_state("upgrade1", 2, 1.0).unwrap();

        let ids: Vec<&str> = system.source_states().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["upgrade1", "battery"]);
    }

    #[test]
    fn formula_memo_can_be_disabled() {
        let config = BonusConfig {
            memoize_formulas: false,
            ..BonusConfig::default()
        };
        let mut system = build(outpost_builder().with_config(config));
        activate_outpost(&mut system);
        system.warm_caches();

        let stats = system.cache_stats();
        assert_eq!(stats.formula_hits + stats.formula_misses, 0);
        assert_eq!(system.caches().formula_entries("upgrade1"), 0);
        assert_close(system.get_effect_value("mining"), 6.0);
    }
}
