use crate::formula::{Formula, FormulaTemplate};
use crate::id::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ---------------------------------------------------------------------------
// Modifier categories
// ---------------------------------------------------------------------------

/// How contributions of one category fold together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Summed, starting at zero.
    Additive,
    /// Multiplied, starting at one.
    Multiplicative,
}

impl Aggregation {
    pub fn identity(self) -> f64 {
        match self {
            Aggregation::Additive => 0.0,
            Aggregation::Multiplicative => 1.0,
        }
    }

    pub fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            Aggregation::Additive => acc + value,
            Aggregation::Multiplicative => acc * value,
        }
    }
}

/// What a modifier contributes to an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectContribution {
    Income,
    Multiplier,
}

impl EffectContribution {
    pub const ALL: [EffectContribution; 2] =
        [EffectContribution::Income, EffectContribution::Multiplier];

    pub fn aggregation(self) -> Aggregation {
        match self {
            EffectContribution::Income => Aggregation::Additive,
            EffectContribution::Multiplier => Aggregation::Multiplicative,
        }
    }
}

/// What a modifier contributes to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceContribution {
    Income,
    Multiplier,
    Cap,
    CapMultiplier,
    Consumption,
}

impl ResourceContribution {
    pub const ALL: [ResourceContribution; 5] = [
        ResourceContribution::Income,
        ResourceContribution::Multiplier,
        ResourceContribution::Cap,
        ResourceContribution::CapMultiplier,
        ResourceContribution::Consumption,
    ];

    pub fn aggregation(self) -> Aggregation {
        match self {
            ResourceContribution::Income
            | ResourceContribution::Cap
            | ResourceContribution::Consumption => Aggregation::Additive,
            ResourceContribution::Multiplier | ResourceContribution::CapMultiplier => {
                Aggregation::Multiplicative
            }
        }
    }
}

/// The full category of a modifier: target family plus contribution kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierCategory {
    Effect(EffectContribution),
    Resource(ResourceContribution),
}

impl ModifierCategory {
    pub fn aggregation(self) -> Aggregation {
        match self {
            ModifierCategory::Effect(c) => c.aggregation(),
            ModifierCategory::Resource(c) => c.aggregation(),
        }
    }
}

impl fmt::Display for ModifierCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (family, kind) = match self {
            ModifierCategory::Effect(EffectContribution::Income) => ("effect", "income"),
            ModifierCategory::Effect(EffectContribution::Multiplier) => ("effect", "multiplier"),
            ModifierCategory::Resource(ResourceContribution::Income) => ("resource", "income"),
            ModifierCategory::Resource(ResourceContribution::Multiplier) => {
                ("resource", "multiplier")
            }
            ModifierCategory::Resource(ResourceContribution::Cap) => ("resource", "cap"),
            ModifierCategory::Resource(ResourceContribution::CapMultiplier) => {
                ("resource", "capMultiplier")
            }
            ModifierCategory::Resource(ResourceContribution::Consumption) => {
                ("resource", "consumption")
            }
        };
        write!(f, "{family}.{kind}")
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A formula template plus the effects whose values it needs.
///
/// `deps[i]` is resolved to its current effect value and handed to the
/// template as dependency slot `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub formula: FormulaTemplate,
    #[serde(default)]
    pub deps: Vec<EffectId>,
}

impl Modifier {
    pub fn new(formula: impl Into<FormulaTemplate>) -> Self {
        Self {
            formula: formula.into(),
            deps: Vec::new(),
        }
    }

    pub fn linear(a: f64, b: f64) -> Self {
        Self::new(Formula::Linear { a, b })
    }

    pub fn exponential(a: f64, b: f64) -> Self {
        Self::new(Formula::Exponential { a, b })
    }

    pub fn with_deps<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EffectId>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// All modifiers of one source, keyed by category then target id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub effect: BTreeMap<EffectContribution, BTreeMap<EffectId, Modifier>>,
    #[serde(default)]
    pub resource: BTreeMap<ResourceContribution, BTreeMap<ResourceId, Modifier>>,
}

impl Modifiers {
    pub fn insert_effect(&mut self, kind: EffectContribution, target: EffectId, modifier: Modifier) {
        self.effect.entry(kind).or_default().insert(target, modifier);
    }

    pub fn insert_resource(
        &mut self,
        kind: ResourceContribution,
        target: ResourceId,
        modifier: Modifier,
    ) {
        self.resource.entry(kind).or_default().insert(target, modifier);
    }

    pub fn effect_modifier(&self, kind: EffectContribution, target: &str) -> Option<&Modifier> {
        self.effect.get(&kind).and_then(|table| table.get(target))
    }

    pub fn resource_modifier(&self, kind: ResourceContribution, target: &str) -> Option<&Modifier> {
        self.resource.get(&kind).and_then(|table| table.get(target))
    }

    pub fn get(&self, category: ModifierCategory, target: &str) -> Option<&Modifier> {
        match category {
            ModifierCategory::Effect(kind) => self.effect_modifier(kind, target),
            ModifierCategory::Resource(kind) => self.resource_modifier(kind, target),
        }
    }

    /// Every modifier with its category and target id, effects first.
    pub fn iter(&self) -> impl Iterator<Item = (ModifierCategory, &str, &Modifier)> {
        let effects = self.effect.iter().flat_map(|(kind, table)| {
            table
                .iter()
                .map(move |(id, m)| (ModifierCategory::Effect(*kind), id.as_str(), m))
        });
        let resources = self.resource.iter().flat_map(|(kind, table)| {
            table
                .iter()
                .map(move |(id, m)| (ModifierCategory::Resource(*kind), id.as_str(), m))
        });
        effects.chain(resources)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A bonus source definition (building, upgrade, drone stat...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub id: SourceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl SourceDef {
    pub fn new(id: impl Into<SourceId>, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            description: String::new(),
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn effect(
        mut self,
        kind: EffectContribution,
        target: impl Into<EffectId>,
        modifier: Modifier,
    ) -> Self {
        self.modifiers.insert_effect(kind, target.into(), modifier);
        self
    }

    pub fn resource(
        mut self,
        kind: ResourceContribution,
        target: impl Into<ResourceId>,
        modifier: Modifier,
    ) -> Self {
        self.modifiers.insert_resource(kind, target.into(), modifier);
        self
    }
}

/// An effect definition: a named derived scalar with a baseline value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDef {
    pub id: EffectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub initial_value: f64,
}

impl EffectDef {
    pub fn new(id: impl Into<EffectId>, name: &str, initial_value: f64) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            description: String::new(),
            initial_value,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Storage for source and effect definitions. No computation happens here.
///
/// Registration is an idempotent overwrite: registering an id twice keeps the
/// original registration slot but replaces the definition. Iteration follows
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sources: Vec<SourceDef>,
    source_index: HashMap<SourceId, usize>,
    effects: Vec<EffectDef>,
    effect_index: HashMap<EffectId, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Last write wins.
    pub fn register_source(&mut self, source: SourceDef) {
        match self.source_index.get(&source.id) {
            Some(&idx) => self.sources[idx] = source,
            None => {
                self.source_index.insert(source.id.clone(), self.sources.len());
                self.sources.push(source);
            }
        }
    }

    /// Register an effect. Last write wins.
    pub fn register_effect(&mut self, effect: EffectDef) {
        match self.effect_index.get(&effect.id) {
            Some(&idx) => self.effects[idx] = effect,
            None => {
                self.effect_index.insert(effect.id.clone(), self.effects.len());
                self.effects.push(effect);
            }
        }
    }

    pub fn get_source(&self, id: &str) -> Option<&SourceDef> {
        self.source_index.get(id).map(|&idx| &self.sources[idx])
    }

    pub fn get_effect(&self, id: &str) -> Option<&EffectDef> {
        self.effect_index.get(id).map(|&idx| &self.effects[idx])
    }

    pub fn is_source_registered(&self, id: &str) -> bool {
        self.source_index.contains_key(id)
    }

    pub fn is_effect_registered(&self, id: &str) -> bool {
        self.effect_index.contains_key(id)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceDef> {
        self.sources.iter()
    }

    pub fn effects(&self) -> impl Iterator<Item = &EffectDef> {
        self.effects.iter()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_registry() -> Registry {
        let mut reg = Registry::new();
        reg.register_effect(EffectDef::new("speed", "Movement speed", 1.0));
        reg.register_source(
            SourceDef::new("upgrade1", "Engine tuning").effect(
                EffectContribution::Multiplier,
                "speed",
                Modifier::linear(0.5, 1.0),
            ),
        );
        reg
    }

    #[test]
    fn register_and_lookup() {
        let reg = setup_registry();
        assert_eq!(reg.source_count(), 1);
        assert_eq!(reg.effect_count(), 1);
        assert!(reg.is_source_registered("upgrade1"));
        assert!(reg.is_effect_registered("speed"));
        assert!(!reg.is_source_registered("nonexistent"));
        assert!(reg.get_effect("nonexistent").is_none());
    }

    #[test]
    fn reregistering_overwrites_in_place() {
        let mut reg = setup_registry();
        reg.register_effect(EffectDef::new("mining", "Mining rate", 0.0));
        reg.register_effect(EffectDef::new("speed", "Speed v2", 2.0));

        assert_eq!(reg.effect_count(), 2);
        let speed = reg.get_effect("speed").unwrap();
        assert_eq!(speed.name, "Speed v2");
        assert_eq!(speed.initial_value, 2.0);

        // Registration order is preserved across the overwrite.
        let ids: Vec<&str> = reg.effects().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["speed", "mining"]);
    }

    #[test]
    fn reregistering_source_replaces_modifiers() {
        let mut reg = setup_registry();
        reg.register_source(SourceDef::new("upgrade1", "Empty"));
        let source = reg.get_source("upgrade1").unwrap();
        assert!(source.modifiers.is_empty());
        assert_eq!(reg.source_count(), 1);
    }

    #[test]
    fn modifiers_iterate_with_categories() {
        let source = SourceDef::new("battery", "Battery")
            .resource(ResourceContribution::Cap, "energy", Modifier::linear(25.0, 0.0))
            .resource(
                ResourceContribution::Consumption,
                "energy",
                Modifier::linear(1.0, 0.0),
            )
            .effect(EffectContribution::Income, "speed", Modifier::linear(1.0, 0.0));

        let entries: Vec<(ModifierCategory, &str)> = source
            .modifiers
            .iter()
            .map(|(cat, target, _)| (cat, target))
            .collect();
        assert_eq!(
            entries,
            vec![
                (ModifierCategory::Effect(EffectContribution::Income), "speed"),
                (ModifierCategory::Resource(ResourceContribution::Cap), "energy"),
                (
                    ModifierCategory::Resource(ResourceContribution::Consumption),
                    "energy"
                ),
            ]
        );
        assert_eq!(source.modifiers.len(), 3);
    }

    #[test]
    fn modifier_lookup_by_category() {
        let source = SourceDef::new("battery", "Battery").resource(
            ResourceContribution::Cap,
            "energy",
            Modifier::linear(25.0, 0.0),
        );
        let mods = &source.modifiers;
        assert!(mods.resource_modifier(ResourceContribution::Cap, "energy").is_some());
        assert!(mods.resource_modifier(ResourceContribution::Income, "energy").is_none());
        assert!(mods
            .get(ModifierCategory::Resource(ResourceContribution::Cap), "energy")
            .is_some());
    }

    #[test]
    fn aggregation_identities() {
        assert_eq!(EffectContribution::Income.aggregation().identity(), 0.0);
        assert_eq!(EffectContribution::Multiplier.aggregation().identity(), 1.0);
        assert_eq!(
            ResourceContribution::CapMultiplier.aggregation(),
            Aggregation::Multiplicative
        );
        assert_eq!(
            ResourceContribution::Consumption.aggregation(),
            Aggregation::Additive
        );
        assert_eq!(Aggregation::Multiplicative.combine(2.0, 3.0), 6.0);
        assert_eq!(Aggregation::Additive.combine(2.0, 3.0), 5.0);
    }

    #[test]
    fn category_display_matches_catalog_names() {
        assert_eq!(
            ModifierCategory::Resource(ResourceContribution::CapMultiplier).to_string(),
            "resource.capMultiplier"
        );
        assert_eq!(
            ModifierCategory::Effect(EffectContribution::Income).to_string(),
            "effect.income"
        );
    }

    #[test]
    fn modifier_with_deps() {
        let m = Modifier::linear(1.0, 0.0).with_deps(["speed", "mining"]);
        assert_eq!(m.deps, vec![EffectId::from("speed"), EffectId::from("mining")]);
    }

    #[test]
    fn empty_registry() {
        let reg = Registry::new();
        assert_eq!(reg.source_count(), 0);
        assert_eq!(reg.effect_count(), 0);
        assert!(reg.sources().next().is_none());
    }
}
