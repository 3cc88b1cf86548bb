//! Bonus Core -- incremental modifier computation for idle and incremental
//! games.
//!
//! Game entities (buildings, upgrades, drones) are registered as bonus
//! *sources*. Each source carries leveled formulas that contribute to named
//! *effects* (derived scalars with a baseline) and to *resources*
//! (income, multiplier, cap, cap multiplier and consumption). Formulas may
//! read other effects' current values, which creates dependencies between
//! sources.
//!
//! # Lifecycle
//!
//! 1. **Register** -- sources and effects are added to a
//!    [`system::BonusSystemBuilder`].
//! 2. **Build** -- [`system::BonusSystemBuilder::build_dependency_graph`]
//!    builds the provides / depends-on graph, rejecting cycles.
//! 3. **Run** -- source states are mutated and effect / resource values
//!    queried every tick. Values are memoized; a mutation evicts exactly the
//!    entries downstream of the mutated source.
//!
//! ```rust,ignore
//! let mut builder = BonusSystemBuilder::new();
//! builder.register_effect(EffectDef::new("speed", "Speed", 1.0));
//! builder.register_source(SourceDef::new("upgrade1", "Upgrade").effect(
//!     EffectContribution::Multiplier,
//!     "speed",
//!     Modifier::linear(0.5, 1.0),
//! ));
//! let mut system = builder.build_dependency_graph()?;
//! system.set_source_state("upgrade1", 2, 1.0)?;
//! assert_eq!(system.get_effect_value("speed"), 2.0);
//! ```
//!
//! # Key Types
//!
//! - [`system::BonusSystem`] -- States, caches and the query API.
//! - [`registry::Registry`] -- Source and effect definitions.
//! - [`graph::DependencyGraph`] -- Invalidation DAG with cycle detection.
//! - [`formula::Formula`] -- Linear and exponential leveled formulas.
//! - [`resource::ResourceValue`] -- Aggregated resource contributions.

pub mod cache;
pub mod config;
pub mod formula;
pub mod graph;
pub mod id;
pub mod registry;
pub mod resource;
pub mod state;
pub mod system;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
