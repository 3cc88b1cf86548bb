//! Serde data file structs for bonus catalogs.
//!
//! These structs define the on-disk format for effects, sources and engine
//! settings. They are deserialized from RON, JSON, or TOML data files and
//! then resolved into `bonus-core` definitions by the catalog loader.

use serde::Deserialize;
use std::collections::BTreeMap;

// ===========================================================================
// Effects
// ===========================================================================

/// An effect definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectData {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub initial_value: f64,
}

// ===========================================================================
// Sources
// ===========================================================================

/// A bonus source definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceData {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub modifiers: ModifiersData,
}

/// All modifiers of a source, grouped by target family.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModifiersData {
    pub effect: EffectModifiersData,
    pub resource: ResourceModifiersData,
}

/// Effect modifiers keyed by contribution kind, then target effect id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EffectModifiersData {
    pub income: BTreeMap<String, ModifierData>,
    pub multiplier: BTreeMap<String, ModifierData>,
}

/// Resource modifiers keyed by contribution kind, then target resource id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceModifiersData {
    pub income: BTreeMap<String, ModifierData>,
    pub multiplier: BTreeMap<String, ModifierData>,
    pub cap: BTreeMap<String, ModifierData>,
    pub cap_multiplier: BTreeMap<String, ModifierData>,
    pub consumption: BTreeMap<String, ModifierData>,
}

/// One modifier: a formula plus the effects it reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ModifierData {
    pub formula: FormulaData,
    /// Effect ids whose values the formula reads. Effects referenced by a
    /// coefficient are appended automatically if missing here.
    #[serde(default)]
    pub deps: Vec<String>,
}

/// A formula descriptor with an untyped tag, validated at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct FormulaData {
    #[serde(rename = "type")]
    pub kind: String,
    pub a: CoefficientData,
    #[serde(default)]
    pub b: CoefficientData,
}

/// A formula coefficient: a plain number, or a scaled dependency value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CoefficientData {
    /// Short form: `0.5`.
    Number(f64),
    /// Full form: `{ dep: "speed", scale: 0.5, offset: 1.0 }`, meaning
    /// `scale * speed + offset`.
    Dep {
        dep: String,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
}

impl Default for CoefficientData {
    fn default() -> Self {
        CoefficientData::Number(0.0)
    }
}

fn default_scale() -> f64 {
    1.0
}

// ===========================================================================
// TOML wrappers
// ===========================================================================

/// Wrapper for a list of effects in TOML format.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlEffects {
    pub effects: Vec<EffectData>,
}

/// Wrapper for a list of sources in TOML format.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlSources {
    pub sources: Vec<SourceData>,
}
