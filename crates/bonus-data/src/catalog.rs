//! Catalog pipeline: reads `effects.*`, `sources.*` and the optional
//! `engine.*` from a directory, resolves effect references and formula tags,
//! and produces definitions ready for registration.

use bonus_core::config::BonusConfig;
use bonus_core::formula::{Coefficient, FormulaKind, FormulaTemplate};
use bonus_core::id::{EffectId, ResourceId};
use bonus_core::registry::{
    EffectContribution, EffectDef, Modifier, ResourceContribution, SourceDef,
};
use bonus_core::system::{BonusSystem, BonusSystemBuilder};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::loader::*;
use crate::schema::*;

/// A fully resolved catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub effects: Vec<EffectDef>,
    pub sources: Vec<SourceDef>,
    pub config: BonusConfig,
}

impl Catalog {
    /// A builder with every effect and source registered, in file order.
    pub fn into_builder(self) -> BonusSystemBuilder {
        let mut builder = BonusSystemBuilder::new().with_config(self.config);
        for effect in self.effects {
            builder.register_effect(effect);
        }
        for source in self.sources {
            builder.register_source(source);
        }
        builder
    }
}

/// Load the catalog in `dir`.
///
/// `effects` and `sources` are required, `engine` is optional. Each may be
/// `.ron`, `.json` or `.toml`, but only one format per base name.
pub fn load_catalog(dir: &Path) -> Result<Catalog, DataLoadError> {
    let effects_path = require_data_file(dir, "effects")?;
    let sources_path = require_data_file(dir, "sources")?;
    let config = match find_data_file(dir, "engine")? {
        Some(path) => deserialize_file(&path)?,
        None => BonusConfig::default(),
    };

    let effect_data: Vec<EffectData> = deserialize_list(&effects_path, "effects")?;
    let mut effect_index: HashMap<String, usize> = HashMap::new();
    let mut effects = Vec::with_capacity(effect_data.len());
    for data in effect_data {
        check_duplicate(&effect_index, &data.id, &effects_path)?;
        effect_index.insert(data.id.clone(), effects.len());
        effects.push(resolve_effect(data));
    }

    let source_data: Vec<SourceData> = deserialize_list(&sources_path, "sources")?;
    let mut source_index: HashMap<String, usize> = HashMap::new();
    let mut sources = Vec::with_capacity(source_data.len());
    for data in source_data {
        check_duplicate(&source_index, &data.id, &sources_path)?;
        source_index.insert(data.id.clone(), sources.len());
        sources.push(resolve_source(data, &effect_index, &sources_path)?);
    }

    tracing::info!(
        dir = %dir.display(),
        effects = effects.len(),
        sources = sources.len(),
        "bonus catalog loaded"
    );
    Ok(Catalog {
        effects,
        sources,
        config,
    })
}

/// Load the catalog in `dir` and build its dependency graph.
pub fn load_bonus_system(dir: &Path) -> Result<BonusSystem, DataLoadError> {
    let system = load_catalog(dir)?.into_builder().build_dependency_graph()?;
    Ok(system)
}

// ===========================================================================
// Resolution
// ===========================================================================

fn resolve_effect(data: EffectData) -> EffectDef {
    let name = data.name.unwrap_or_else(|| data.id.clone());
    EffectDef::new(data.id, &name, data.initial_value).with_description(&data.description)
}

fn resolve_source(
    data: SourceData,
    effects: &HashMap<String, usize>,
    file: &Path,
) -> Result<SourceDef, DataLoadError> {
    let name = data.name.unwrap_or_else(|| data.id.clone());
    let mut source = SourceDef::new(data.id, &name).with_description(&data.description);
    let ModifiersData { effect, resource } = data.modifiers;

    let effect_tables = [
        (EffectContribution::Income, effect.income),
        (EffectContribution::Multiplier, effect.multiplier),
    ];
    for (kind, table) in effect_tables {
        for (target, modifier) in table {
            resolve_name(effects, &target, file, "effect")?;
            let modifier = resolve_modifier(modifier, &target, effects, file)?;
            source
                .modifiers
                .insert_effect(kind, EffectId::from(target), modifier);
        }
    }

    let resource_tables: [(ResourceContribution, BTreeMap<String, ModifierData>); 5] = [
        (ResourceContribution::Income, resource.income),
        (ResourceContribution::Multiplier, resource.multiplier),
        (ResourceContribution::Cap, resource.cap),
        (ResourceContribution::CapMultiplier, resource.cap_multiplier),
        (ResourceContribution::Consumption, resource.consumption),
    ];
    for (kind, table) in resource_tables {
        for (target, modifier) in table {
            let modifier = resolve_modifier(modifier, &target, effects, file)?;
            source
                .modifiers
                .insert_resource(kind, ResourceId::from(target), modifier);
        }
    }

    Ok(source)
}

fn resolve_modifier(
    data: ModifierData,
    target: &str,
    effects: &HashMap<String, usize>,
    file: &Path,
) -> Result<Modifier, DataLoadError> {
    let kind: FormulaKind =
        data.formula
            .kind
            .parse()
            .map_err(|source| DataLoadError::InvalidFormula {
                file: file.to_path_buf(),
                target: target.to_string(),
                source,
            })?;

    let mut deps = data.deps;
    for dep in &deps {
        resolve_name(effects, dep, file, "effect")?;
    }
    let a = resolve_coefficient(data.formula.a, &mut deps, effects, file)?;
    let b = resolve_coefficient(data.formula.b, &mut deps, effects, file)?;

    Ok(Modifier::new(FormulaTemplate { kind, a, b }).with_deps(deps))
}

/// A dependency coefficient resolves to the slot of its effect in `deps`,
/// appending the effect if it is not listed yet.
fn resolve_coefficient(
    data: CoefficientData,
    deps: &mut Vec<String>,
    effects: &HashMap<String, usize>,
    file: &Path,
) -> Result<Coefficient, DataLoadError> {
    match data {
        CoefficientData::Number(value) => Ok(Coefficient::Constant(value)),
        CoefficientData::Dep { dep, scale, offset } => {
            resolve_name(effects, &dep, file, "effect")?;
            let slot = match deps.iter().position(|d| *d == dep) {
                Some(slot) => slot,
                None => {
                    deps.push(dep);
                    deps.len() - 1
                }
            };
            Ok(Coefficient::Dependency {
                slot,
                scale,
                offset,
            })
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
