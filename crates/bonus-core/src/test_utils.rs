//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::formula::{Coefficient, FormulaTemplate};
use crate::registry::*;
use crate::system::{BonusSystem, BonusSystemBuilder};

// ===========================================================================
// Assertions
// ===========================================================================

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ===========================================================================
// Modifier constructors
// ===========================================================================

/// `a = scale * deps[0] + offset`, `b = b`, reading one effect.
pub fn scaled_by(dep: &str, scale: f64, offset: f64, b: f64) -> Modifier {
    Modifier::new(FormulaTemplate::linear(
        Coefficient::Dependency {
            slot: 0,
            scale,
            offset,
        },
        b,
    ))
    .with_deps([dep])
}

// ===========================================================================
// System builders
// ===========================================================================

pub fn build(builder: BonusSystemBuilder) -> BonusSystem {
    match builder.build_dependency_graph() {
        Ok(system) => system,
        Err(err) => panic!("test catalog failed to build: {err}"),
    }
}

/// `speed` (initial 1) boosted by `upgrade1` with `multiplier Linear{0.5, 1}`.
pub fn speed_upgrade_builder() -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    builder.register_effect(EffectDef::new("speed", "Speed", 1.0));
    builder.register_source(SourceDef::new("upgrade1", "Upgrade").effect(
        EffectContribution::Multiplier,
        "speed",
        Modifier::linear(0.5, 1.0),
    ));
    builder
}

pub fn speed_upgrade_system() -> BonusSystem {
    build(speed_upgrade_builder())
}

/// Two sources capping `energy`: `a` with `Linear{25, 0}`, `b` with
/// `Linear{50, 100}`.
pub fn energy_cap_builder() -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    builder.register_source(SourceDef::new("a", "Battery A").resource(
        ResourceContribution::Cap,
        "energy",
        Modifier::linear(25.0, 0.0),
    ));
    builder.register_source(SourceDef::new("b", "Battery B").resource(
        ResourceContribution::Cap,
        "energy",
        Modifier::linear(50.0, 100.0),
    ));
    builder
}

/// A small mining outpost:
///
/// - `upgrade1`: speed multiplier `Linear{0.5, 1}`
/// - `drone`: mining income `speed * level`
/// - `battery`: energy cap `Linear{25, 0}`
/// - `solar`: energy income `Linear{2, 0}`
/// - `refinery`: ore income `0.5 * mining * level`, energy consumption
///   `Linear{1, 0}`
/// - `silo`: storage income `Linear{10, 0}`
pub fn outpost_builder() -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    builder
        .register_effect(EffectDef::new("speed", "Speed", 1.0))
        .register_effect(EffectDef::new("mining", "Mining", 0.0))
        .register_effect(EffectDef::new("storage", "Storage", 1.0));

    builder
        .register_source(SourceDef::new("upgrade1", "Upgrade").effect(
            EffectContribution::Multiplier,
            "speed",
            Modifier::linear(0.5, 1.0),
        ))
        .register_source(SourceDef::new("drone", "Drone").effect(
            EffectContribution::Income,
            "mining",
            scaled_by("speed", 1.0, 0.0, 0.0),
        ))
        .register_source(SourceDef::new("battery", "Battery").resource(
            ResourceContribution::Cap,
            "energy",
            Modifier::linear(25.0, 0.0),
        ))
        .register_source(SourceDef::new("solar", "Solar Panel").resource(
            ResourceContribution::Income,
            "energy",
            Modifier::linear(2.0, 0.0),
        ))
        .register_source(
            SourceDef::new("refinery", "Refinery")
                .resource(
                    ResourceContribution::Income,
                    "ore",
                    scaled_by("mining", 0.5, 0.0, 0.0),
                )
                .resource(
                    ResourceContribution::Consumption,
                    "energy",
                    Modifier::linear(1.0, 0.0),
                ),
        )
        .register_source(SourceDef::new("silo", "Silo").effect(
            EffectContribution::Income,
            "storage",
            Modifier::linear(10.0, 0.0),
        ));
    builder
}

/// Give every outpost source a state.
pub fn activate_outpost(system: &mut BonusSystem) {
    for (id, level) in [
        ("upgrade1", 2),
        ("drone", 3),
        ("battery", 2),
        ("solar", 1),
        ("refinery", 1),
        ("silo", 1),
    ] {
        if let Err(err) = system.set_source_state(id, level, 1.0) {
            panic!("outpost source {id}: {err}");
        }
    }
}

/// `len` effects `e0..` where source `s{i}` feeds `e{i}` and reads
/// `e{i-1}`, plus one resource `r` fed by every source.
pub fn chain_builder(len: usize) -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    for i in 0..len {
        builder.register_effect(EffectDef::new(format!("e{i}"), "Chain", 1.0));
    }
    for i in 0..len {
        let income = if i == 0 {
            Modifier::linear(1.0, 1.0)
        } else {
            scaled_by(&format!("e{}", i - 1), 0.01, 1.0, 0.0)
        };
        builder.register_source(
            SourceDef::new(format!("s{i}"), "Link")
                .effect(EffectContribution::Income, format!("e{i}"), income)
                .resource(ResourceContribution::Income, "r", Modifier::linear(1.0, 0.0)),
        );
    }
    builder
}

/// Layered diamonds: effects `l{i}` and `r{i}` for every layer, where the
/// sources `l{i}_src` and `r{i}_src` each read both effects of layer `i - 1`.
/// Layer 0 holds baselines of 1. At level 1, `l{i} = l + 0.5 r` and
/// `r{i} = r + 0.25 l` of the layer below.
pub fn diamond_builder(depth: usize) -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    builder
        .register_effect(EffectDef::new("l0", "Left", 1.0))
        .register_effect(EffectDef::new("r0", "Right", 1.0));
    for layer in 1..=depth {
        let (l_below, r_below) = (format!("l{}", layer - 1), format!("r{}", layer - 1));
        for (side, first, second, scale) in [
            ("l", &l_below, &r_below, 0.5),
            ("r", &r_below, &l_below, 0.25),
        ] {
            let effect = format!("{side}{layer}");
            builder.register_effect(EffectDef::new(effect.as_str(), "Layer", 0.0));
            let modifier = Modifier::new(FormulaTemplate::linear(
                Coefficient::dependency(0),
                Coefficient::Dependency {
                    slot: 1,
                    scale,
                    offset: 0.0,
                },
            ))
            .with_deps([first.as_str(), second.as_str()]);
            builder.register_source(SourceDef::new(format!("{effect}_src"), "Layer").effect(
                EffectContribution::Income,
                effect,
                modifier,
            ));
        }
    }
    builder
}

/// `width` independent sources each feeding their own effect and a shared
/// resource `r`.
pub fn wide_builder(width: usize) -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    for i in 0..width {
        builder.register_effect(EffectDef::new(format!("w{i}"), "Wide", 0.0));
        builder.register_source(
            SourceDef::new(format!("s{i}"), "Leaf")
                .effect(
                    EffectContribution::Income,
                    format!("w{i}"),
                    Modifier::exponential(2.0, 1.5),
                )
                .resource(ResourceContribution::Cap, "r", Modifier::linear(10.0, 0.0)),
        );
    }
    builder
}
