//! A small mining outpost driven through a few upgrade steps.
//!
//! Run with `RUST_LOG=debug` to see graph construction and cache
//! invalidation.

use bonus_core::formula::{Coefficient, FormulaTemplate};
use bonus_core::registry::*;
use bonus_core::system::{BonusError, BonusSystem, BonusSystemBuilder};
use tracing_subscriber::EnvFilter;

fn catalog() -> BonusSystemBuilder {
    let mut builder = BonusSystemBuilder::new();
    builder
        .register_effect(EffectDef::new("speed", "Drill Speed", 1.0))
        .register_effect(EffectDef::new("mining", "Mining Rate", 0.0));

    builder
        .register_source(
            SourceDef::new("upgrade1", "Sharpened Bits")
                .with_description("Each level adds 50% drill speed.")
                .effect(
                    EffectContribution::Multiplier,
                    "speed",
                    Modifier::linear(0.5, 1.0),
                ),
        )
        .register_source(
            SourceDef::new("drone", "Mining Drone").effect(
                EffectContribution::Income,
                "mining",
                Modifier::new(FormulaTemplate::linear(Coefficient::dependency(0), 0.0))
                    .with_deps(["speed"]),
            ),
        )
        .register_source(
            SourceDef::new("battery", "Battery")
                .resource(
                    ResourceContribution::Cap,
                    "energy",
                    Modifier::linear(25.0, 0.0),
                )
                .resource(
                    ResourceContribution::CapMultiplier,
                    "energy",
                    Modifier::exponential(1.0, 0.25),
                ),
        );
    builder
}

fn report(system: &mut BonusSystem) {
    let speed = system.get_effect_value("speed");
    let mining = system.get_effect_value("mining");
    let energy = system.get_resource_value("energy");
    println!(
        "speed {speed:.2}  mining {mining:.2}  energy cap {:.1}",
        energy.effective_cap()
    );
}

fn main() -> Result<(), BonusError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut system = catalog().build_dependency_graph()?;
    system.set_source_state("drone", 1, 1.0)?;
    system.set_source_state("battery", 1, 1.0)?;
    report(&mut system);

    for level in 1..=3 {
        system.update_bonus_source_level("upgrade1", level)?;
        report(&mut system);
    }

    for detail in system.get_bonus_details("upgrade1") {
        println!(
            "{} ({}): {:.2} -> {:.2}",
            detail.name, detail.bonus_type, detail.current_level_value, detail.next_level_value
        );
    }

    let stats = system.cache_stats();
    println!(
        "effect cache: {} hits, {} misses, {} evictions",
        stats.effect_hits, stats.effect_misses, stats.evictions
    );
    Ok(())
}
