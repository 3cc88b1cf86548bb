//! The formula engine: a stateless evaluator turning a formula descriptor and
//! a leveled [`SourceState`] into a scalar.
//!
//! Modifiers do not carry closures. They carry a [`FormulaTemplate`] whose
//! coefficients may refer to the modifier's resolved dependency values by
//! slot. The orchestrator resolves the dependencies, instantiates the
//! template into a concrete [`Formula`], and only then evaluates it, so the
//! engine itself never sees dependency values.

use crate::state::SourceState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing formulas from untyped descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("unknown formula type: {0}")]
    UnknownFormulaType(String),
}

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

/// The tag of a formula descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaKind {
    Linear,
    Exponential,
}

impl FromStr for FormulaKind {
    type Err = FormulaError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "linear" => Ok(FormulaKind::Linear),
            "exponential" => Ok(FormulaKind::Exponential),
            other => Err(FormulaError::UnknownFormulaType(other.to_string())),
        }
    }
}

impl fmt::Display for FormulaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaKind::Linear => f.write_str("linear"),
            FormulaKind::Exponential => f.write_str("exponential"),
        }
    }
}

/// A pure mathematical descriptor evaluated against level and efficiency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Formula {
    /// `a * level * efficiency + b`
    Linear { a: f64, b: f64 },
    /// `a * (level * efficiency)^b`
    Exponential { a: f64, b: f64 },
}

impl Formula {
    /// Build a formula from an untyped tag, e.g. one read from a catalog file.
    pub fn from_tag(tag: &str, a: f64, b: f64) -> Result<Self, FormulaError> {
        Ok(Self::new(tag.parse()?, a, b))
    }

    pub fn new(kind: FormulaKind, a: f64, b: f64) -> Self {
        match kind {
            FormulaKind::Linear => Formula::Linear { a, b },
            FormulaKind::Exponential => Formula::Exponential { a, b },
        }
    }

    pub fn kind(&self) -> FormulaKind {
        match self {
            Formula::Linear { .. } => FormulaKind::Linear,
            Formula::Exponential { .. } => FormulaKind::Exponential,
        }
    }

    /// Evaluate this formula for the given state.
    pub fn evaluate(&self, state: &SourceState) -> f64 {
        evaluate(self, state)
    }
}

/// Evaluate `formula` against `state`.
pub fn evaluate(formula: &Formula, state: &SourceState) -> f64 {
    let x = state.effective_level();
    match *formula {
        Formula::Linear { a, b } => a * x + b,
        Formula::Exponential { a, b } => a * x.powf(b),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// One coefficient of a [`FormulaTemplate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coefficient {
    /// A fixed number.
    Constant(f64),
    /// `scale * deps[slot] + offset`, where `deps` are the resolved values of
    /// the owning modifier's dependency list.
    Dependency { slot: usize, scale: f64, offset: f64 },
}

impl Coefficient {
    /// The plain value of a dependency slot.
    pub fn dependency(slot: usize) -> Self {
        Coefficient::Dependency {
            slot,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Resolve against dependency values. Missing slots resolve to zero.
    pub fn resolve(&self, deps: &[f64]) -> f64 {
        match *self {
            Coefficient::Constant(value) => value,
            Coefficient::Dependency {
                slot,
                scale,
                offset,
            } => scale * deps.get(slot).copied().unwrap_or(0.0) + offset,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match *self {
            Coefficient::Constant(_) => None,
            Coefficient::Dependency { slot, .. } => Some(slot),
        }
    }
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Coefficient::Constant(value)
    }
}

/// A formula whose coefficients may depend on other effects' values.
///
/// Instantiating with the resolved dependency values yields the concrete
/// [`Formula`] the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormulaTemplate {
    pub kind: FormulaKind,
    pub a: Coefficient,
    pub b: Coefficient,
}

impl FormulaTemplate {
    /// A template with constant coefficients only.
    pub fn constant(formula: Formula) -> Self {
        match formula {
            Formula::Linear { a, b } => Self::linear(a, b),
            Formula::Exponential { a, b } => Self::exponential(a, b),
        }
    }

    pub fn linear(a: impl Into<Coefficient>, b: impl Into<Coefficient>) -> Self {
        Self {
            kind: FormulaKind::Linear,
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn exponential(a: impl Into<Coefficient>, b: impl Into<Coefficient>) -> Self {
        Self {
            kind: FormulaKind::Exponential,
            a: a.into(),
            b: b.into(),
        }
    }

    /// Bake dependency values into a concrete formula.
    pub fn instantiate(&self, deps: &[f64]) -> Formula {
        Formula::new(self.kind, self.a.resolve(deps), self.b.resolve(deps))
    }

    /// Highest dependency slot referenced by either coefficient.
    pub fn max_slot(&self) -> Option<usize> {
        self.a.slot().max(self.b.slot())
    }
}

impl From<Formula> for FormulaTemplate {
    fn from(formula: Formula) -> Self {
        Self::constant(formula)
    }
}
