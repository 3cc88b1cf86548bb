use crate::registry::ResourceContribution;
use serde::{Deserialize, Serialize};

/// The resolved aggregate of every contribution to one resource.
///
/// `income`, `consumption` and `cap` are sums; `multiplier` and
/// `cap_multiplier` are products. The default is the neutral value returned
/// for resources nothing contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceValue {
    pub income: f64,
    pub multiplier: f64,
    pub consumption: f64,
    pub cap: f64,
    pub cap_multiplier: f64,
}

impl Default for ResourceValue {
    fn default() -> Self {
        Self {
            income: 0.0,
            multiplier: 1.0,
            consumption: 0.0,
            cap: 0.0,
            cap_multiplier: 1.0,
        }
    }
}

impl ResourceValue {
    /// Fold one contribution into the aggregate.
    pub fn apply(&mut self, kind: ResourceContribution, value: f64) {
        let slot = self.slot_mut(kind);
        *slot = kind.aggregation().combine(*slot, value);
    }

    pub fn get(&self, kind: ResourceContribution) -> f64 {
        match kind {
            ResourceContribution::Income => self.income,
            ResourceContribution::Multiplier => self.multiplier,
            ResourceContribution::Cap => self.cap,
            ResourceContribution::CapMultiplier => self.cap_multiplier,
            ResourceContribution::Consumption => self.consumption,
        }
    }

    fn slot_mut(&mut self, kind: ResourceContribution) -> &mut f64 {
        match kind {
            ResourceContribution::Income => &mut self.income,
            ResourceContribution::Multiplier => &mut self.multiplier,
            ResourceContribution::Cap => &mut self.cap,
            ResourceContribution::CapMultiplier => &mut self.cap_multiplier,
            ResourceContribution::Consumption => &mut self.consumption,
        }
    }

    /// Income after multipliers, minus consumption.
    pub fn net_income(&self) -> f64 {
        self.income * self.multiplier - self.consumption
    }

    /// Cap after cap multipliers.
    pub fn effective_cap(&self) -> f64 {
        self.cap * self.cap_multiplier
    }
}
