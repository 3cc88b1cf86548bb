use serde::{Deserialize, Serialize};

/// Mutable state of a single bonus source: how far it has been upgraded and
/// how well it is currently running.
///
/// This is the only mutable domain state in the engine. Save systems persist
/// it themselves and replay it through
/// [`BonusSystem::update_bonus_source_level`](crate::system::BonusSystem::update_bonus_source_level)
/// or [`BonusSystem::set_source_state`](crate::system::BonusSystem::set_source_state).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    pub level: u32,
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
}

fn default_efficiency() -> f64 {
    1.0
}

impl SourceState {
    pub fn new(level: u32, efficiency: f64) -> Self {
        Self { level, efficiency }
    }

    /// A state at `level` running at full efficiency.
    pub fn at_level(level: u32) -> Self {
        Self::new(level, default_efficiency())
    }

    /// The same efficiency one level higher. Used for upgrade previews.
    pub fn next_level(&self) -> Self {
        Self::new(self.level.saturating_add(1), self.efficiency)
    }

    /// `level * efficiency`, the scalar every formula is driven by.
    pub fn effective_level(&self) -> f64 {
        f64::from(self.level) * self.efficiency
    }
}

impl Default for SourceState {
    fn default() -> Self {
        Self::at_level(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_level_zero_full_efficiency() {
        let state = SourceState::default();
        assert_eq!(state.level, 0);
        assert_eq!(state.efficiency, 1.0);
    }

    #[test]
    fn next_level_keeps_efficiency() {
        let state = SourceState::new(4, 0.5);
        let next = state.next_level();
        assert_eq!(next.level, 5);
        assert_eq!(next.efficiency, 0.5);
    }

    #[test]
    fn next_level_saturates() {
        let state = SourceState::at_level(u32::MAX);
        assert_eq!(state.next_level().level, u32::MAX);
    }

    #[test]
    fn effective_level_is_product() {
        assert_eq!(SourceState::new(3, 2.0).effective_level(), 6.0);
    }
}
