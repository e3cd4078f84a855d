use derivative::Derivative;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct StoreConfig {
    /// Minimum position of the finalized block in the block array before it is pruned.
    #[derivative(Default(value = "256"))]
    pub prune_threshold: usize,
}

impl StoreConfig {
    /// Returns a configuration that prunes on every finalization.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            prune_threshold: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prune_threshold() {
        assert_eq!(StoreConfig::default().prune_threshold, 256);
        assert_eq!(StoreConfig::aggressive().prune_threshold, 0);
    }
}
