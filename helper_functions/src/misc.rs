use typenum::Unsigned as _;
use types::{
    phase0::primitives::{Epoch, Slot},
    preset::Preset,
};

#[must_use]
pub fn compute_epoch_at_slot<P: Preset>(slot: Slot) -> Epoch {
    slot / P::SlotsPerEpoch::U64
}

#[must_use]
pub const fn compute_start_slot_at_epoch<P: Preset>(epoch: Epoch) -> Slot {
    epoch.saturating_mul(P::SlotsPerEpoch::U64)
}

// `consensus-specs` uses this in at least 2 places:
// - <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#compute_slots_since_epoch_start>
// - <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/validator.md#broadcast-attestation>
#[must_use]
pub fn slots_since_epoch_start<P: Preset>(slot: Slot) -> u64 {
    slot - compute_start_slot_at_epoch::<P>(compute_epoch_at_slot::<P>(slot))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::preset::{Mainnet, Minimal};

    use super::*;

    #[test]
    fn test_epoch_at_slot() {
        assert_eq!(compute_epoch_at_slot::<Minimal>(9), 1);
        assert_eq!(compute_epoch_at_slot::<Minimal>(8), 1);
        assert_eq!(compute_epoch_at_slot::<Minimal>(7), 0);
        assert_eq!(compute_epoch_at_slot::<Mainnet>(63), 1);
    }

    #[test]
    fn test_start_slot_at_epoch() {
        assert_eq!(compute_start_slot_at_epoch::<Minimal>(1), 8);
        assert_eq!(compute_start_slot_at_epoch::<Mainnet>(2), 64);
    }

    #[test]
    fn test_start_slot_at_epoch_saturates() {
        assert_eq!(compute_start_slot_at_epoch::<Minimal>(Epoch::MAX), Slot::MAX);
    }

    #[test_case(0 => 0)]
    #[test_case(7 => 7)]
    #[test_case(8 => 0)]
    #[test_case(13 => 5)]
    fn test_slots_since_epoch_start(slot: Slot) -> u64 {
        slots_since_epoch_start::<Minimal>(slot)
    }
}
