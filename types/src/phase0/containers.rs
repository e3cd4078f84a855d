use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::phase0::primitives::{Epoch, H256};

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Debug,
    Display,
    Deserialize,
    Serialize,
)]
#[display("{epoch}/{root:?}")]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: H256,
}
