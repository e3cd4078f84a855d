use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Configuration variables customizable at runtime.
///
/// See [configurations in `consensus-specs`](https://github.com/ethereum/consensus-specs/tree/aac851f860fa384916f62027b2dbe3318a354c5b/configs).
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,

    // Fork choice
    pub proposer_score_boost: u64,
    pub safe_slots_to_update_justified: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Use `default` as the default `config_name` and override it in `Config::mainnet`.
            // This way custom network data will be kept separate from mainnet data if a user
            // forgets to specify a custom `CONFIG_NAME`.
            config_name: Cow::Borrowed("default"),

            proposer_score_boost: 40,
            safe_slots_to_update_justified: 8,
        }
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn minimal() -> Self {
        Self {
            config_name: Cow::Borrowed("minimal"),
            ..Self::default()
        }
    }

    /// Returns a configuration identical to `self` but without proposer score boosting.
    ///
    /// Useful for reasoning about attestation weight in isolation.
    #[must_use]
    pub fn without_proposer_boost(self) -> Self {
        Self {
            proposer_score_boost: 0,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_default_values() -> Result<(), serde_yaml::Error> {
        let config = serde_yaml::from_str::<Config>("CONFIG_NAME: holesky\n")?;

        assert_eq!(config.config_name, "holesky");
        assert_eq!(config.proposer_score_boost, 40);
        assert_eq!(config.safe_slots_to_update_justified, 8);

        Ok(())
    }

    #[test]
    fn keys_are_screaming_snake_case() -> Result<(), serde_yaml::Error> {
        let yaml = "\
            CONFIG_NAME: custom\n\
            PROPOSER_SCORE_BOOST: 70\n\
            SAFE_SLOTS_TO_UPDATE_JUSTIFIED: 2\n\
        ";

        let config = serde_yaml::from_str::<Config>(yaml)?;

        assert_eq!(config.proposer_score_boost, 70);
        assert_eq!(config.safe_slots_to_update_justified, 2);

        Ok(())
    }

    #[test]
    fn predefined_configs_differ_only_in_name() {
        let mainnet = Config::mainnet();
        let minimal = Config::minimal();

        assert_ne!(mainnet, minimal);
        assert_eq!(
            Config {
                config_name: minimal.config_name.clone(),
                ..mainnet
            },
            minimal,
        );
    }
}
