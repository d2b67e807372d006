use serde::{Deserialize, Serialize};

use reverie_core::types::LlmParams;

/// Where an override row hangs. Resolution walks personality → channel →
/// user → admin, first non-null field wins; hard-coded defaults close the
/// cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigTier {
    Admin,
    User,
    Channel,
    Personality,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Channel => "channel",
            Self::Personality => "personality",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ConfigTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "channel" => Ok(Self::Channel),
            "personality" => Ok(Self::Personality),
            other => Err(format!("unknown config tier: {other}")),
        }
    }
}

/// Which tier ultimately supplied the resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    ContextOverride,
    UserDefault,
    SystemDefault,
}

/// Output of `LlmConfigResolver::resolve`.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLlmConfig {
    pub params: LlmParams,
    pub source: ResolutionSource,
    /// Display name of the override that won, when one did.
    pub source_name: Option<String>,
}
