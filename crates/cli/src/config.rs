use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use decoding::{BeamSearchConfig, MaxLengthPolicy};
use model::{SpecialTokens, TransformerConfig};
use serde::{Deserialize, Serialize};

/// Everything one `transformer` invocation needs, read from a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub model: TransformerConfig,
    #[serde(default)]
    pub tokens: SpecialTokens,
    #[serde(default)]
    pub decoding: BeamSearchConfig,
    #[serde(default)]
    pub max_length: MaxLengthPolicy,
}

impl RunConfig {
    /// Reads TOML or JSON depending on the extension, then validates every section.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: RunConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Some("toml") | None => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Some(other) => bail!("unsupported configuration extension '{other}'"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.tokens.validate(&self.model)?;
        self.decoding.validate()?;
        self.max_length.validate()?;
        Ok(())
    }
}
