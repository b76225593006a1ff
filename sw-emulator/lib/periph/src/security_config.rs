/*++

Licensed under the Apache-2.0 license.

File Name:

    security_config.rs

Abstract:

    File contains the build-time security configuration of the SoC and its
    TOML loader.

--*/

use serde::{de, Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Vulnerability switches and secrets read when the SoC is built.
///
/// The file is shared with SoC features that are not modelled here, so
/// unknown keys are ignored. Switches accept TOML booleans as well as the
/// `"yes"`/`"no"` strings used by the board configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Lock bit gating the JTAG port, cleared on system reset.
    #[serde(deserialize_with = "switch")]
    pub jtag_lock_overlap: bool,

    /// Lock bit gating the JTAG port, kept across system reset.
    #[serde(deserialize_with = "switch")]
    pub jtag_lock_firmware: bool,

    /// Compare a firmware-written password against `jtag_password_key`.
    #[serde(deserialize_with = "switch")]
    pub jtag_password: bool,

    /// Compare a firmware-written password against a firmware-written reference.
    #[serde(deserialize_with = "switch")]
    pub jtag_password_random: bool,

    /// 4-character ASCII key used by the static password policies.
    pub jtag_password_key: Option<String>,

    /// Open the debug port and disable every JTAG vulnerability.
    #[serde(alias = "jtag_debug", deserialize_with = "switch")]
    pub debug_override: bool,

    /// 4 hexadecimal digits expected by the keypad unlock panel.
    pub admin_dashboard_key: Option<String>,

    /// Build the loop-back lock handler and its secret tables.
    #[serde(deserialize_with = "switch")]
    pub loop_back_signal: bool,
}

impl SecurityConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded security configuration");
        Ok(config)
    }

    /// Applies the command-line debug escape hatch on top of the file.
    pub fn with_debug_override(mut self, debug_override: bool) -> Self {
        self.debug_override |= debug_override;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Switch {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn switch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Switch::deserialize(deserializer)? {
        Switch::Bool(value) => Ok(value),
        Switch::Int(0) => Ok(false),
        Switch::Int(1) => Ok(true),
        Switch::Int(other) => Err(de::Error::custom(format!(
            "expected 0 or 1, found {other}"
        ))),
        Switch::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" => Ok(false),
            _ => Err(de::Error::custom(format!(
                "expected yes or no, found {text:?}"
            ))),
        },
    }
}
