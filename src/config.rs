use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, value::MEMORY_ADDRESS_THRESHOLD};

/// Sizing and placement of the execution arena for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Virtual address the arena is mapped at.
    pub base_address: u64,
    pub data_section_size: usize,
    pub stack_section_size: usize,
    pub code_section_size: usize,
    /// Backing storage for string literals.
    pub literal_section_size: usize,
    /// Where output sinks are created. Defaults to the system temp directory.
    pub sink_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_address: 0x6000_0000,
            data_section_size: 0x200,
            stack_section_size: 0x500,
            code_section_size: 0x2000,
            literal_section_size: 0x1000,
            sink_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Total number of bytes the arena spans, saved-stack-pointer cell included.
    pub fn arena_size(&self) -> Option<usize> {
        16usize
            .checked_add(self.data_section_size)?
            .checked_add(self.stack_section_size)?
            .checked_add(self.code_section_size)?
            .checked_add(self.literal_section_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sections = [
            ("data_section_size", self.data_section_size),
            ("stack_section_size", self.stack_section_size),
            ("code_section_size", self.code_section_size),
            ("literal_section_size", self.literal_section_size),
        ];
        for (name, size) in sections {
            if size == 0 || size % 16 != 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-zero multiple of 16, got {size:#x}"
                )));
            }
        }
        if self.data_section_size < 32 {
            return Err(ConfigError::Invalid(
                "data_section_size must hold at least one string cell".into(),
            ));
        }
        if self.base_address <= MEMORY_ADDRESS_THRESHOLD || self.base_address % 16 != 0 {
            return Err(ConfigError::Invalid(format!(
                "base_address {:#x} must be 16-byte aligned and above {MEMORY_ADDRESS_THRESHOLD:#x}",
                self.base_address
            )));
        }
        let size = self
            .arena_size()
            .ok_or_else(|| ConfigError::Invalid("arena size overflows".into()))?;
        let end = self.base_address.checked_add(size as u64);
        match end {
            Some(end) if end < 1 << 63 => Ok(()),
            _ => Err(ConfigError::Invalid(
                "arena must end below the sign bit of the address space".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_sizing() {
        let config = EngineConfig::default();
        assert_eq!(config.data_section_size, 0x200);
        assert_eq!(config.stack_section_size, 0x500);
        assert_eq!(config.code_section_size, 0x2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("data_section_size = 0x40\n").unwrap();
        assert_eq!(config.data_section_size, 0x40);
        assert_eq!(config.code_section_size, 0x2000);
    }

    #[test]
    fn rejects_unaligned_sections() {
        let err = EngineConfig::from_toml_str("stack_section_size = 100\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_base_below_threshold() {
        let err = EngineConfig::from_toml_str("base_address = 0x1000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("heap_size = 16\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
