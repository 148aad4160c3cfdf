//! Agent options.
//!
//! Options arrive as the JVM agent option string: comma separated entries,
//! either `key=value` or a bare flag, e.g.
//! `verbose,hide_packages=org.slf4j:com.acme.shaded,capture_stacks=false`.

use std::str::FromStr;

use crate::error::ConfigError;
use crate::module::package_prefix;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Log every link at `info` instead of `debug`.
    pub verbose: bool,
    /// Internal-name prefixes hidden from agent namespace resolution in
    /// every isolated context.
    pub hidden_packages: Vec<String>,
    /// Load advices eagerly for every module, not just the ones asking for it.
    pub eager_advice: bool,
    /// Attach a backtrace to nested linkage warnings.
    pub capture_stacks: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { verbose: false, hidden_packages: Vec::new(), eager_advice: false, capture_stacks: true }
    }
}

impl AgentConfig {
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        let mut config = AgentConfig::default();
        for entry in options.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (entry, None),
            };
            match key {
                "verbose" => config.verbose = flag(key, value)?,
                "eager_advice" => config.eager_advice = flag(key, value)?,
                "capture_stacks" => config.capture_stacks = flag(key, value)?,
                "hide_packages" => {
                    let value = value.filter(|v| !v.is_empty()).ok_or_else(|| ConfigError::MissingValue(key.to_string()))?;
                    config
                        .hidden_packages
                        .extend(value.split(':').filter(|p| !p.is_empty()).map(package_prefix));
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }
        Ok(config)
    }
}

impl FromStr for AgentConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentConfig::parse(s)
    }
}

/// A bare flag means `true`.
fn flag(key: &str, value: Option<&str>) -> Result<bool, ConfigError> {
    match value {
        None => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(ConfigError::InvalidBool { key: key.to_string(), value: v.to_string() }),
    }
}
