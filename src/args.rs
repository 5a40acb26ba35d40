//! Parse command line arguments and the lowering configuration file.
//! A hand-rolled parser is enough for the handful of flags the driver takes.

use std::env;
use std::path::Path;

use anyhow::{anyhow, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configuration options for the lowering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoweringConfig {
  /// Let distinctly named source variables share one declaration.
  pub fuse_names: bool,
  /// Run the SSA validator before and after the CSSA translation.
  pub validate: bool,
  /// Names the output must never declare.
  pub blacklist: Vec<String>,
  /// Patterns of names the output must never declare, matched against the
  /// whole name.
  pub blacklist_patterns: Vec<String>,
  /// Blacklist the C and C++ keywords.
  pub c_keywords: bool,
}

impl Default for LoweringConfig {
  fn default() -> Self {
    LoweringConfig {
      fuse_names: false,
      validate: true,
      blacklist: vec![],
      blacklist_patterns: vec![],
      c_keywords: true,
    }
  }
}

impl LoweringConfig {
  pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(text)
  }

  pub fn from_file(path: &Path) -> anyhow::Result<Self> {
    let text = std::fs::read_to_string(path)
      .with_context(|| format!("cannot read config file {}", path.display()))?;
    LoweringConfig::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
  }

  pub fn blacklist_regexes(&self) -> Result<Vec<Regex>, regex::Error> {
    self
      .blacklist_patterns
      .iter()
      .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
      .collect()
  }
}

/// Configuration options for this driver run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Config {
  pub verbose: bool,
  pub dump_ssa: bool,
  pub dump_cssa: bool,
  pub dump_allocation: bool,
  pub config_file: Option<String>,
  pub file: String,
}

pub fn parse_args() -> anyhow::Result<Config> {
  parse_args_from(env::args().skip(1))
}

/// Parses command line input (without the program name) into a configuration.
pub fn parse_args_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<Config> {
  let mut config = Config::default();
  let mut file = None;
  let mut args = args.into_iter();
  while let Some(arg) = args.next() {
    match arg.as_str() {
      "-v" | "--verbose" => config.verbose = true,
      "--dump-ssa" => config.dump_ssa = true,
      "--dump-cssa" => config.dump_cssa = true,
      "--dump-allocation" => config.dump_allocation = true,
      "-c" | "--config" => {
        let path = args.next().ok_or_else(|| anyhow!("expected a config file after {}", arg))?;
        config.config_file = Some(path);
      }
      other if other.starts_with('-') => return Err(anyhow!("unknown option {}", other)),
      other => {
        if let Some(previous) = file.replace(other.to_string()) {
          return Err(anyhow!("more than one input file: {} and {}", previous, other));
        }
      }
    }
  }

  config.file = file.ok_or_else(|| anyhow!("expected an input file"))?;
  Ok(config)
}
