// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration from an optional JSON file plus environment overrides.

use std::path::Path;

use schriftwerk_core::PipelineConfig;
use schriftwerk_core::error::{Result, SchriftwerkError};
use tracing::{debug, info};

/// Load the configuration: defaults, then the JSON file when given, then
/// `SCHRIFTWERK_*` variables from `lookup`. The result is validated.
pub fn load_config<F>(path: Option<&Path>, lookup: F) -> Result<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|err| {
                SchriftwerkError::Config(format!("cannot read {}: {err}", path.display()))
            })?;
            info!(path = %path.display(), "Loaded config file");
            parse_config(&raw)?
        }
        None => PipelineConfig::default(),
    };
    let config = base.with_overrides(lookup)?;
    debug!(?config, "Effective configuration");
    Ok(config)
}

/// Parse a JSON document; absent fields keep their defaults.
pub fn parse_config(raw: &str) -> Result<PipelineConfig> {
    serde_json::from_str(raw)
        .map_err(|err| SchriftwerkError::Config(format!("invalid config file: {err}")))
}
