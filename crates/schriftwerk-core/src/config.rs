// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline configuration.
//
// The core recognises exactly six options. They are read from the environment
// (or a JSON file in the binary) and validated once at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchriftwerkError};
use crate::types::LanguageSet;

pub const ENV_CONCURRENCY: &str = "SCHRIFTWERK_CONCURRENCY";
pub const ENV_PAGE_TIMEOUT_MS: &str = "SCHRIFTWERK_PAGE_TIMEOUT_MS";
pub const ENV_JOB_TIMEOUT_MS: &str = "SCHRIFTWERK_JOB_TIMEOUT_MS";
pub const ENV_MAX_FAILED_RATIO: &str = "SCHRIFTWERK_MAX_FAILED_RATIO";
pub const ENV_DPI: &str = "SCHRIFTWERK_DPI";
pub const ENV_LANGUAGES: &str = "SCHRIFTWERK_LANGUAGES";

const MAX_CONCURRENCY: usize = 64;
const MIN_DPI: u32 = 72;
const MAX_DPI: u32 = 1200;

/// Settings for the document-processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of pages recognised concurrently (K).
    pub concurrency_limit: usize,
    /// Per-page recognition timeout in milliseconds.
    pub page_timeout_ms: u64,
    /// Whole-job deadline in milliseconds.
    pub job_timeout_ms: u64,
    /// Largest tolerated `failed / total` page ratio before the job fails.
    pub max_failed_page_ratio: f64,
    /// Rasterization resolution.
    pub raster_dpi: u32,
    /// Languages used when a request does not name any.
    pub default_languages: LanguageSet,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            concurrency_limit: parallelism.clamp(1, 8),
            page_timeout_ms: 60_000,
            job_timeout_ms: 600_000,
            max_failed_page_ratio: 0.5,
            raster_dpi: 300,
            default_languages: LanguageSet::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `SCHRIFTWERK_*` environment variables, validated.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then validate.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            self.concurrency_limit = parse_number(ENV_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PAGE_TIMEOUT_MS) {
            self.page_timeout_ms = parse_number(ENV_PAGE_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_JOB_TIMEOUT_MS) {
            self.job_timeout_ms = parse_number(ENV_JOB_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_FAILED_RATIO) {
            self.max_failed_page_ratio = parse_number(ENV_MAX_FAILED_RATIO, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DPI) {
            self.raster_dpi = parse_number(ENV_DPI, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LANGUAGES) {
            self.default_languages = LanguageSet::parse(&raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check every option is inside its supported range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency_limit) {
            return Err(SchriftwerkError::Config(format!(
                "concurrency limit must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency_limit
            )));
        }
        if self.page_timeout_ms == 0 {
            return Err(SchriftwerkError::Config(
                "page timeout must be greater than zero".into(),
            ));
        }
        if self.job_timeout_ms == 0 {
            return Err(SchriftwerkError::Config(
                "job timeout must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failed_page_ratio) {
            return Err(SchriftwerkError::Config(format!(
                "max failed page ratio must be within 0.0..=1.0, got {}",
                self.max_failed_page_ratio
            )));
        }
        if !(MIN_DPI..=MAX_DPI).contains(&self.raster_dpi) {
            return Err(SchriftwerkError::Config(format!(
                "raster DPI must be between {MIN_DPI} and {MAX_DPI}, got {}",
                self.raster_dpi
            )));
        }
        if self.default_languages.is_empty() {
            return Err(SchriftwerkError::Config(
                "default language set is empty".into(),
            ));
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SchriftwerkError::Config(format!("{key}: cannot parse '{raw}'")))
}
