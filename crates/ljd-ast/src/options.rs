// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_LIVENESS_ROUNDS: usize = 100;

/// Options controlling the decompilation pipeline.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[clap(next_help_heading = "Pipeline Options")]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Upper bound on full sweeps of the slot liveness analysis
    #[clap(long = "max-liveness-rounds", default_value_t = DEFAULT_MAX_LIVENESS_ROUNDS)]
    pub max_liveness_rounds: usize,

    /// Keep compiler temporaries as separate locals
    #[clap(long = "skip-temporary-elimination")]
    pub skip_temporary_elimination: bool,

    /// Structure chained conditionals as nested ifs instead of and/or expressions
    #[clap(long = "skip-short-circuit-folding")]
    pub skip_short_circuit_folding: bool,

    /// Render counted loops as while loops
    #[clap(long = "skip-for-loop-recognition")]
    pub skip_for_loop_recognition: bool,

    /// Run the validator after every stage, not only on the final tree
    #[clap(long = "validate-each-pass")]
    pub validate_each_pass: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_liveness_rounds: DEFAULT_MAX_LIVENESS_ROUNDS,
            skip_temporary_elimination: false,
            skip_short_circuit_folding: false,
            skip_for_loop_recognition: false,
            validate_each_pass: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid pipeline options in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

impl PipelineOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| OptionsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
