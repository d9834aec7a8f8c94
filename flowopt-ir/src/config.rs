//! Optimizer configuration.
//!
//! An [`OptimizerConfig`] is usually built with [`Default`] and tweaked, or read from a TOML table:
//!
//! ```toml
//! ssa-level = "top-level"
//! hdse-runs-limit = 2
//! insert-null-checks = true
//!
//! [print]
//! ir-after = ["hdse"]
//! dot = true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// Which variables the SSA builder renames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SsaLevel {
    /// Non-volatile locals whose address is never taken.
    TopLevel,
    /// Address-taken locals and globals, through may-defs and may-uses.
    AddrTaken,
    #[default]
    All,
}

/// Knobs for the optimizer pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptimizerConfig {
    pub ssa_level: SsaLevel,
    /// How many times HDSE may run over one function.
    pub hdse_runs_limit: u32,
    /// Collapse back to back definitions of the same non-SSA target.
    pub remove_redefine: bool,
    /// Materialize the null checks implied by deleted dereferences.
    pub insert_null_checks: bool,
    pub fold_constant_branches: bool,
    pub backward_substitution: bool,
    /// Skip a function instead of failing when a pass reports an unsupported shape.
    pub allow_partial: bool,
    pub print: PrintConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            ssa_level: SsaLevel::default(),
            hdse_runs_limit: 4,
            remove_redefine: false,
            insert_null_checks: false,
            fold_constant_branches: true,
            backward_substitution: true,
            allow_partial: true,
            print: PrintConfig::default(),
        }
    }
}

/// Which passes get their output dumped through `tracing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PrintConfig {
    /// Pass names after which the function is printed.  `"all"` matches every pass.
    pub ir_after: Vec<String>,
    /// Also print the CFG in Graphviz dot syntax.
    pub dot: bool,
    /// Print dominator trees and frontiers when they are computed.
    pub dominators: bool,
}

impl PrintConfig {
    pub fn after(&self, pass: &str) -> bool {
        self.ir_after.iter().any(|name| name == pass || name == "all")
    }
}

impl OptimizerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, IrError> {
        toml::from_str(text).map_err(|err| IrError::InvalidConfig(err.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, IrError> {
        toml::to_string(self).map_err(|err| IrError::InvalidConfig(err.to_string()))
    }
}
