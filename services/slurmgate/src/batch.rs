//! Batch job specifications and script rendering.
//!
//! A [`BatchSpec`] is what a tenant submits. A [`BatchRenderer`] turns it
//! into the `batch.sh` handed to the scheduler; [`SbatchRenderer`] emits
//! `#SBATCH` directives followed by the tenant's script body.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Batch job specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSpec {
    /// Job name; also the job's display name.
    pub job_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntasks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus_per_task: Option<u32>,

    /// Memory per node, e.g. `4G`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<String>,

    /// Wall time limit, e.g. `01:30:00`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<String>,

    /// stdout path pattern, relative to the job directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// stderr path pattern, relative to the job directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Variables exported before the script body runs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Shell commands to run.
    pub script: String,
}

impl BatchSpec {
    /// Minimal spec with a name and script body.
    pub fn new(job_name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            script: script.into(),
            ..Self::default()
        }
    }

    /// Check the spec can be rendered safely.
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(invalid("job_name", "must not be empty"));
        }
        if self.job_name.chars().any(char::is_control) {
            return Err(invalid("job_name", "must not contain control characters"));
        }

        let directives = [
            ("partition", &self.partition),
            ("account", &self.account),
            ("mem", &self.mem),
            ("time_limit", &self.time_limit),
            ("output", &self.output),
            ("error", &self.error),
        ];
        for (field, value) in directives {
            if let Some(value) = value {
                if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err(invalid(field, "must be a single non-empty token"));
                }
            }
        }

        let counts = [
            ("nodes", self.nodes),
            ("ntasks", self.ntasks),
            ("cpus_per_task", self.cpus_per_task),
        ];
        for (field, value) in counts {
            if value == Some(0) {
                return Err(invalid(field, "must be at least 1"));
            }
        }

        for key in self.environment.keys() {
            if !is_shell_identifier(key) {
                return Err(invalid(
                    "environment",
                    &format!("{key:?} is not a valid variable name"),
                ));
            }
        }

        if self.script.trim().is_empty() {
            return Err(invalid("script", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::Validation(format!("{field}: {message}"))
}

fn is_shell_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a value for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Renders a batch spec into a script.
pub trait BatchRenderer: Send + Sync {
    /// Write the script for `spec` to `out`.
    fn render(&self, spec: &BatchSpec, out: &mut dyn Write) -> Result<()>;
}

/// Renders `#SBATCH` directives followed by the script body.
#[derive(Debug, Clone)]
pub struct SbatchRenderer {
    shell: String,
}

impl SbatchRenderer {
    pub fn new() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
        }
    }

    /// Use a different interpreter for the shebang line.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for SbatchRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRenderer for SbatchRenderer {
    fn render(&self, spec: &BatchSpec, out: &mut dyn Write) -> Result<()> {
        spec.validate()?;

        writeln!(out, "#!{}", self.shell)?;
        writeln!(out, "#SBATCH --job-name={}", spec.job_name)?;

        let directives = [
            ("partition", spec.partition.as_deref().map(str::to_string)),
            ("account", spec.account.as_deref().map(str::to_string)),
            ("nodes", spec.nodes.map(|n| n.to_string())),
            ("ntasks", spec.ntasks.map(|n| n.to_string())),
            ("cpus-per-task", spec.cpus_per_task.map(|n| n.to_string())),
            ("mem", spec.mem.as_deref().map(str::to_string)),
            ("time", spec.time_limit.as_deref().map(str::to_string)),
            ("output", spec.output.as_deref().map(str::to_string)),
            ("error", spec.error.as_deref().map(str::to_string)),
        ];
        for (flag, value) in directives {
            if let Some(value) = value {
                writeln!(out, "#SBATCH --{flag}={value}")?;
            }
        }

        if !spec.environment.is_empty() {
            writeln!(out)?;
            for (key, value) in &spec.environment {
                writeln!(out, "export {key}={}", shell_quote(value))?;
            }
        }

        writeln!(out)?;
        out.write_all(spec.script.as_bytes())?;
        if !spec.script.ends_with('\n') {
            writeln!(out)?;
        }
        out.flush()?;

        Ok(())
    }
}
