//! Shared output layer for pretty/text/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`] and formats its output
//! accordingly: pretty output for humans, compact text for scripts, or stable JSON.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. hidden `--json` flag
//! 2. `--format pretty|text|json`
//! 3. `FORMAT` env var
//! 4. Default: pretty if stdout is a TTY, text if piped.

use civic_core::error::{EngineError, ErrorCode};
use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, Write};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, key/value framing).
    Pretty,
    /// One line per result, tab-separated.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    const fn from_name(name: &str) -> Self {
        match name.as_bytes() {
            b"json" => Self::Json,
            b"pretty" => Self::Pretty,
            _ => Self::Text,
        }
    }
}

/// Resolve the output mode from flags, the `FORMAT` env var and TTY detection.
pub fn resolve_output_mode(json_flag: bool, format_flag: Option<OutputMode>) -> OutputMode {
    let flag_name = format_flag.map(|mode| match mode {
        OutputMode::Pretty => "pretty",
        OutputMode::Text => "text",
        OutputMode::Json => "json",
    });
    let env_val = std::env::var("FORMAT").ok();
    OutputMode::from_name(civic_core::config::resolve_output(
        json_flag,
        flag_name,
        env_val.as_deref(),
    ))
}

/// Render a serializable value with explicit text and pretty renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render a serializable value; text and pretty share one renderer.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if mode.is_json() {
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
    } else {
        human_fn(value, &mut out)?;
    }
    Ok(())
}

/// Structured error rendered to stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    pub fn with_details(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            suggestion: Some(suggestion.into()),
            error_code: Some(error_code.into()),
        }
    }

    fn from_code(message: String, code: ErrorCode) -> Self {
        Self {
            message,
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }

    /// Build from a command failure, keeping engine error codes when present.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(cli) = err.downcast_ref::<Self>() {
            return cli.clone();
        }
        if let Some(engine) = err.downcast_ref::<EngineError>() {
            return Self::from(engine);
        }
        Self::new(format!("{err:#}"))
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

impl From<&EngineError> for CliError {
    fn from(err: &EngineError) -> Self {
        Self::from_code(err.to_string(), err.code())
    }
}

/// Render an error to stderr: `error: ...` lines or `{"error": {...}}`.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    if mode.is_json() {
        let wrapper = serde_json::json!({ "error": error });
        serde_json::to_writer_pretty(&mut out, &wrapper)?;
        writeln!(out)?;
    } else {
        writeln!(out, "error: {}", error.message)?;
        if let Some(code) = &error.error_code {
            writeln!(out, "  code: {code}")?;
        }
        if let Some(suggestion) = &error.suggestion {
            writeln!(out, "  hint: {suggestion}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::model::IssueId;

    #[test]
    fn output_mode_from_resolved_name() {
        assert_eq!(OutputMode::from_name("json"), OutputMode::Json);
        assert_eq!(OutputMode::from_name("pretty"), OutputMode::Pretty);
        assert_eq!(OutputMode::from_name("text"), OutputMode::Text);
    }

    #[test]
    fn json_flag_wins() {
        assert!(resolve_output_mode(true, Some(OutputMode::Pretty)).is_json());
        assert_eq!(
            resolve_output_mode(false, Some(OutputMode::Text)),
            OutputMode::Text
        );
    }

    #[test]
    fn engine_errors_keep_their_code() {
        let err = anyhow::Error::new(EngineError::NotFound(IssueId(7)));
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some(ErrorCode::IssueNotFound.code()));
        assert!(cli.message.contains('7'));
    }

    #[test]
    fn plain_errors_have_no_code() {
        let cli = CliError::from_anyhow(&anyhow::anyhow!("boom"));
        assert_eq!(cli, CliError::new("boom"));
    }

    #[test]
    fn cli_errors_pass_through() {
        let original = CliError::with_details("no project", "run civic init", "E1001");
        let cli = CliError::from_anyhow(&anyhow::Error::new(original.clone()));
        assert_eq!(cli, original);
    }

    #[test]
    fn render_error_in_both_modes() {
        let err = CliError::with_details("bad input", "try again", "E2001");
        assert!(render_error(OutputMode::Json, &err).is_ok());
        assert!(render_error(OutputMode::Text, &err).is_ok());
    }
}
