//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a format name from the config file
    pub fn parse(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a unit fraction as percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

/// Format an optional water level in feet
pub fn format_level(level: Option<f64>) -> String {
    match level {
        Some(level) => format!("{:.2} ft", level),
        None => "-".to_string(),
    }
}

/// Color severity based on value
pub fn color_severity(severity: &str) -> String {
    match severity.to_uppercase().as_str() {
        "LOW" => severity.green().to_string(),
        "MODERATE" => severity.yellow().to_string(),
        "HIGH" => severity.truecolor(255, 140, 0).to_string(),
        "SEVERE" | "EXTREME" => severity.red().bold().to_string(),
        _ => severity.to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "fresh" => status.green().to_string(),
        "degraded" | "reused" => status.yellow().to_string(),
        "unhealthy" | "fallback" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color confidence based on value
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format_percent(confidence);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}
