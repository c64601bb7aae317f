//! Utilities module for logging and error handling
//!
//! This module provides:
//! - Structured logging with tracing
//! - The pipeline error taxonomy
//! - Small formatting helpers used by the CLI

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{FusionError, Result};
pub use logging::{init_logging, LogConfig, LogLevel, PhaseLogger};

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Format a probability as a bar of fixed width
pub fn format_probability_bar(probability: f32, width: usize) -> String {
    let filled = ((probability.clamp(0.0, 1.0) as f64) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:5.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        probability * 100.0
    )
}
