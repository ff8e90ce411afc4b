//! Color and styling utilities with support for NO_COLOR and TERM environment variables.
//!
//! Colored output and emoji symbols are turned off by:
//! - `--no-color` CLI flag
//! - `NO_COLOR` environment variable (https://no-color.org/)
//! - `PETRI_NO_COLOR` environment variable (application-specific)
//! - `TERM=dumb` environment variable
//! - stderr not being a TTY

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

/// Global color configuration state
static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

/// Check environment variables and TTY state for color support
fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("PETRI_NO_COLOR").unwrap_or_default().is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        // log messages go to stderr
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        let colors_enabled = !no_color_flag && !should_disable_colors_from_env();
        Self { colors_enabled }
    }

    fn is_enabled(&self) -> bool {
        self.colors_enabled
    }
}

/// Initialize the color configuration with the CLI flag state.
/// Call once at startup, after parsing CLI arguments.
pub fn init_color_config(no_color_flag: bool) {
    let config = ColorConfig::new(no_color_flag);
    COLOR_CONFIG.set(config).unwrap_or_else(|_| {
        eprintln!("Warning: Color configuration already initialized");
    });
}

/// Check if colors are enabled based on configuration
pub fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.is_enabled())
        // Not initialized (library use): env vars and TTY only
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply color to a string only if colors are enabled for stderr output
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

/// Semantic color functions for log levels
pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }
}

/// Semantic symbols for different operation types and states
pub mod symbols {
    use super::colors_enabled;

    /// Symbol for the start of a time-lapse run
    pub fn tracking_start() -> &'static str {
        if colors_enabled() {
            "🧫 "
        } else {
            ""
        }
    }

    /// Symbol for the start of still-image counting
    pub fn counting_start() -> &'static str {
        if colors_enabled() {
            "🔍 "
        } else {
            ""
        }
    }

    /// Symbol for a located dish
    pub fn dish_found() -> &'static str {
        if colors_enabled() {
            "🎯 "
        } else {
            ""
        }
    }

    /// Symbol for finished mask construction
    pub fn masks_built() -> &'static str {
        if colors_enabled() {
            "⚙️  "
        } else {
            ""
        }
    }

    /// Symbol for a frame or unit left out of a series
    pub fn frame_skipped() -> &'static str {
        if colors_enabled() {
            "⏭️  "
        } else {
            "[SKIPPED] "
        }
    }

    /// Symbol for operation failures
    pub fn operation_failed() -> &'static str {
        if colors_enabled() {
            "❌ "
        } else {
            "[FAILED] "
        }
    }

    /// Symbol for successful completion
    pub fn completed_successfully() -> &'static str {
        if colors_enabled() {
            "✅ "
        } else {
            "[SUCCESS] "
        }
    }

    /// Symbol for partial success (some successes, some failures)
    pub fn completed_partially_successfully() -> &'static str {
        if colors_enabled() {
            "⚠️  "
        } else {
            "[PARTIAL-SUCCESS] "
        }
    }

    pub fn warning() -> &'static str {
        if colors_enabled() {
            "⚠️  "
        } else {
            ""
        }
    }
}

/// Progress bar utilities that respect TTY state
pub mod progress {
    use crate::progress::add_progress_bar;

    use super::colors_enabled;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};

    const COLOR_TEMPLATE: &str =
        "[{elapsed_precise}] [{bar:30.green/black}] {pos}/{len} ({percent}%) {msg}";
    const PLAIN_TEMPLATE: &str = "[{elapsed_precise}] [{bar:30}] {pos}/{len} ({percent}%) {msg}";

    /// Create a progress bar for batch processing, only if stderr is interactive
    pub fn create_batch_progress_bar(total: usize) -> Option<ProgressBar> {
        if total <= 1 || !stderr().is_terminal() {
            return None;
        }

        let pb = ProgressBar::new(total as u64);
        add_progress_bar(pb.clone());
        let (template, chars) = if colors_enabled() {
            (COLOR_TEMPLATE, "█▓▒░")
        } else {
            (PLAIN_TEMPLATE, "#> ")
        };
        // Templates are constants; a rejected template only loses styling
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(style.progress_chars(chars));
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Some(pb)
    }

    /// Finish a bar and detach it from the global multi-progress
    pub fn finish_batch_progress_bar(pb: Option<ProgressBar>, message: &str) {
        if let Some(pb) = pb {
            pb.finish_with_message(message.to_string());
            crate::progress::remove_progress_bar(&pb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_config_respects_no_color_flag() {
        let config = ColorConfig::new(true);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_color_config_respects_no_color_env() {
        std::env::set_var("NO_COLOR", "1");
        let config = ColorConfig::new(false);
        assert!(!config.is_enabled());
        std::env::remove_var("NO_COLOR");
    }

    #[test]
    fn test_color_config_respects_term_dumb() {
        std::env::set_var("TERM", "dumb");
        let config = ColorConfig::new(false);
        assert!(!config.is_enabled());
        std::env::remove_var("TERM");
    }

    #[test]
    fn test_color_config_respects_petri_no_color() {
        std::env::set_var("PETRI_NO_COLOR", "1");
        let config = ColorConfig::new(false);
        assert!(!config.is_enabled());
        std::env::remove_var("PETRI_NO_COLOR");
    }

    #[test]
    fn test_symbols_fall_back_to_text_without_colors() {
        COLOR_CONFIG
            .set(ColorConfig {
                colors_enabled: false,
            })
            .ok();

        use colored::Colorize;
        assert_eq!(maybe_color_stderr("test", |s| s.red()), "test");
        assert_eq!(symbols::operation_failed(), "[FAILED] ");
        assert_eq!(symbols::dish_found(), "");
    }
}
