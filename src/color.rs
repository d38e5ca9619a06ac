#![allow(clippy::module_name_repetitions)]
//! Colour-aware stderr one-liners for the CLI.
//!
//! Results go to stdout uncoloured (text or JSON); only status lines on stderr are painted.
//! Compute `color_enabled_stderr()` once per command and pass it down.

use clap::ValueEnum;
use once_cell::sync::OnceCell;

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

static COLOR_MODE: OnceCell<ColorMode> = OnceCell::new();

/// Set by the CLI `--color` flag; first call wins.
pub fn set_color_mode(mode: ColorMode) {
    let _ = COLOR_MODE.set(mode);
}

fn parse_color_mode(s: &str) -> Option<ColorMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ColorMode::Auto),
        "always" | "on" | "true" | "yes" | "1" => Some(ColorMode::Always),
        "never" | "off" | "false" | "no" | "0" => Some(ColorMode::Never),
        _ => None,
    }
}

fn resolve(mode: Option<ColorMode>, no_color: bool, is_tty: bool) -> bool {
    // NO_COLOR (https://no-color.org/) beats everything
    if no_color {
        return false;
    }
    match mode.unwrap_or(ColorMode::Auto) {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => is_tty,
    }
}

pub fn color_enabled_stderr() -> bool {
    let mode = COLOR_MODE.get().copied().or_else(|| {
        std::env::var("SANDBOX_SESSION_COLOR")
            .ok()
            .and_then(|v| parse_color_mode(&v))
    });
    resolve(
        mode,
        std::env::var_os("NO_COLOR").is_some(),
        atty::is(atty::Stream::Stderr),
    )
}

/// Wrap `s` in an ANSI colour code when enabled.
pub fn paint(enabled: bool, code: &str, s: &str) -> String {
    if enabled {
        format!("{code}{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

pub fn log_info_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[36;1m", msg));
}

pub fn log_warn_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[33m", msg));
}

pub fn log_error_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, "\x1b[31;1m", msg));
}
