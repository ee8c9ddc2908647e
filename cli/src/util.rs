use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::exit;

use colored::Colorize;
use crosscheck_core::style::ColorTheme;
use crosscheck_core::Config;

use crate::cmd::GlobalArgs;

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current dir: {}", e);
        exit(1);
    })
}

/// `path` as seen from the current dir.
pub fn absolute(path: impl AsRef<Path>) -> PathBuf {
    fsutil::normalize_path(fsutil::resolve_against(current_dir(), path))
}

/// `--config` when given, otherwise the nearest `crosscheck.toml`.
pub fn load_config(global: &GlobalArgs) -> anyhow::Result<Config> {
    match &global.config {
        Some(path) => Config::from_toml_file(absolute(path)),
        None => Config::from_file_finding_in_ancestors(current_dir()),
    }
}

/// `info` by default; `RUST_LOG` overrides.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = record.level();
            writeln!(
                buf,
                "{} {}",
                format!("[{}]", level).color(level.color()).bold(),
                record.args()
            )
        })
        .init();
}
