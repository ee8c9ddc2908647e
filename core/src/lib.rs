pub mod action;
pub mod config;
pub mod language;
pub mod normalize;
pub mod process;
pub mod str_interp;
pub mod style;
pub mod testing;

pub use crate::config::Config;
pub use crate::language::Language;
