//! CLI subcommand implementations.

pub mod merchant;
pub mod migrate;
