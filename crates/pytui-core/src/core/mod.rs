//! Internal implementation modules for `pytui-core`.

pub mod activate;
pub mod catalogue;
pub mod commands;
pub mod errors;
pub mod outcome;
pub mod process;
pub mod providers;
pub mod shell;
pub mod venv;
