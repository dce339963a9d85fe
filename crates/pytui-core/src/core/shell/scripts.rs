//! Activation-script assets, one per supported shell family.
//!
//! The scripts are embedded in the binary and materialised on demand into
//! the per-user data directory; [`super::transform`] only computes their
//! paths so it can stay side-effect free. The contract between this core
//! and the scripts is the `PYTUI_*` mirror-variable set in
//! [`super::transform`].

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};

const BASHRC: &str = include_str!("../../../assets/shells/pytui.bashrc");
const ZSHRC: &str = include_str!("../../../assets/shells/pytui.zshrc");
const FISH: &str = include_str!("../../../assets/shells/activate_pytui.fish");

const SCRIPT_DIR_ENV: &str = "PYTUI_SHELL_SCRIPT_DIR";

/// Root folder for the materialised scripts.
///
/// # Errors
/// Returns an error when no per-user data directory can be resolved.
pub fn script_root() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(SCRIPT_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }
    let data = dirs_next::data_local_dir().ok_or_else(|| anyhow!("user data directory not found"))?;
    Ok(data.join("pytui").join("shells"))
}

pub fn bashrc_path() -> Result<PathBuf> {
    Ok(script_root()?.join("pytui.bashrc"))
}

/// Directory handed to zsh as `ZDOTDIR`; the script inside must be named
/// `.zshrc` for zsh to pick it up.
pub fn zsh_dotdir() -> Result<PathBuf> {
    Ok(script_root()?.join("zsh"))
}

pub fn fish_script_path() -> Result<PathBuf> {
    Ok(script_root()?.join("activate_pytui.fish"))
}

/// Writes the embedded scripts out, refreshing any that drifted from the
/// bundled content (old versions of this tool may have left stale copies).
///
/// # Errors
/// Returns an error when the script directory cannot be created or written.
pub fn ensure_materialised() -> Result<()> {
    let root = script_root()?;
    let zsh_dir = root.join("zsh");
    fs::create_dir_all(&zsh_dir)
        .with_context(|| format!("creating shell script dir {}", root.display()))?;

    let files = [
        (root.join("pytui.bashrc"), BASHRC),
        (zsh_dir.join(".zshrc"), ZSHRC),
        (root.join("activate_pytui.fish"), FISH),
    ];
    for (path, contents) in files {
        let current = fs::read_to_string(&path).ok();
        if current.as_deref() != Some(contents) {
            fs::write(&path, contents)
                .with_context(|| format!("writing shell script {}", path.display()))?;
        }
    }
    Ok(())
}
