mod scripts;
mod transform;

pub use scripts::ensure_materialised;
pub use transform::{
    dedup_path, transform, EnvMap, ShellCommand, MIRROR_PATH, MIRROR_PROMPT, MIRROR_VIRTUAL_ENV,
};

use std::path::{Path, PathBuf};

use anyhow::Result;
use sysinfo::{Pid, System};
use which::which;

use crate::core::errors::Error;

/// How far up the process tree detection will look for a shell.
const MAX_PARENT_DEPTH: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellKind {
    Cmd,
    Bash,
    Zsh,
    Fish,
    /// A recognised shell with no activation transform rule.
    Other(String),
}

impl ShellKind {
    /// Maps a process/binary name onto a shell kind. Returns `None` for
    /// processes that are not shells at all, so the parent walk can keep
    /// climbing past them.
    #[must_use]
    pub fn from_binary_name(name: &str) -> Option<Self> {
        // Lowercase before stripping: Windows reports names like CMD.EXE.
        let name = name.to_lowercase();
        let name = name.strip_suffix(".exe").unwrap_or(&name);
        match name {
            "cmd" => Some(Self::Cmd),
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "fish" => Some(Self::Fish),
            "sh" | "dash" | "ksh" | "csh" | "tcsh" | "nu" | "pwsh" | "powershell" | "xonsh" => {
                Some(Self::Other(name.to_string()))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Cmd => "cmd",
            Self::Bash => "bash",
            Self::Zsh => "zsh",
            Self::Fish => "fish",
            Self::Other(name) => name,
        }
    }
}

/// The detected enclosing shell. Derived per activation request and never
/// cached; the user's shell can change between runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellIdentity {
    pub kind: ShellKind,
    pub path: PathBuf,
}

/// Detects the enclosing shell from the parent process chain, falling back
/// to the platform's default shell variable.
///
/// # Errors
/// Returns [`Error::ShellDetection`] when neither the process chain nor the
/// `SHELL`/`COMSPEC` fallback yields a shell.
pub fn detect() -> Result<ShellIdentity> {
    if let Some(identity) = detect_from_parents() {
        return Ok(identity);
    }
    fallback_shell()
}

fn detect_from_parents() -> Option<ShellIdentity> {
    let system = System::new_all();
    let mut pid = Pid::from_u32(std::process::id());
    for _ in 0..MAX_PARENT_DEPTH {
        let process = system.process(pid)?;
        let name = process.name().to_string_lossy().to_string();
        if let Some(kind) = ShellKind::from_binary_name(&name) {
            let path = process
                .exe()
                .map(Path::to_path_buf)
                .or_else(|| which(&name).ok())?;
            tracing::debug!("detected shell {} at {}", kind.label(), path.display());
            return Some(ShellIdentity { kind, path });
        }
        pid = process.parent()?;
    }
    None
}

fn fallback_shell() -> Result<ShellIdentity> {
    let var = if cfg!(windows) { "COMSPEC" } else { "SHELL" };
    let Some(raw) = std::env::var_os(var) else {
        return Err(Error::ShellDetection(format!(
            "no shell found in the parent process chain and {var} is not set"
        ))
        .into());
    };
    let path = PathBuf::from(raw);
    let kind = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(ShellKind::from_binary_name)
        .unwrap_or_else(|| {
            ShellKind::Other(
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        });
    Ok(ShellIdentity { kind, path })
}
