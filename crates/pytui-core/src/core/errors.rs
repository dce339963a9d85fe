use std::path::PathBuf;

/// Typed failures surfaced by the core.
///
/// Values are carried through `anyhow` and downcast where the caller needs
/// to branch on the failure kind (provider skipping, venv lifecycle).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not determine the enclosing shell: {0}")]
    ShellDetection(String),

    #[error("{organisation} backend executable is not available")]
    ProviderUnavailable { organisation: &'static str },

    #[error("{program} exited with status {code}: {stderr}")]
    Process {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("path already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("unreadable or malformed configuration at {0}")]
    MalformedConfig(PathBuf),
}

impl Error {
    #[must_use]
    pub fn is_provider_unavailable(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ProviderUnavailable { .. })
        )
    }

    #[must_use]
    pub fn is_already_exists(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Error>(), Some(Error::AlreadyExists(_)))
    }
}
