//! Activation orchestration: shell detection, environment transform,
//! script materialisation and the interactive session itself.

use anyhow::{Context, Result};

use crate::core::process;
use crate::core::shell::{
    self, EnvMap, ShellCommand, MIRROR_PATH, MIRROR_PROMPT, MIRROR_VIRTUAL_ENV,
};
use crate::core::venv::VEnv;

/// Launches an interactive shell with `venv` activated and blocks until it
/// exits. Returns the shell's exit code.
///
/// The parent environment is never modified; all updates ride on the child
/// process, with the tool-private mirror variables carrying the intended
/// state past the shell's own startup files.
///
/// # Errors
/// Returns an error when no shell can be detected, the activation scripts
/// cannot be written, or the shell fails to start.
pub fn activate(venv: &VEnv) -> Result<i32> {
    let identity = shell::detect()?;
    shell::ensure_materialised()?;

    let env = environment_snapshot();
    let plan = shell::transform(&identity, venv, &env)?;

    tracing::info!(
        "activating {} in {}",
        venv.name(),
        identity.kind.label()
    );
    println!(
        "Starting {} with '{}' activated. Type 'exit' to return.",
        identity.kind.label(),
        venv.name()
    );

    run_session(&plan)
}

fn environment_snapshot() -> EnvMap {
    std::env::vars().collect()
}

fn run_session(plan: &ShellCommand) -> Result<i32> {
    let (program, args) = plan
        .command
        .split_first()
        .context("transform produced an empty command")?;

    let mut envs: Vec<(String, String)> = plan
        .env_updates
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    // Mirrors carry the intended state so the injected scripts can restore
    // it after the user's own startup files run.
    for (mirror, source) in [
        (MIRROR_PATH, "PATH"),
        (MIRROR_VIRTUAL_ENV, "VIRTUAL_ENV"),
        (MIRROR_PROMPT, "VIRTUAL_ENV_PROMPT"),
    ] {
        if let Some(value) = plan.env_updates.get(source) {
            envs.push((mirror.to_string(), value.clone()));
        }
    }

    let cwd = std::env::current_dir().context("working directory unavailable")?;
    let output = process::run_passthrough(program, args, &envs, &cwd)?;
    Ok(output.code)
}
