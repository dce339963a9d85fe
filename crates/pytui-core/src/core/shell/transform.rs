use anyhow::Result;
use indexmap::IndexMap;

use super::{scripts, ShellIdentity, ShellKind};
use crate::core::venv::VEnv;

/// Tool-private mirror variables carrying the intended activation state.
///
/// Shell startup files are free to rewrite PATH and the prompt after
/// launch; the injected activation scripts read these back as their last
/// step so repeated and nested activations stay idempotent.
pub const MIRROR_PATH: &str = "PYTUI_PATH";
pub const MIRROR_VIRTUAL_ENV: &str = "PYTUI_VIRTUAL_ENV";
pub const MIRROR_PROMPT: &str = "PYTUI_VIRTUAL_ENV_PROMPT";

/// Ordered environment mapping, last write wins.
pub type EnvMap = IndexMap<String, String>;

/// The shell invocation and environment updates for one activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    pub command: Vec<String>,
    pub env_updates: EnvMap,
}

fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Removes duplicate PATH entries, keeping the first occurrence of each and
/// preserving order otherwise. Idempotent.
#[must_use]
pub fn dedup_path(path: &str) -> String {
    let sep = path_separator();
    let mut seen = Vec::new();
    for entry in path.split(sep) {
        if !seen.iter().any(|existing| existing == &entry) {
            seen.push(entry);
        }
    }
    seen.join(&sep.to_string())
}

/// Computes the command and environment updates that activate `venv` inside
/// the detected shell. Pure: nothing is spawned or written here.
///
/// # Errors
/// Returns an error only when an activation-script path cannot be resolved
/// (no per-user data directory).
pub fn transform(identity: &ShellIdentity, venv: &VEnv, env: &EnvMap) -> Result<ShellCommand> {
    let prompt = env
        .get(MIRROR_PROMPT)
        .cloned()
        .unwrap_or_else(|| format!("pytui: {}", venv.name()));
    let new_path = env
        .get(MIRROR_PATH)
        .cloned()
        .unwrap_or_else(|| activation_path(venv, env.get("PATH").map(String::as_str)));
    let venv_root = env
        .get(MIRROR_VIRTUAL_ENV)
        .cloned()
        .unwrap_or_else(|| venv.folder.to_string_lossy().to_string());

    let mut env_updates = EnvMap::new();
    env_updates.insert("PATH".to_string(), new_path);
    env_updates.insert("VIRTUAL_ENV".to_string(), venv_root);
    env_updates.insert("VIRTUAL_ENV_PROMPT".to_string(), prompt.clone());

    let shell = identity.path.to_string_lossy().to_string();
    let command = match &identity.kind {
        ShellKind::Cmd => {
            // /k keeps the session open and suppresses the startup banner.
            let old_prompt = env.get("PROMPT").map_or("$P$G", String::as_str);
            let old_prompt = match env.get("VIRTUAL_ENV_PROMPT") {
                Some(old) => old_prompt
                    .strip_prefix(&format!("({old}) "))
                    .unwrap_or(old_prompt),
                None => old_prompt,
            };
            env_updates.insert("PROMPT".to_string(), format!("({prompt}) {old_prompt}"));
            vec![shell, "/k".to_string()]
        }
        ShellKind::Bash => {
            // The private rcfile sources ~/.bashrc itself, then decorates
            // PS1 from the mirror variables; the live PS1 is left alone.
            let rcfile = scripts::bashrc_path()?;
            vec![
                shell,
                "--rcfile".to_string(),
                rcfile.to_string_lossy().to_string(),
            ]
        }
        ShellKind::Zsh => {
            if let Some(old) = env.get("ZDOTDIR") {
                env_updates.insert("OLD_ZDOTDIR".to_string(), old.clone());
            }
            let dotdir = scripts::zsh_dotdir()?;
            env_updates.insert(
                "ZDOTDIR".to_string(),
                dotdir.to_string_lossy().to_string(),
            );
            vec![shell]
        }
        ShellKind::Fish => {
            let script = scripts::fish_script_path()?;
            vec![
                shell,
                "-C".to_string(),
                format!("source \"{}\"", script.display()),
                "-i".to_string(),
            ]
        }
        ShellKind::Other(name) => {
            // VIRTUAL_ENV_PROMPT stays set so tools inside the session can
            // see the active venv; only the prompt decoration is skipped.
            tracing::warn!(
                "no activation rule for shell '{name}'; PATH inside the session \
                 may not reflect the activated environment"
            );
            vec![shell]
        }
    };

    Ok(ShellCommand {
        command,
        env_updates,
    })
}

fn activation_path(venv: &VEnv, current: Option<&str>) -> String {
    let mut joined = venv.bin_dir().to_string_lossy().to_string();
    if let Some(current) = current {
        if !current.is_empty() {
            joined.push(path_separator());
            joined.push_str(current);
        }
    }
    dedup_path(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn venv_at(folder: &str) -> VEnv {
        let folder = PathBuf::from(folder);
        VEnv {
            executable: crate::core::venv::venv_python(&folder),
            parent_executable: PathBuf::from("/usr/bin/python3"),
            version: "3.12.1".to_string(),
            folder,
        }
    }

    fn env_of(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn dedup_path_keeps_first_occurrence() {
        let sep = path_separator();
        let input = ["/a", "/b", "/a", "/c", "/b"].join(&sep.to_string());
        let expected = ["/a", "/b", "/c"].join(&sep.to_string());
        assert_eq!(dedup_path(&input), expected);
    }

    #[test]
    fn dedup_path_is_idempotent() {
        let sep = path_separator();
        let input = ["/x", "/y", "/x", "/x"].join(&sep.to_string());
        let once = dedup_path(&input);
        assert_eq!(dedup_path(&once), once);
    }

    #[cfg(unix)]
    #[test]
    fn cmd_transform_matches_activation_contract() {
        let identity = ShellIdentity {
            kind: ShellKind::Cmd,
            path: PathBuf::from("/bin/cmd"),
        };
        let venv = venv_at("/proj/.venv");
        let env = env_of(&[("PROMPT", "$P$G"), ("PATH", "/usr/bin")]);

        let result = transform(&identity, &venv, &env).unwrap();
        assert_eq!(result.command, vec!["/bin/cmd", "/k"]);
        assert_eq!(
            result.env_updates.get("PATH").unwrap(),
            "/proj/.venv/bin:/usr/bin"
        );
        assert_eq!(result.env_updates.get("VIRTUAL_ENV").unwrap(), "/proj/.venv");
        assert_eq!(
            result.env_updates.get("VIRTUAL_ENV_PROMPT").unwrap(),
            "pytui: .venv"
        );
        assert_eq!(
            result.env_updates.get("PROMPT").unwrap(),
            "(pytui: .venv) $P$G"
        );
    }

    #[cfg(unix)]
    #[test]
    fn reactivation_replaces_prompt_prefix() {
        let identity = ShellIdentity {
            kind: ShellKind::Cmd,
            path: PathBuf::from("/bin/cmd"),
        };
        let venv = venv_at("/proj/.venv2");
        let env = env_of(&[
            ("PROMPT", "(pytui: .venv) $P$G"),
            ("VIRTUAL_ENV_PROMPT", "pytui: .venv"),
            ("PATH", "/proj/.venv/bin:/usr/bin"),
        ]);

        let result = transform(&identity, &venv, &env).unwrap();
        let prompt = result.env_updates.get("PROMPT").unwrap();
        assert_eq!(prompt, "(pytui: .venv2) $P$G");
        assert_eq!(prompt.matches("(pytui:").count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn repeated_transform_yields_single_prefix() {
        let identity = ShellIdentity {
            kind: ShellKind::Cmd,
            path: PathBuf::from("/bin/cmd"),
        };
        let venv = venv_at("/proj/.venv");
        let mut env = env_of(&[("PROMPT", "$P$G"), ("PATH", "/usr/bin")]);

        let first = transform(&identity, &venv, &env).unwrap();
        for (key, value) in &first.env_updates {
            env.insert(key.clone(), value.clone());
        }
        let second = transform(&identity, &venv, &env).unwrap();
        assert_eq!(
            second.env_updates.get("PROMPT").unwrap(),
            "(pytui: .venv) $P$G"
        );
        assert_eq!(second.env_updates.get("PATH").unwrap(), first.env_updates.get("PATH").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn mirror_variables_take_precedence() {
        let identity = ShellIdentity {
            kind: ShellKind::Cmd,
            path: PathBuf::from("/bin/cmd"),
        };
        let venv = venv_at("/proj/.venv");
        let env = env_of(&[
            ("PROMPT", "$P$G"),
            (MIRROR_PATH, "/proj/.venv/bin:/usr/bin"),
            (MIRROR_VIRTUAL_ENV, "/proj/.venv"),
            (MIRROR_PROMPT, "pytui: .venv"),
        ]);

        let result = transform(&identity, &venv, &env).unwrap();
        assert_eq!(
            result.env_updates.get("PATH").unwrap(),
            "/proj/.venv/bin:/usr/bin"
        );
        assert_eq!(
            result.env_updates.get("PROMPT").unwrap(),
            "(pytui: .venv) $P$G"
        );
    }

    #[cfg(unix)]
    #[test]
    fn zsh_points_at_private_dotdir_and_saves_old() {
        let identity = ShellIdentity {
            kind: ShellKind::Zsh,
            path: PathBuf::from("/bin/zsh"),
        };
        let venv = venv_at("/proj/.venv");
        let env = env_of(&[("PATH", "/usr/bin"), ("ZDOTDIR", "/home/user/cfg")]);

        let result = transform(&identity, &venv, &env).unwrap();
        assert_eq!(result.command, vec!["/bin/zsh"]);
        assert_eq!(
            result.env_updates.get("OLD_ZDOTDIR").unwrap(),
            "/home/user/cfg"
        );
        let dotdir = result.env_updates.get("ZDOTDIR").unwrap();
        assert!(Path::new(dotdir).ends_with("zsh"));
        assert!(result.env_updates.get("PS1").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn bash_uses_private_rcfile_without_touching_ps1() {
        let identity = ShellIdentity {
            kind: ShellKind::Bash,
            path: PathBuf::from("/bin/bash"),
        };
        let venv = venv_at("/proj/.venv");
        let env = env_of(&[("PATH", "/usr/bin"), ("PS1", "\\u@\\h$ ")]);

        let result = transform(&identity, &venv, &env).unwrap();
        assert_eq!(result.command[0], "/bin/bash");
        assert_eq!(result.command[1], "--rcfile");
        assert!(result.command[2].ends_with("pytui.bashrc"));
        assert!(result.env_updates.get("PS1").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn unknown_shell_gets_bare_command() {
        let identity = ShellIdentity {
            kind: ShellKind::Other("nu".to_string()),
            path: PathBuf::from("/bin/nu"),
        };
        let venv = venv_at("/proj/.venv");
        let env = env_of(&[("PATH", "/usr/bin")]);

        let result = transform(&identity, &venv, &env).unwrap();
        assert_eq!(result.command, vec!["/bin/nu"]);
        // The variable stays visible even though no prompt is decorated.
        assert_eq!(
            result.env_updates.get("VIRTUAL_ENV_PROMPT").unwrap(),
            "pytui: .venv"
        );
        assert!(result.env_updates.get("PROMPT").is_none());
        assert!(result.env_updates.get("PATH").is_some());
    }
}
