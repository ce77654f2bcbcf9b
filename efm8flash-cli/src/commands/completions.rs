//! Shell completion generation and installation.

use {
    crate::Cli,
    anyhow::{Context, Result},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    std::{
        env, fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

/// Binary name completions are generated for.
const BIN_NAME: &str = "efm8flash";

/// Completion script for `shell`.
fn render(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    generate(shell, &mut Cli::command(), BIN_NAME, &mut io::stdout());
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }
    // PowerShell does not set $SHELL on Windows
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }
    None
}

/// Map a shell binary path to its `Shell`.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())?;
    match name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

/// `$var`, or `$HOME/<fallback>` when unset.
fn xdg_dir(var: &str, fallback: &[&str]) -> Result<PathBuf> {
    if let Ok(dir) = env::var(var) {
        return Ok(PathBuf::from(dir));
    }
    Ok(fallback
        .iter()
        .fold(home_dir()?, |dir, part| dir.join(part)))
}

/// Where each shell picks up user completions.
fn install_path(shell: Shell) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => xdg_dir("XDG_DATA_HOME", &[".local", "share"])?
            .join("bash-completion/completions")
            .join(BIN_NAME),
        Shell::Zsh => home_dir()?
            .join(".zfunc")
            .join(format!("_{BIN_NAME}")),
        Shell::Fish => xdg_dir("XDG_CONFIG_HOME", &[".config"])?
            .join("fish/completions")
            .join(format!("{BIN_NAME}.fish")),
        Shell::Elvish => xdg_dir("XDG_CONFIG_HOME", &[".config"])?
            .join("elvish/lib")
            .join(format!("{BIN_NAME}.elv")),
        Shell::PowerShell => {
            let dir = match env::var("PROFILE") {
                Ok(profile) => PathBuf::from(profile)
                    .parent()
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                Err(_) => home_dir()?.join(".config/powershell/completions"),
            };
            dir.join(format!("{BIN_NAME}.ps1"))
        },
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    };
    Ok(path)
}

/// Make zsh search ~/.zfunc, once.
fn ensure_zsh_fpath() -> Result<()> {
    let zshrc = home_dir()?.join(".zshrc");
    let fpath_line = "fpath=(~/.zfunc $fpath)";
    let present = fs::read_to_string(&zshrc).is_ok_and(|content| content.contains(fpath_line));
    if present {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN_NAME} completions\n{fpath_line}\nautoload -Uz compinit && compinit")?;
    eprintln!(
        "{} Added fpath to {}",
        style("✓").green().bold(),
        style(zshrc.display()).yellow()
    );
    Ok(())
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(shell) => shell,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             efm8flash completions --install bash",
        )?,
    };

    let path = install_path(shell)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, render(shell))
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(format!("{shell:?}")).cyan(),
        style(path.display()).yellow()
    );

    match shell {
        Shell::Bash => eprintln!(
            "\nActivate now with: {}",
            style(format!("source {}", path.display())).cyan()
        ),
        Shell::Zsh => {
            ensure_zsh_fpath()?;
            eprintln!("\nRestart your shell or run: {}", style("exec zsh").cyan());
        },
        Shell::PowerShell => eprintln!(
            "\nAdd to your PowerShell profile: {}",
            style(format!("Import-Module {}", path.display())).cyan()
        ),
        _ => eprintln!("\nCompletions load automatically in new sessions."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert_eq!(shell_from_path("/bin/bash"), Some(Shell::Bash));
        assert_eq!(shell_from_path("/usr/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_path("/usr/local/bin/fish"), Some(Shell::Fish));
        assert_eq!(shell_from_path("elvish"), Some(Shell::Elvish));
        assert_eq!(shell_from_path("/usr/bin/pwsh"), Some(Shell::PowerShell));
    }

    #[test]
    fn test_shell_from_path_unknown() {
        assert_eq!(shell_from_path("/usr/bin/tcsh"), None);
        assert_eq!(shell_from_path(""), None);
    }

    #[test]
    fn test_install_paths_use_binary_name() {
        if home_dir().is_err() {
            return;
        }
        let bash = install_path(Shell::Bash).unwrap();
        assert!(bash.ends_with("bash-completion/completions/efm8flash"));

        let zsh = install_path(Shell::Zsh).unwrap();
        assert!(zsh.ends_with(".zfunc/_efm8flash"));

        let fish = install_path(Shell::Fish).unwrap();
        assert!(fish.ends_with("fish/completions/efm8flash.fish"));

        let elvish = install_path(Shell::Elvish).unwrap();
        assert!(elvish.ends_with("elvish/lib/efm8flash.elv"));
    }

    #[test]
    fn test_render_mentions_subcommands() {
        let bash = String::from_utf8(render(Shell::Bash)).unwrap();
        assert!(bash.contains("efm8flash"));
        assert!(bash.contains("disable-bootloader"));

        for shell in [Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish] {
            assert!(!render(shell).is_empty());
        }
    }
}
