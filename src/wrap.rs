//! Remote command construction.
//!
//! Every command string sent to a remote host is built here so there is
//! exactly one place to review how user input reaches the remote shell.
//!
//! # Quoting
//!
//! The wrapped forms hand the user's command to `bash -lc` as a single
//! argument. It is quoted with POSIX single quotes (embedded `'` becomes
//! `'\''`), so `$VAR`, backticks and `!` reach bash unexpanded and are
//! evaluated exactly once, inside the wrapped shell.

/// How the command should be wrapped before execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrapMode {
    /// Non-interactive privilege escalation (`sudo -n`), failing fast when a
    /// password would be required.
    pub privileged: bool,
    /// Run under a login shell so profile files are sourced.
    pub login_shell: bool,
}

/// Build the command string to execute remotely.
///
/// Privileged wrapping takes precedence over login-shell wrapping; the two
/// are never combined. A command that already starts with `sudo` is left
/// untouched in privileged mode.
pub fn build_remote_command(command: &str, mode: WrapMode) -> String {
    if mode.privileged {
        if starts_with_sudo(command) {
            return command.to_owned();
        }
        return format!("sudo -n bash -lc {}", shell_quote(command));
    }
    if mode.login_shell {
        return format!("bash -lc {}", shell_quote(command));
    }
    command.to_owned()
}

fn starts_with_sudo(command: &str) -> bool {
    let trimmed = command.trim_start();
    trimmed == "sudo" || trimmed.starts_with("sudo ") || trimmed.starts_with("sudo\t")
}

/// Quote `s` as one POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
