//! Transport binary resolution.
//!
//! Checks that `ssh` (and `sshpass` for password auth) can be found before
//! any host is dispatched, so a missing client is one run-fatal error instead
//! of a connect failure per host.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::FanoutError;

/// Resolve `cmd` to a path on the system.
///
/// - If `cmd` contains a path separator it is treated as an explicit path and
///   checked directly.
/// - Otherwise each directory in `PATH` is searched in order.
///
/// Returns the first executable match, or `FanoutError::TransportCmdNotFound`.
pub fn resolve_program(cmd: &str) -> Result<PathBuf, FanoutError> {
    resolve_program_with(cmd, std::env::var_os("PATH"))
}

fn resolve_program_with(cmd: &str, path_var: Option<OsString>) -> Result<PathBuf, FanoutError> {
    let not_found = || FanoutError::TransportCmdNotFound {
        cmd: cmd.to_owned(),
    };

    if cmd.is_empty() {
        return Err(not_found());
    }

    if cmd.contains(std::path::MAIN_SEPARATOR) || cmd.contains('/') {
        let p = PathBuf::from(cmd);
        return if is_executable(&p) { Ok(p) } else { Err(not_found()) };
    }

    let paths = path_var.ok_or_else(not_found)?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

/// Returns `true` when `path` is a regular file with an execute bit set.
fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o755)
            .open(path)
            .unwrap();
    }

    #[test]
    fn resolves_sh_on_real_path() {
        let result = resolve_program("sh");
        assert!(result.is_ok(), "sh should exist on PATH: {result:?}");
        assert!(result.unwrap().is_file());
    }

    #[test]
    fn fails_for_nonexistent_command() {
        let err = resolve_program("fanout-nonexistent-binary-xyz-999").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not found on PATH"), "got: {msg}");
        assert!(msg.contains("fanout-nonexistent-binary-xyz-999"), "got: {msg}");
    }

    #[test]
    fn fails_for_empty_command() {
        assert!(resolve_program("").is_err());
    }

    #[test]
    fn explicit_path_is_checked_directly() {
        assert!(resolve_program("/no/such/ssh").is_err());

        let sh = resolve_program("sh").unwrap();
        let again = resolve_program(sh.to_str().unwrap()).unwrap();
        assert_eq!(again, sh);
    }

    #[test]
    fn fails_without_path_var() {
        assert!(resolve_program_with("sh", None).is_err());
        assert!(resolve_program_with("sh", Some(OsString::new())).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn finds_binary_in_custom_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("my-ssh");
        make_executable(&bin);

        let found = resolve_program_with("my-ssh", Some(dir.path().as_os_str().to_owned())).unwrap();
        assert_eq!(found, bin);
    }

    #[cfg(unix)]
    #[test]
    fn earlier_path_entry_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        make_executable(&first.path().join("ssh"));
        make_executable(&second.path().join("ssh"));

        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();
        let found = resolve_program_with("ssh", Some(path_var)).unwrap();
        assert_eq!(found, first.path().join("ssh"));
    }

    #[test]
    fn skips_directory_with_same_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("ssh")).unwrap();

        let result = resolve_program_with("ssh", Some(dir.path().as_os_str().to_owned()));
        assert!(result.is_err(), "directory should not be treated as executable");
    }

    #[cfg(unix)]
    #[test]
    fn skips_file_without_execute_permission() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("ssh");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        let result = resolve_program_with("ssh", Some(dir.path().as_os_str().to_owned()));
        assert!(result.is_err(), "file without execute permission should be skipped");
    }
}
