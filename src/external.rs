use crate::command::{EXEC_FAILED, SHELL_NAME, Stage};
use crate::env::Environment;
use nix::errno::Errno;
use nix::unistd::{AccessFlags, access, execve};
use std::borrow::Cow;
use std::convert::Infallible;
use std::ffi::{CString, NulError, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Resolution failure for a command name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("command not found")]
    CommandNotFound,
}

/// Why a child could not become the requested program.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("argument contains a NUL byte")]
    Nul(#[from] NulError),
    #[error("{}", .0.desc())]
    Os(#[from] Errno),
}

/// Resolve a command name to the path that should be executed.
///
/// Behavior:
/// - A name containing `/` is returned as-is, without looking at `search_path` or the disk.
/// - Otherwise each non-empty `:`-separated entry of `search_path` is tried in order and the
///   first `<entry>/<name>` that exists, is not a directory, and is executable wins.
/// - An empty name, a missing `search_path`, or no match yields
///   [`ResolveError::CommandNotFound`].
pub fn resolve<'a>(search_path: Option<&OsStr>, name: &'a str) -> Result<Cow<'a, Path>, ResolveError> {
    if name.is_empty() {
        return Err(ResolveError::CommandNotFound);
    }
    if name.contains('/') {
        return Ok(Cow::Borrowed(Path::new(name)));
    }
    let search_path = search_path.ok_or(ResolveError::CommandNotFound)?;
    find_in_path(search_path, name)
        .map(Cow::Owned)
        .ok_or(ResolveError::CommandNotFound)
}

fn find_in_path(search_path: &OsStr, name: &str) -> Option<PathBuf> {
    search_path
        .as_bytes()
        .split(|&b| b == b':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(OsStr::from_bytes(dir)).join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    !path.is_dir() && access(path, AccessFlags::X_OK).is_ok()
}

/// Replace the current process image with the program named by `stage`.
///
/// Only returns on failure.
pub fn exec(stage: &Stage, env: &Environment) -> Result<Infallible, ExecError> {
    let search_path = env.get_var("PATH");
    if search_path.is_none() {
        tracing::debug!("PATH is not set, only direct paths can run");
    }
    let path = resolve(search_path.as_deref().map(OsStr::new), &stage.name)?;
    let path = CString::new(path.as_os_str().as_bytes())?;
    let argv = stage.argv()?;
    let envp = env.envp()?;
    Ok(execve(&path, &argv, &envp)?)
}

/// Child-side wrapper around [`exec`]: prints the canonical diagnostic and exits with 127.
pub fn exec_stage(stage: &Stage, env: &Environment) -> ! {
    let Err(e) = exec(stage, env);
    eprintln!("-{}: {}: {}", SHELL_NAME, stage.name, e);
    std::process::exit(EXEC_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn make_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").expect("write file");
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).expect("chmod");
        path
    }

    fn joined(dirs: &[&Path]) -> String {
        dirs.iter()
            .map(|d| d.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }

    #[test]
    fn name_with_separator_is_used_directly() {
        let res = resolve(None, "/does/not/exist");
        assert_eq!(res.unwrap().as_ref(), Path::new("/does/not/exist"));

        let res = resolve(Some(osstr("/bin")), "./local-tool");
        assert_eq!(res.unwrap().as_ref(), Path::new("./local-tool"));
    }

    #[test]
    fn bare_name_found_in_search_path() {
        let dir = TempDir::new().unwrap();
        let expected = make_file(dir.path(), "tool", 0o755);
        let search = joined(&[dir.path()]);
        let found = resolve(Some(osstr(&search)), "tool").expect("should resolve");
        assert_eq!(found.as_ref(), expected.as_path());
    }

    #[test]
    fn first_entry_in_listed_order_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_file(second.path(), "tool", 0o755);
        let expected = make_file(first.path(), "tool", 0o755);

        let search = joined(&[first.path(), second.path()]);
        let found = resolve(Some(osstr(&search)), "tool").unwrap();
        assert_eq!(found.as_ref(), expected.as_path());
    }

    #[test]
    fn non_executable_entries_are_skipped() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_file(first.path(), "tool", 0o644);
        let expected = make_file(second.path(), "tool", 0o755);

        let search = joined(&[first.path(), second.path()]);
        let found = resolve(Some(osstr(&search)), "tool").unwrap();
        assert_eq!(found.as_ref(), expected.as_path());
    }

    #[test]
    fn directories_are_not_commands() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("tool")).unwrap();
        let search = joined(&[dir.path()]);
        assert_eq!(
            resolve(Some(osstr(&search)), "tool"),
            Err(ResolveError::CommandNotFound)
        );
    }

    #[test]
    fn empty_entries_are_ignored() {
        let dir = TempDir::new().unwrap();
        let expected = make_file(dir.path(), "tool", 0o755);
        let search = format!("::{}:", dir.path().display());
        let found = resolve(Some(osstr(&search)), "tool").unwrap();
        assert_eq!(found.as_ref(), expected.as_path());
    }

    #[test]
    fn missing_search_path_is_not_found() {
        assert_eq!(resolve(None, "sh"), Err(ResolveError::CommandNotFound));
    }

    #[test]
    fn unknown_command_is_not_found() {
        let dir = TempDir::new().unwrap();
        let search = joined(&[dir.path()]);
        assert_eq!(
            resolve(Some(osstr(&search)), "nonexisting"),
            Err(ResolveError::CommandNotFound)
        );
    }

    #[test]
    fn empty_name_is_not_found() {
        assert_eq!(resolve(Some(osstr("/bin")), ""), Err(ResolveError::CommandNotFound));
    }

    #[test]
    fn diagnostics_read_like_a_shell() {
        let e = ExecError::from(ResolveError::CommandNotFound);
        assert_eq!(e.to_string(), "command not found");
        let e = ExecError::from(Errno::EACCES);
        assert_eq!(e.to_string(), "Permission denied");
    }
}
