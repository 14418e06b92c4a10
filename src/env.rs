use crate::history::History;
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::{CString, NulError};
use std::path::PathBuf;

/// Mutable, user-level view of the process environment used by the interpreter.
///
/// The environment contains:
/// - `vars`: a map of environment variables that will be visible to executed commands.
/// - `current_dir`: the working directory for command execution.
/// - `should_exit`: a flag that the read loop checks to know when to terminate.
/// - `history`: the lines entered so far, listed by the `history` builtin.
///
/// It is owned by the interpreter and handed to builtins explicitly. A forked stage gets its
/// own copy, so nothing a child does to it is visible to the shell.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// When set to true, indicates that the read loop should exit.
    pub should_exit: bool,
    pub history: History,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// This copies variables from `std::env::vars_os()` and initializes `current_dir`
    /// from `std::env::current_dir()`. Variables that are not valid UTF-8 are skipped.
    pub fn new() -> Self {
        let vars = stdenv::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars,
            current_dir,
            should_exit: false,
            history: History::new(),
        }
    }

    /// Get the value of an environment variable.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// `KEY=VALUE` strings handed to replaced programs.
    pub fn envp(&self) -> Result<Vec<CString>, NulError> {
        self.vars
            .iter()
            .map(|(k, v)| CString::new(format!("{k}={v}")))
            .collect()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
