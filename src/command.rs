//! Command representation produced by the parser and consumed by the interpreter.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s; the output of every stage except the last
//! one feeds the input of the stage to its right.

use std::ffi::{CString, NulError};
use std::fmt;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Exit code of a child whose program could not be resolved or replaced.
pub const EXEC_FAILED: ExitCode = 127;

/// Name used as the prefix of every diagnostic the shell prints.
pub const SHELL_NAME: &str = "shellish";

/// Outcome of processing one input line, as seen by the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Keep reading lines.
    Continue,
    /// The user asked the shell to terminate (`exit` or end of input).
    Exit,
}

impl Status {
    /// Numeric form of the status: 0 to continue, 1 to exit.
    pub fn code(self) -> ExitCode {
        match self {
            Status::Continue => 0,
            Status::Exit => 1,
        }
    }
}

/// How an output redirection opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `>`: create or truncate.
    Truncate,
    /// `>>`: create or append.
    Append,
}

/// The three redirection slots of a stage.
///
/// Slot 0 is `input` (`<path`), slot 1 is `truncate` (`>path`), slot 2 is `append` (`>>path`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects {
    pub input: Option<String>,
    pub truncate: Option<String>,
    pub append: Option<String>,
}

impl Redirects {
    /// Returns the slot at `index` (0 = input, 1 = truncate, 2 = append).
    pub fn slot(&self, index: usize) -> Option<&str> {
        match index {
            0 => self.input.as_deref(),
            1 => self.truncate.as_deref(),
            2 => self.append.as_deref(),
            _ => None,
        }
    }

    /// The output target that should be applied, if any. Append wins over truncate.
    pub fn output(&self) -> Option<(&str, OutputMode)> {
        if let Some(path) = &self.append {
            return Some((path, OutputMode::Append));
        }
        self.truncate.as_deref().map(|path| (path, OutputMode::Truncate))
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.truncate.is_none() && self.append.is_none()
    }
}

/// One command within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    /// Executable or builtin name. The empty string is the "blank line" no-op.
    pub name: String,
    /// argv-style arguments; `arguments[0]` equals `name` unless the stage is blank.
    pub arguments: Vec<String>,
    /// The line ended with `&`.
    pub background: bool,
    /// The line ended with `?`.
    pub auto_complete: bool,
    pub redirects: Redirects,
}

impl Stage {
    /// Creates a stage whose argument vector starts with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            arguments: vec![name.clone()],
            name,
            ..Self::default()
        }
    }

    /// The stage produced by a blank line: empty name, no arguments.
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.name.is_empty()
    }

    /// Arguments after `arguments[0]`.
    pub fn args(&self) -> &[String] {
        self.arguments.get(1..).unwrap_or(&[])
    }

    /// NUL-terminated argument vector for program replacement.
    ///
    /// The list terminator required by `execve` is appended by `nix`.
    pub fn argv(&self) -> Result<Vec<CString>, NulError> {
        self.arguments
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "Command: <{}>", self.name)?;
        writeln!(f, "\tIs Background: {}", yes_no(self.background))?;
        writeln!(f, "\tNeeds Auto-complete: {}", yes_no(self.auto_complete))?;
        writeln!(f, "\tRedirects:")?;
        for i in 0..3 {
            writeln!(f, "\t\t{}: {}", i, self.redirects.slot(i).unwrap_or("N/A"))?;
        }
        writeln!(f, "\tArguments ({}):", self.arguments.len())?;
        for (i, arg) in self.arguments.iter().enumerate() {
            writeln!(f, "\t\tArg {}: {}", i, arg)?;
        }
        Ok(())
    }
}

/// A non-empty, ordered chain of stages built from one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Builds a pipeline; an empty list becomes a single blank stage.
    pub fn new(stages: Vec<Stage>) -> Self {
        if stages.is_empty() {
            return Self::blank();
        }
        Self { stages }
    }

    pub fn blank() -> Self {
        Self {
            stages: vec![Stage::blank()],
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The first stage. Always present.
    pub fn head(&self) -> &Stage {
        &self.stages[0]
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_background(&self) -> bool {
        self.head().background
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                writeln!(f, "\tPiped to:")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}
