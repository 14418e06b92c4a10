//! Line editing for the interactive prompt.

use crate::command::SHELL_NAME;
use crate::env::Environment;
use rustyline::error::ReadlineError;
use rustyline::{Cmd, DefaultEditor, KeyCode, KeyEvent, Modifiers};

/// One read from the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C: the current line is discarded.
    Interrupted,
    /// Ctrl-D on an empty line.
    Eof,
}

pub struct Editor {
    rl: DefaultEditor,
    host: String,
}

impl Editor {
    pub fn new() -> rustyline::Result<Self> {
        let mut rl = DefaultEditor::new()?;
        // Tab marks the line for completion instead of inserting whitespace.
        rl.bind_sequence(
            KeyEvent(KeyCode::Tab, Modifiers::NONE),
            Cmd::Insert(1, "?".into()),
        );
        Ok(Self {
            rl,
            host: hostname(),
        })
    }

    pub fn read_line(&mut self, env: &Environment) -> rustyline::Result<Input> {
        match self.rl.readline(&prompt(env, &self.host)) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.rl.add_history_entry(line.as_str())?;
                }
                Ok(Input::Line(line))
            }
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(err) => Err(err),
        }
    }
}

fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::debug!("gethostname failed: {e}");
            "localhost".to_string()
        }
    }
}

/// `<user>@<host>:<cwd> shellish$ `
pub fn prompt(env: &Environment, host: &str) -> String {
    let user = env.get_var("USER").unwrap_or_default();
    format!(
        "{}@{}:{} {}$ ",
        user,
        host,
        env.current_dir.display(),
        SHELL_NAME
    )
}
