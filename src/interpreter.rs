use crate::builtin::{CommandFactory, Scope, default_builtins};
use crate::command::{EXEC_FAILED, OutputMode, Pipeline, Redirects, SHELL_NAME, Stage, Status};
use crate::editor::{Editor, Input};
use crate::env::Environment;
use crate::external;
use crate::job;
use crate::parser;
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{ForkResult, Pid, dup2, pipe};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use thiserror::Error;

/// Failure to set up the processes of a line. The line is abandoned; the shell keeps going.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("failed to fork: {0}")]
    Fork(#[source] nix::Error),
}

/// A minimal job-control shell: parses lines into pipelines and runs them as child processes.
///
/// The interpreter owns the [`Environment`] (variables, working directory, history) and the
/// list of builtins. Each line is turned into a [`Pipeline`] and executed by
/// [`Interpreter::process`]; external programs are run by forking and replacing the child's
/// process image.
///
/// Example
/// ```no_run
/// use shellish::{Interpreter, Status};
/// let mut sh = Interpreter::default();
/// assert_eq!(sh.run_line("echo hello | cut -d e -f2").unwrap(), Status::Continue);
/// ```
pub struct Interpreter {
    env: Environment,
    builtins: Vec<Box<dyn CommandFactory>>,
    print_commands: bool,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of builtins.
    pub fn new(builtins: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            builtins,
            print_commands: false,
        }
    }

    /// Print every parsed pipeline before running it.
    pub fn with_print_commands(mut self, enabled: bool) -> Self {
        self.print_commands = enabled;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Record `line` in the history, parse it and run it.
    pub fn run_line(&mut self, line: &str) -> anyhow::Result<Status> {
        self.env.history.record(line);
        let pipeline = parser::parse_line(line);
        if self.print_commands {
            print!("{}", pipeline);
        }
        tracing::trace!(?pipeline, "parsed");
        self.process(&pipeline)
    }

    /// Run a pipeline.
    ///
    /// Returns [`Status::Exit`] only when the `exit` builtin ran in the shell process. Exit
    /// codes of child processes are not reported: a line whose programs all failed still
    /// yields [`Status::Continue`].
    pub fn process(&mut self, pipeline: &Pipeline) -> anyhow::Result<Status> {
        let head = pipeline.head();
        if pipeline.len() == 1 {
            if head.is_blank() {
                return Ok(Status::Continue);
            }
            if self.builtin_scope(&head.name) == Some(Scope::Shell) {
                return Ok(self.run_in_shell(head));
            }
        }

        let pids = self.spawn(pipeline.stages())?;
        if pipeline.is_background() {
            if let Some(pid) = pids.last() {
                println!("background pid {}", pid);
            }
        } else {
            job::wait_all(&pids);
        }
        Ok(Status::Continue)
    }

    /// Read lines from the terminal until `exit` or end of input.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut editor = Editor::new()?;
        loop {
            for status in job::reap_finished() {
                tracing::debug!(?status, "background job finished");
            }
            match editor.read_line(&self.env)? {
                Input::Line(line) => match self.run_line(&line) {
                    Ok(Status::Exit) => break,
                    Ok(Status::Continue) => {}
                    Err(e) => eprintln!("-{}: {:#}", SHELL_NAME, e),
                },
                Input::Interrupted => continue,
                Input::Eof => break,
            }
        }
        println!();
        Ok(())
    }

    fn builtin_scope(&self, name: &str) -> Option<Scope> {
        self.find_builtin(name).map(|f| f.scope())
    }

    fn find_builtin(&self, name: &str) -> Option<&dyn CommandFactory> {
        self.builtins
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    /// Run a shell-scoped builtin in this process. Failures are reported, never fatal.
    fn run_in_shell(&mut self, stage: &Stage) -> Status {
        let args: Vec<&str> = stage.args().iter().map(String::as_str).collect();
        let Some(factory) = self.find_builtin(&stage.name) else {
            return Status::Continue;
        };
        let cmd = factory.create(&args);

        let _saved = if stage.redirects.is_empty() {
            None
        } else {
            match SavedStdio::redirect(&stage.redirects) {
                Ok(saved) => Some(saved),
                Err(e) => {
                    eprintln!("-{}: {}: {}", SHELL_NAME, stage.name, e);
                    return Status::Continue;
                }
            }
        };
        let result = cmd.execute(&mut io::stdin(), &mut io::stdout(), &mut self.env);
        if let Err(e) = result {
            eprintln!("-{}: {}: {:#}", SHELL_NAME, stage.name, e);
        }
        let _ = io::stdout().flush();
        if self.env.should_exit {
            Status::Exit
        } else {
            Status::Continue
        }
    }

    /// Fork one child per stage, wiring neighbours through anonymous pipes.
    ///
    /// When this returns, the shell holds no pipe end. On failure the children that were
    /// already started are waited for before the error is returned.
    fn spawn(&mut self, stages: &[Stage]) -> Result<Vec<Pid>, SpawnError> {
        let mut pids = Vec::with_capacity(stages.len());
        let mut upstream: Option<OwnedFd> = None;

        for (i, stage) in stages.iter().enumerate() {
            let is_last = i + 1 == stages.len();
            let (next_read, write) = if is_last {
                (None, None)
            } else {
                match pipe() {
                    Ok((r, w)) => (Some(r), Some(w)),
                    Err(e) => {
                        drop(upstream);
                        job::wait_all(&pids);
                        return Err(SpawnError::Pipe(e));
                    }
                }
            };

            match job::fork_process() {
                Ok(ForkResult::Child) => {
                    drop(next_read);
                    self.run_stage(stage, upstream, write)
                }
                Ok(ForkResult::Parent { child }) => {
                    tracing::debug!(%child, name = %stage.name, stage = i, "spawned");
                    pids.push(child);
                }
                Err(e) => {
                    drop((upstream, write, next_read));
                    job::wait_all(&pids);
                    return Err(SpawnError::Fork(e));
                }
            }

            // `upstream` and `write` now belong to the child; close our copies.
            upstream = next_read;
        }

        Ok(pids)
    }

    /// Child side of one stage: wire pipes, apply redirections, then run the builtin
    /// in-process or replace the process image.
    fn run_stage(&mut self, stage: &Stage, stdin: Option<OwnedFd>, stdout: Option<OwnedFd>) -> ! {
        if let Err(e) = job::restore_default_signals() {
            tracing::warn!("cannot reset SIGPIPE: {e}");
        }
        if let Err(e) = connect(stdin.as_ref(), STDIN_FILENO).and_then(|()| connect(stdout.as_ref(), STDOUT_FILENO)) {
            eprintln!("-{}: {}: {}", SHELL_NAME, stage.name, e);
            job::exit_child(EXEC_FAILED);
        }
        drop((stdin, stdout));

        if let Err(e) = apply_redirects(&stage.redirects) {
            eprintln!("-{}: {}: {}", SHELL_NAME, stage.name, e);
            job::exit_child(EXEC_FAILED);
        }

        if stage.is_blank() {
            job::exit_child(0);
        }

        if let Some(factory) = self.find_builtin(&stage.name) {
            let args: Vec<&str> = stage.args().iter().map(String::as_str).collect();
            let cmd = factory.create(&args);
            let code = match cmd.execute(&mut io::stdin(), &mut io::stdout(), &mut self.env) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("-{}: {}: {:#}", SHELL_NAME, stage.name, e);
                    1
                }
            };
            job::exit_child(code);
        }

        external::exec_stage(stage, &self.env)
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the default builtins: `cd`, `exit`, `history`, `chatroom`
    /// and `cut`.
    fn default() -> Self {
        Self::new(default_builtins())
    }
}

/// Make `fd` the process's descriptor `target`, if given.
fn connect(fd: Option<&OwnedFd>, target: i32) -> io::Result<()> {
    if let Some(fd) = fd {
        dup2(fd.as_raw_fd(), target)?;
    }
    Ok(())
}

/// The shell's own stdin and stdout while a builtin runs with redirections; put back on drop.
struct SavedStdio {
    stdin: OwnedFd,
    stdout: OwnedFd,
}

impl SavedStdio {
    fn redirect(redirects: &Redirects) -> io::Result<Self> {
        io::stdout().flush()?;
        let saved = Self {
            stdin: io::stdin().as_fd().try_clone_to_owned()?,
            stdout: io::stdout().as_fd().try_clone_to_owned()?,
        };
        apply_redirects(redirects)?;
        Ok(saved)
    }
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for (fd, target) in [(&self.stdin, STDIN_FILENO), (&self.stdout, STDOUT_FILENO)] {
            if let Err(e) = dup2(fd.as_raw_fd(), target) {
                tracing::warn!(fd = target, "cannot restore descriptor: {e}");
            }
        }
    }
}

/// Open the redirection targets of a stage and install them as stdin/stdout.
fn apply_redirects(redirects: &Redirects) -> io::Result<()> {
    if let Some(path) = &redirects.input {
        let file = File::open(path).map_err(|e| with_path(path, e))?;
        dup2(file.as_raw_fd(), STDIN_FILENO)?;
    }
    if let Some((path, mode)) = redirects.output() {
        let file = open_output(path, mode).map_err(|e| with_path(path, e))?;
        dup2(file.as_raw_fd(), STDOUT_FILENO)?;
    }
    Ok(())
}

/// `>` creates or truncates, `>>` creates or appends.
fn open_output(path: &str, mode: OutputMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match mode {
        OutputMode::Truncate => options.write(true).truncate(true),
        OutputMode::Append => options.append(true),
    };
    options.create(true).mode(0o644).open(path)
}

fn with_path(path: &str, e: io::Error) -> io::Error {
    io::Error::new(e.kind(), format!("{}: {}", path, e))
}
