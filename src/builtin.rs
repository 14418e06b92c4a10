use crate::chatroom::ChatRoom;
use crate::command::ExitCode;
use crate::env::Environment;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use nix::errno::Errno;
use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Where a builtin runs when it is the only stage of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// In the shell's own process, so it can change shell state.
    Shell,
    /// In a forked child after redirection, like an external program.
    Stage,
}

/// Object-safe form of a parsed builtin, ready to run.
pub trait ExecutableCommand {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

/// Builds a builtin from its argument vector.
pub trait CommandFactory {
    fn name(&self) -> &'static str;

    fn scope(&self) -> Scope;

    /// `args` excludes the command name.
    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand>;
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without replacing the process image.
pub trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cut" or "cd".
    fn name() -> &'static str;

    fn scope() -> Scope {
        Scope::Shell
    }

    /// Rewrites the raw arguments before `argh` sees them.
    fn normalize(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    /// Executes the command using provided IO streams and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        T::execute(*self, stdin, stdout, env)
    }
}

/// Result of `--help` or of arguments `argh` could not parse.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.output)?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

/// Factory for the builtin `T`.
pub struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn scope(&self) -> Scope {
        T::scope()
    }

    fn create(&self, args: &[&str]) -> Box<dyn ExecutableCommand> {
        let args = T::normalize(args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        }
    }
}

/// The builtins every interpreter starts with.
pub fn default_builtins() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<HistoryCmd>::default()),
        Box::new(Factory::<Chatroom>::default()),
        Box::new(Factory::<Cut>::default()),
    ]
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl Cd {
    /// Directory to switch to, relative paths taken from the shell's current directory.
    fn destination(&self, env: &Environment) -> Result<PathBuf> {
        let target = match self.target.as_deref() {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => PathBuf::from(env.get_var("HOME").context("HOME not set")?),
        };
        Ok(env.current_dir.join(target))
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        let dir = self.destination(env)?;
        if let Err(e) = env::set_current_dir(&dir) {
            match e.raw_os_error() {
                Some(code) => bail!("{}", Errno::from_raw(code).desc()),
                None => bail!(e),
            }
        }
        tracing::debug!(dir = %dir.display(), "changed directory");
        env.current_dir = fs::canonicalize(&dir).unwrap_or(dir);
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List the lines entered in this session, numbered from 1.
pub struct HistoryCmd {}

impl BuiltinCommand for HistoryCmd {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        write!(stdout, "{}", env.history)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Join a chat room and talk to everybody else in it. Type `exit` to leave.
pub struct Chatroom {
    #[argh(positional, greedy)]
    /// room name followed by your name in the room.
    pub args: Vec<String>,
}

impl BuiltinCommand for Chatroom {
    fn name() -> &'static str {
        "chatroom"
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        let [room, user, ..] = self.args.as_slice() else {
            writeln!(stdout, "Usage: chatroom <roomname> <username>")?;
            return Ok(1);
        };
        let chat = ChatRoom::join(&env::temp_dir(), room, user)
            .with_context(|| format!("cannot join {room}"))?;
        chat.run(&mut BufReader::new(stdin), stdout)?;
        Ok(0)
    }
}

/// Comma-separated, 1-based field numbers, e.g. `1,3,6`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList(pub Vec<usize>);

impl FromStr for FieldList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|f| !f.is_empty())
            .map(|f| match f.trim().parse::<usize>() {
                Ok(0) => Err("fields are numbered from 1".to_string()),
                Ok(n) => Ok(n),
                Err(_) => Err(format!("invalid field value {f:?}")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldList)
    }
}

#[derive(FromArgs)]
/// Print selected fields of each input line.
pub struct Cut {
    #[argh(option, short = 'd', default = "String::from(\"\\t\")")]
    /// field delimiter; only its first character is used. Defaults to TAB.
    pub delimiter: String,

    #[argh(option, short = 'f', default = "FieldList::default()")]
    /// comma-separated list of 1-based fields to print.
    pub fields: FieldList,

    #[argh(positional, greedy)]
    /// files to read. If none provided, reads from stdin.
    pub files: Vec<String>,
}

impl Cut {
    fn delimiter_char(&self) -> char {
        self.delimiter.chars().next().unwrap_or('\t')
    }

    /// Select the configured fields of one line (without its line terminator).
    ///
    /// Runs of the delimiter count as one separator. A requested field that the line does not
    /// have prints nothing, but the delimiter after it (when it is not the last requested) is
    /// still written.
    pub fn select(&self, line: &str) -> String {
        let delimiter = self.delimiter_char();
        let tokens: Vec<&str> = line.split(delimiter).filter(|t| !t.is_empty()).collect();
        let mut out = String::new();
        let last = self.fields.0.len().saturating_sub(1);
        for (j, &field) in self.fields.0.iter().enumerate() {
            if let Some(token) = tokens.get(field - 1) {
                out.push_str(token);
                if j < last {
                    out.push(delimiter);
                }
            }
        }
        out
    }

    fn process_source(&self, reader: &mut dyn Read, stdout: &mut dyn Write) -> Result<()> {
        let reader = BufReader::new(reader);
        for line in reader.split(b'\n') {
            let line = line?;
            let line = String::from_utf8_lossy(&line);
            writeln!(stdout, "{}", self.select(line.trim_end_matches('\r')))?;
        }
        Ok(())
    }
}

impl BuiltinCommand for Cut {
    fn name() -> &'static str {
        "cut"
    }

    fn scope() -> Scope {
        Scope::Stage
    }

    /// Splits fused `-f1,3` / `-d:` and turns a quoted-space delimiter into `" "`.
    ///
    /// The line parser splits `-d " "` into two lone quote tokens; both are consumed here.
    fn normalize(args: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() + 2);
        let mut i = 0;
        while i < args.len() {
            let arg = args[i];
            match arg {
                "-d" | "--delimiter" => {
                    out.push("-d".to_string());
                    match args.get(i + 1) {
                        Some(&value) if value.starts_with(['"', '\'']) => {
                            out.push(" ".to_string());
                            i += 1;
                            if args.get(i + 1) == Some(&value) {
                                i += 1;
                            }
                        }
                        Some(&value) => {
                            out.push(value.to_string());
                            i += 1;
                        }
                        None => {}
                    }
                }
                "-f" | "--fields" => out.push("-f".to_string()),
                _ if arg.len() > 2 && arg.starts_with("-d") => {
                    let value = &arg[2..];
                    out.push("-d".to_string());
                    if value.starts_with(['"', '\'']) {
                        out.push(" ".to_string());
                        if args.get(i + 1) == Some(&value) {
                            i += 1;
                        }
                    } else {
                        out.push(value.to_string());
                    }
                }
                _ if arg.len() > 2 && arg.starts_with("-f") => {
                    out.push("-f".to_string());
                    out.push(arg[2..].to_string());
                }
                _ => out.push(arg.to_string()),
            }
            i += 1;
        }
        out
    }

    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.files.is_empty() {
            self.process_source(stdin, stdout)?;
            return Ok(0);
        }
        let mut exit_code = 0;
        for name in &self.files {
            match fs::File::open(name) {
                Ok(mut f) => self.process_source(&mut f, stdout)?,
                Err(e) => {
                    eprintln!("cut: {}: {}", name, e);
                    exit_code = 1;
                }
            }
        }
        Ok(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::io::Cursor;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use tempfile::TempDir;

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn test_env() -> Environment {
        Environment {
            vars: HashMap::new(),
            current_dir: stdenv::current_dir().unwrap(),
            should_exit: false,
            history: History::new(),
        }
    }

    fn run<T: BuiltinCommand + 'static>(args: &[&str], input: &str, env: &mut Environment) -> (ExitCode, String) {
        let cmd = Factory::<T>::default().create(args);
        let mut out = Vec::new();
        let code = cmd
            .execute(&mut Cursor::new(input.as_bytes().to_vec()), &mut out, env)
            .expect("builtin failed");
        (code, String::from_utf8(out).unwrap())
    }

    fn cut(args: &[&str], input: &str) -> String {
        run::<Cut>(args, input, &mut test_env()).1
    }

    #[test]
    fn test_cut_default_tab_delimiter() {
        assert_eq!(cut(&["-f2"], "a\tb\tc\n"), "b\n");
    }

    #[test]
    fn test_cut_separate_and_fused_forms_agree() {
        let input = "root:x:0:0:root:/root:/bin/bash\nbin:x:1:1:bin:/bin:/sbin/nologin\n";
        let expected = "root:0:/root\nbin:1:/bin\n";
        assert_eq!(cut(&["-d", ":", "-f", "1,3,6"], input), expected);
        assert_eq!(cut(&["-d:", "-f1,3,6"], input), expected);
        assert_eq!(cut(&["--delimiter", ":", "--fields", "1,3,6"], input), expected);
    }

    #[test]
    fn test_cut_quoted_space_delimiter() {
        // `-d " "` reaches the builtin as two lone quote tokens.
        assert_eq!(cut(&["-d", "\"", "\"", "-f", "2"], "one two three\n"), "two\n");
        assert_eq!(cut(&["-d", "'", "'", "-f1"], "one two\n"), "one\n");
        assert_eq!(cut(&["-d'", "'", "-f2"], "one two\n"), "two\n");
    }

    #[test]
    fn test_cut_missing_field_keeps_delimiter_placement() {
        assert_eq!(cut(&["-d", ",", "-f", "1,5,2"], "a,b\n"), "a,b\n");
        assert_eq!(cut(&["-d", ",", "-f", "1,5"], "a,b\n"), "a,\n");
        assert_eq!(cut(&["-d", ",", "-f", "4"], "a,b\n"), "\n");
    }

    #[test]
    fn test_cut_collapses_repeated_delimiters() {
        assert_eq!(cut(&["-d", ":", "-f", "2"], "a::b\n"), "b\n");
    }

    #[test]
    fn test_cut_one_output_line_per_input_line() {
        assert_eq!(cut(&["-d", " ", "-f", "1"], "x y\n\nz w"), "x\n\nz\n");
    }

    #[test]
    fn test_cut_without_fields_prints_empty_lines() {
        assert_eq!(cut(&[], "a\tb\nc\n"), "\n\n");
    }

    #[test]
    fn test_cut_rejects_field_zero() {
        let (code, out) = run::<Cut>(&["-f", "0"], "", &mut test_env());
        assert_eq!(code, 1);
        assert!(out.contains("numbered from 1"), "{out}");
    }

    #[test]
    fn test_cut_reads_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, "1 2 3\n4 5 6\n").unwrap();
        let path = path.to_string_lossy().into_owned();
        assert_eq!(cut(&["-d", " ", "-f3", &path], ""), "3\n6\n");
    }

    #[test]
    fn test_field_list_parse() {
        assert_eq!("1,3,6".parse::<FieldList>(), Ok(FieldList(vec![1, 3, 6])));
        assert!("a".parse::<FieldList>().is_err());
    }

    #[test]
    fn test_history_lists_entries() {
        let mut env = test_env();
        env.history.record("echo a");
        env.history.record("history");
        let (code, out) = run::<HistoryCmd>(&[], "", &mut env);
        assert_eq!(code, 0);
        assert_eq!(out, "1 echo a\n2 history\n");
    }

    #[test]
    fn test_exit_sets_flag() {
        let mut env = test_env();
        let (code, _) = run::<Exit>(&["3"], "", &mut env);
        assert_eq!(code, 0);
        assert!(env.should_exit);
    }

    #[test]
    fn test_chatroom_usage_without_arguments() {
        let mut env = test_env();
        for args in [&[][..], &["lobby"][..]] {
            let (code, out) = run::<Chatroom>(args, "", &mut env);
            assert_eq!(code, 1);
            assert_eq!(out, "Usage: chatroom <roomname> <username>\n");
        }
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = TempDir::new().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        let target = Some(canonical_temp.to_string_lossy().to_string());
        let res = Cd { target }.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);

        let new_cwd = fs::canonicalize(stdenv::current_dir().unwrap()).unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert!(res.is_ok());
        assert_eq!(new_cwd, canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = TempDir::new().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let mut env = test_env();
        env.set_var("HOME", canonical_temp.to_string_lossy().to_string());
        let res = Cd { target: None }.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);

        let new_cwd = fs::canonicalize(stdenv::current_dir().unwrap()).unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert!(res.is_ok());
        assert_eq!(new_cwd, canonical_temp);
        assert_eq!(env.current_dir, canonical_temp);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut env = test_env();

        let target = Some(format!("nonexistent_dir_for_cd_test_{}", std::process::id()));
        let res = Cd { target }.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env);

        assert_eq!(format!("{:#}", res.unwrap_err()), "No such file or directory");
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_factories_report_scope() {
        let builtins = default_builtins();
        let scope_of = |name: &str| builtins.iter().find(|f| f.name() == name).map(|f| f.scope());
        assert_eq!(scope_of("cd"), Some(Scope::Shell));
        assert_eq!(scope_of("history"), Some(Scope::Shell));
        assert_eq!(scope_of("cut"), Some(Scope::Stage));
        assert_eq!(scope_of("ls"), None);
    }
}
