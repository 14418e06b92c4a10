use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn shellish(dir: &Path, lines: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shellish"));
    cmd.current_dir(dir);
    for line in lines {
        cmd.arg("-c").arg(line);
    }
    cmd.output().expect("failed to run shellish")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_cd_changes_directory_for_later_lines() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let out = shellish(dir.path(), &["cd sub", "pwd"]);
    let expected = dir.path().join("sub").canonicalize().unwrap();
    assert_eq!(stdout(&out).trim_end(), expected.display().to_string());
}

#[test]
fn test_cd_to_missing_directory_reports_and_continues() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["cd nowhere", "echo ok"]);
    assert!(out.status.success());
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(
        err.contains("-shellish: cd: No such file or directory\n"),
        "stderr was: {err}"
    );
    assert_eq!(stdout(&out), "ok\n");
}

#[test]
fn test_cd_inside_pipeline_does_not_affect_shell() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let out = shellish(dir.path(), &["cd sub | true", "pwd"]);
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(stdout(&out).trim_end(), expected.display().to_string());
}

#[test]
fn test_history_lists_every_line() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["echo a", "", "history"]);
    assert_eq!(stdout(&out), "a\n1 echo a\n2 history\n");
}

#[test]
fn test_exit_stops_processing() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["echo before", "exit", "echo after"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "before\n");
}

#[test]
fn test_cut_reads_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("data.csv"), "a,b,c\nd,e,f\n").unwrap();
    let out = shellish(dir.path(), &["cut -d, -f1,3 data.csv"]);
    assert_eq!(stdout(&out), "a,c\nd,f\n");
}

#[test]
fn test_cut_with_quoted_space_delimiter() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["echo x y z | cut -d \" \" -f 2"]);
    assert_eq!(stdout(&out), "y\n");
}

#[test]
fn test_history_output_redirect() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["echo a", "history > h.txt", "echo after"]);
    assert_eq!(stdout(&out), "a\nafter\n");
    assert_eq!(
        fs::read_to_string(dir.path().join("h.txt")).unwrap(),
        "1 echo a\n2 history > h.txt\n"
    );
}

#[test]
fn test_history_append_redirect() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("h.txt"), "earlier\n").unwrap();
    shellish(dir.path(), &["history >>h.txt"]);
    assert_eq!(
        fs::read_to_string(dir.path().join("h.txt")).unwrap(),
        "earlier\n1 history >>h.txt\n"
    );
}

#[test]
fn test_builtin_redirect_to_unwritable_path() {
    let dir = TempDir::new().unwrap();
    let out = shellish(dir.path(), &["history > missing/h.txt", "echo ok"]);
    let err = String::from_utf8_lossy(&out.stderr);
    assert!(err.contains("-shellish: history: missing/h.txt: "), "stderr was: {err}");
    assert_eq!(stdout(&out), "ok\n");
}
