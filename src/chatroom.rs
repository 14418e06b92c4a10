//! Multi-party chat over named pipes.
//!
//! A room is a directory `<root>/chatroom-<room>` holding one FIFO per participant. Every
//! participant runs one long-lived reader process on its own FIFO and broadcasts by forking one
//! short-lived writer per peer, since opening a FIFO for writing blocks until a reader shows up.
//! Delivery is best-effort and independent per peer.

use crate::command::SHELL_NAME;
use crate::job;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Pid, mkfifo};
use std::convert::Infallible;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, BufRead, Read, Write};
use std::os::unix::fs::{DirBuilderExt, FileTypeExt};
use std::path::{Path, PathBuf};

/// One participant's membership in a room.
#[derive(Debug, Clone)]
pub struct ChatRoom {
    room: String,
    user: String,
    dir: PathBuf,
}

impl ChatRoom {
    /// Join `room` as `user`, creating the room directory and the user's FIFO under `root`
    /// if they do not exist yet. Joining twice is the same as joining once.
    pub fn join(root: &Path, room: &str, user: &str) -> io::Result<Self> {
        validate_name("room", room)?;
        validate_name("user", user)?;

        let dir = root.join(format!("chatroom-{room}"));
        match DirBuilder::new().mode(0o777).create(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let this = Self {
            room: room.to_string(),
            user: user.to_string(),
            dir,
        };
        match mkfifo(&this.channel(), Mode::from_bits_truncate(0o666)) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(room, user, dir = %this.dir.display(), "joined chat room");
        Ok(this)
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// This participant's own FIFO.
    pub fn channel(&self) -> PathBuf {
        self.dir.join(&self.user)
    }

    /// `<user>: <text>`
    pub fn frame(&self, text: &str) -> String {
        format!("{}: {}", self.user, text)
    }

    pub fn prompt(&self) -> String {
        format!("[{}] {} > ", self.room, self.user)
    }

    /// FIFOs of everybody else currently in the room, sorted by name.
    pub fn peers(&self) -> io::Result<Vec<PathBuf>> {
        let mut peers = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name() == self.user.as_str() {
                continue;
            }
            if entry.file_type()?.is_fifo() {
                peers.push(entry.path());
            }
        }
        peers.sort();
        Ok(peers)
    }

    /// Send `text` to every peer. Returns the number of writer processes started.
    pub fn broadcast(&self, text: &str) -> Result<usize> {
        let message = format!("{}\n", self.frame(text));
        let peers = self.peers().context("failed to list room members")?;
        for peer in &peers {
            match job::fork_process().context("failed to start message writer")? {
                ForkResult::Parent { child } => {
                    tracing::trace!(%child, peer = %peer.display(), "fan-out writer started");
                }
                ForkResult::Child => {
                    let code = match deliver(peer, &message) {
                        Ok(()) => 0,
                        Err(_) => 1,
                    };
                    job::exit_child(code);
                }
            }
        }
        Ok(peers.len())
    }

    /// Run the interactive session: start the reader, broadcast every console line until
    /// `exit` or end of input, then stop the reader.
    pub fn run(&self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "Welcome to {}!", self.room)?;
        let reader = self.spawn_reader().context("failed to start chat reader")?;
        let result = self.write_loop(input, out);
        job::terminate(reader).context("failed to stop chat reader")?;
        tracing::debug!(room = %self.room, user = %self.user, "left chat room");
        result
    }

    fn write_loop(&self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<()> {
        let mut line = String::new();
        loop {
            write!(out, "{}", self.prompt())?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            let text = line.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }
            if text == "exit" {
                break;
            }

            let writers = self.broadcast(text)?;
            tracing::debug!(writers, "message broadcast");
            for status in job::reap_finished() {
                tracing::trace!(?status, "reaped");
            }
        }
        Ok(())
    }

    fn spawn_reader(&self) -> nix::Result<Pid> {
        match job::fork_process()? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => {
                let Err(e) = read_loop(&self.channel(), &self.room, &self.prompt());
                eprintln!("-{}: chatroom: {}", SHELL_NAME, e);
                job::exit_child(1)
            }
        }
    }
}

fn validate_name(what: &str, name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {what} name: {name:?}"),
        ));
    }
    Ok(())
}

fn deliver(peer: &Path, message: &str) -> io::Result<()> {
    let mut fifo = OpenOptions::new().write(true).open(peer)?;
    fifo.write_all(message.as_bytes())
}

/// Messages carried by one read from a channel.
///
/// A read is complete on its own: its last message needs no terminating newline. Several
/// newline-terminated messages that arrived together are split apart.
fn messages(chunk: &[u8]) -> Vec<String> {
    chunk
        .split(|&b| b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
        .filter(|message| !message.is_empty())
        .collect()
}

/// Print every message arriving on `channel` above the prompt, forever.
fn read_loop(channel: &Path, room: &str, prompt: &str) -> io::Result<Infallible> {
    // Holding a write end as well keeps reads blocking instead of returning end-of-file
    // whenever the last writer goes away.
    let mut fifo = OpenOptions::new().read(true).write(true).open(channel)?;
    let mut stdout = io::stdout();
    let mut buf = [0u8; 1024];
    loop {
        let n = match fifo.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for message in messages(&buf[..n]) {
            write!(stdout, "\r\x1b[K[{room}] {message}\n{prompt}")?;
        }
        stdout.flush()?;
    }
}
