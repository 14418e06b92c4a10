//! A small job-control shell.
//!
//! Lines are parsed into a [`command::Pipeline`] of stages, each stage is forked into its own
//! process, neighbouring stages are connected with anonymous pipes and every stage may redirect
//! its input and output to files. Programs are looked up along `PATH`. A handful of commands
//! are built in: `cd`, `exit`, `history`, `cut` and `chatroom`, a named-pipe chat between users
//! of the same machine.
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`] and [`env`] expose
//! the parsed representation and the state carried between lines.

pub mod builtin;
pub mod chatroom;
pub mod command;
mod editor;
pub mod env;
pub mod external;
mod history;
mod interpreter;
mod job;
pub mod parser;

pub use command::Status;
pub use history::History;
pub use interpreter::{Interpreter, SpawnError};
