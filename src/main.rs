use argh::FromArgs;
use shellish::{Interpreter, Status};
use tracing_subscriber::EnvFilter;

/// A small job-control shell.
#[derive(FromArgs)]
struct Args {
    /// run this line instead of reading from the terminal; may be repeated
    #[argh(option, short = 'c')]
    command: Vec<String>,

    /// print every parsed command before running it
    #[argh(switch)]
    print_commands: bool,

    /// log debugging information to stderr
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SHELLISH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    init_logging(args.verbose);

    let mut shell = Interpreter::default().with_print_commands(args.print_commands);
    if args.command.is_empty() {
        return shell.repl();
    }

    for line in &args.command {
        match shell.run_line(line) {
            Ok(Status::Exit) => break,
            Ok(Status::Continue) => {}
            Err(e) => eprintln!("-shellish: {:#}", e),
        }
    }
    Ok(())
}
