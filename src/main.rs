//! Lox runtime entry point.
//!
//! This binary can do three things:
//! 1) Run a Lox source file.
//! 2) Run an inline program passed on the command line (`-l`).
//! 3) With no positional argument, start an interactive REPL.
//!
//! Behavior summary:
//! - `-d/--debug` turns on chunk disassembly after compilation and a
//!   per-instruction stack trace during execution (both on stderr).
//! - Exit codes: `0` on success, `64` on command-line misuse, `65` on a
//!   compile error, `70` on a runtime error, `1` for a missing file.

use std::fs;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::debug;

use lox_runtime::error::InterpretError;
use lox_runtime::repl::repl;
use lox_runtime::vm::Vm;

/// Command-line misuse (bad flags, too many arguments).
const EX_USAGE: i32 = 64;
/// The program did not compile.
const EX_DATAERR: i32 = 65;
/// The program compiled but faulted at runtime.
const EX_SOFTWARE: i32 = 70;

#[derive(Parser)]
#[command(name = "lox", version, about = "Lox bytecode compiler and virtual machine")]
struct Cli {
    /// Print chunk disassembly and a per-instruction stack trace
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Treat the positional argument as an inline program, not a path
    #[arg(short = 'l', long = "inline")]
    inline: bool,

    /// Script to run; starts a REPL when omitted
    program: Option<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                process::exit(EX_USAGE);
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Some(program) = cli.program else {
        repl(cli.debug);
        return;
    };

    let source = if cli.inline {
        program
    } else {
        match fs::read_to_string(&program) {
            Ok(source) => {
                debug!(path = %program, bytes = source.len(), "loaded script");
                source
            }
            Err(_) => {
                eprintln!("No such file!");
                process::exit(1);
            }
        }
    };

    let mut vm = Vm::new(cli.debug);
    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile) => process::exit(EX_DATAERR),
        Err(InterpretError::Runtime(_)) => process::exit(EX_SOFTWARE),
    }
}
