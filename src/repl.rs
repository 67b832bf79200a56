//! # Interactive Loop
//!
//! A line-oriented REPL: print `=> `, read a line, feed it to a single
//! persistent [`Vm`] so globals and functions defined on earlier lines
//! stay usable. Compile and runtime diagnostics have already been written
//! to stderr by the time `interpret` returns, so failures here just fall
//! through to the next prompt.
//!
//! Exits cleanly on end of input (Ctrl-D).

use std::io::{self, Write};

use tracing::debug;

use crate::vm::Vm;

/// Run the interactive loop until end of input.
pub fn repl(debug_mode: bool) {
    let mut vm = Vm::new(debug_mode);
    debug!("starting REPL session");

    let stdin = io::stdin();
    loop {
        print!("=> ");
        if io::stdout().flush().is_err() {
            return;
        }

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            // EOF (Ctrl-D): finish the prompt line and leave.
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {
                // Errors were already reported; keep the session alive.
                let _ = vm.interpret(&line);
            }
            Err(e) => {
                eprintln!("Error while reading line: {}", e);
                return;
            }
        }
    }
}
