//! # Error Handling for the Lox Runtime
//!
//! This module defines the error values shared by the compiler front half
//! and the bytecode virtual machine.
//!
//! ## Design
//! - [`RuntimeError`] is an enumeration of the faults the VM can hit while
//!   executing a chunk: bad operand types, undefined globals, arity
//!   mismatches, uncallable callees, frame exhaustion, and internal
//!   invariant violations.
//! - [`InterpretError`] is the discriminator handed back to embedders by
//!   `Vm::interpret`. A failed compile carries no payload (diagnostics were
//!   already written to stderr by the parser); a runtime fault wraps the
//!   `RuntimeError` that stopped the dispatch loop.
//!
//! ## Display
//! - `RuntimeError` renders the exact user-facing message, with no category
//!   prefix; the VM follows it with a frame backtrace.
//! - Both types implement [`std::error::Error`] so they compose with the
//!   standard error-handling ecosystem.

use std::fmt;

/// Faults raised while the VM executes bytecode.
#[derive(Debug, PartialEq)]
pub enum RuntimeError {
    /// An operand had the wrong type for the instruction. Carries the full
    /// message, e.g. "Operand must be a number.".
    TypeError(String),
    /// A global was read or assigned before being defined.
    UndefinedVariable(String),
    /// A call supplied the wrong number of arguments.
    ArityMismatch { expected: usize, got: usize },
    /// The callee was not a function or native.
    NotCallable,
    /// The frame stack or operand stack ran out of slots.
    StackOverflow,
    /// Internal VM invariant violation (represents a bug, not user error).
    VmInvariant(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeError(msg) => {
                write!(f, "{}", msg)
            }
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            RuntimeError::NotCallable => {
                write!(f, "Can only call functions and classes.")
            }
            RuntimeError::StackOverflow => {
                write!(f, "Stack overflow.")
            }
            RuntimeError::VmInvariant(msg) => {
                write!(f, "VM invariant violated: {}", msg)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome discriminator for a full compile-and-execute pass.
///
/// Embedders map `Compile` and `Runtime` onto their own failure channels
/// (the CLI wrapper uses exit codes 65 and 70 respectively).
#[derive(Debug, PartialEq)]
pub enum InterpretError {
    /// The source did not compile; diagnostics already went to stderr.
    Compile,
    /// Execution stopped on a runtime fault.
    Runtime(RuntimeError),
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile => write!(f, "compile error"),
            InterpretError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for InterpretError {}
