//! # Stack-Based Bytecode Virtual Machine
//!
//! This module executes the chunks produced by the compiler on a compact
//! stack machine.
//!
//! ## High-level model
//! - **Operand stack (`stack`)**: holds `Value`s consumed/produced by ops;
//!   capped at [`STACK_MAX`] slots.
//! - **Call frames (`frames`)**: one per active call, each carrying the
//!   function being run, its instruction pointer, and `slots`, the stack
//!   index of the frame's base. The called function value sits at the base
//!   slot, its arguments right above, so frame locals are plain stack
//!   indexing. Capped at [`FRAMES_MAX`].
//! - **Globals (`globals`)**: a string-keyed [`Table`] that outlives
//!   individual interpret calls, populated by native registration and by
//!   `DefineGlobal` at runtime.
//!
//! The machine is deterministic and fails fast: any faulting instruction
//! returns a [`RuntimeError`], which stops the dispatch loop, prints the
//! message and a frame backtrace to stderr, and resets the machine.
//!
//! Jump operands are 16-bit big-endian distances read with `read_short`.
//! `JumpIfFalse` peeks at the condition rather than popping it; explicit
//! `Pop`s around the branches are the compiler's job.

use std::rc::Rc;

use tracing::debug;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::{InterpretError, RuntimeError};
use crate::object::{NativeFn, Obj, ObjFunction, ObjNative, ObjString};
use crate::table::Table;
use crate::value::Value;

mod natives;

/// Operand stack capacity.
pub const STACK_MAX: usize = 256;
/// Call depth limit.
pub const FRAMES_MAX: usize = 64;

/// One activation record: the running function, its instruction pointer
/// (an index into the function's chunk), and the stack slot of its base.
struct CallFrame {
    function: Rc<ObjFunction>,
    ip: usize,
    slots: usize,
}

/// The virtual machine. One per interpretation session; globals persist
/// across `interpret` calls so a REPL can build on earlier lines.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    debug: bool,
}

impl Vm {
    /// Create a machine with the standard natives already registered.
    pub fn new(debug: bool) -> Self {
        let mut vm = Vm {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            debug,
        };
        natives::install(&mut vm);
        vm
    }

    /// Register a host function under `name`. `arity` of `None` accepts
    /// any argument count.
    pub fn define_native(&mut self, name: &str, arity: Option<u8>, function: NativeFn) {
        let key = Rc::new(ObjString::from_str(name));
        let native = ObjNative {
            name: name.to_string(),
            arity,
            function,
        };
        self.globals
            .set(key, Value::Obj(Obj::Native(Rc::new(native))));
        debug!(name, "registered native function");
    }

    /// Compile and run a source string.
    ///
    /// The compiled top-level function is pushed onto the stack and entered
    /// as frame 0; execution proceeds until its `Return` or a fault.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let Some(function) = compiler::compile(source, self.debug) else {
            return Err(InterpretError::Compile);
        };

        self.stack.clear();
        self.frames.clear();
        self.stack.push(Value::Obj(Obj::Fun(Rc::clone(&function))));
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots: 0,
        });

        match self.run() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.report_runtime_error(&e);
                Err(InterpretError::Runtime(e))
            }
        }
    }

    //
    // --- Fetch-decode-execute loop ------------------------------------------
    //

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.debug {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = OpCode::try_from(byte)
                .map_err(|_| RuntimeError::VmInvariant(format!("unknown opcode {}", byte)))?;

            match op {
                // ----- Literals and constants -----
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop()?;
                }
                // ----- Variables -----
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    let value = self.stack[base + slot].clone();
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    // Assignment is an expression; the value stays on top.
                    let value = self.peek(0)?.clone();
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string()?;
                    let Some(value) = self.globals.get(&name) else {
                        return Err(RuntimeError::UndefinedVariable(name.to_string()));
                    };
                    let value = value.clone();
                    self.push(value)?;
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0)?.clone();
                    self.globals.set(name, value);
                    self.pop()?;
                }
                OpCode::SetGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0)?.clone();
                    if self.globals.set(Rc::clone(&name), value) {
                        // Assignment must not create globals; undo and fault.
                        self.globals.delete(&name);
                        return Err(RuntimeError::UndefinedVariable(name.to_string()));
                    }
                }
                // ----- Comparison and arithmetic -----
                OpCode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_arith(|a, b| a - b)?,
                OpCode::Multiply => self.binary_arith(|a, b| a * b)?,
                OpCode::Divide => self.binary_arith(|a, b| a / b)?,
                OpCode::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsy()))?;
                }
                OpCode::Negate => {
                    let value = self.pop()?;
                    match value {
                        Value::Number(n) => self.push(Value::Number(-n))?,
                        _ => {
                            return Err(RuntimeError::TypeError(
                                "Operand must be a number.".to_string(),
                            ))
                        }
                    }
                }
                // ----- Output -----
                OpCode::Print => {
                    let value = self.pop()?;
                    println!("#> {}", value);
                }
                // ----- Control flow -----
                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0)?.is_falsy() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip -= offset;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count)?.clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    let frame = match self.frames.pop() {
                        Some(frame) => frame,
                        None => {
                            return Err(RuntimeError::VmInvariant(
                                "return with no active frame".to_string(),
                            ))
                        }
                    };

                    if self.frames.is_empty() {
                        // Pop the script function itself; the stack is now
                        // back to empty.
                        self.pop()?;
                        return Ok(());
                    }

                    // Discard the callee, its arguments, and its locals,
                    // then leave the result for the caller.
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
            }
        }
    }

    //
    // --- Decoding helpers ---------------------------------------------------
    //

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    /// Fetch a 16-bit big-endian operand and advance past it.
    fn read_short(&mut self) -> u16 {
        let frame = self.frame_mut();
        let hi = frame.function.chunk.code[frame.ip];
        let lo = frame.function.chunk.code[frame.ip + 1];
        frame.ip += 2;
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frame();
        frame.function.chunk.constants[index].clone()
    }

    /// Read a constant that the compiler guarantees to be a string (the
    /// operand of the global-variable instructions).
    fn read_string(&mut self) -> Result<Rc<ObjString>, RuntimeError> {
        match self.read_constant() {
            Value::Obj(Obj::Str(s)) => Ok(s),
            _ => Err(RuntimeError::VmInvariant(
                "name constant is not a string".to_string(),
            )),
        }
    }

    //
    // --- Stack primitives ---------------------------------------------------
    //

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() == STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::VmInvariant("stack underflow".to_string()))
    }

    fn peek(&self, distance: usize) -> Result<&Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(1 + distance)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| RuntimeError::VmInvariant("stack underflow".to_string()))
    }

    //
    // --- Operators ----------------------------------------------------------
    //

    fn binary_arith(&mut self, op: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => self.push(Value::Number(op(a, b))),
            _ => Err(RuntimeError::TypeError(
                "Operands must be numbers.".to_string(),
            )),
        }
    }

    fn binary_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => self.push(Value::Bool(op(a, b))),
            _ => Err(RuntimeError::TypeError(
                "Operands must be numbers.".to_string(),
            )),
        }
    }

    /// `Add` is the one overloaded operator: numbers add, strings
    /// concatenate byte-wise.
    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => self.push(Value::Number(a + b)),
            (Value::Obj(Obj::Str(a)), Value::Obj(Obj::Str(b))) => {
                let mut chars = Vec::with_capacity(a.chars.len() + b.chars.len());
                chars.extend_from_slice(&a.chars);
                chars.extend_from_slice(&b.chars);
                self.push(Value::Obj(Obj::Str(Rc::new(ObjString::new(chars)))))
            }
            _ => Err(RuntimeError::TypeError(
                "Operands must be numbers or strings.".to_string(),
            )),
        }
    }

    //
    // --- Calls --------------------------------------------------------------
    //

    /// Dispatch a call on `callee` with `arg_count` arguments already on
    /// the stack above it.
    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        match callee {
            Value::Obj(Obj::Fun(function)) => self.call(function, arg_count),
            Value::Obj(Obj::Native(native)) => {
                if let Some(arity) = native.arity {
                    if arg_count != arity as usize {
                        return Err(RuntimeError::ArityMismatch {
                            expected: arity as usize,
                            got: arg_count,
                        });
                    }
                }
                let first_arg = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[first_arg..].to_vec();
                let result = (native.function)(&args);
                // Drop the arguments and the callee, then the result.
                self.stack.truncate(first_arg - 1);
                self.push(result)
            }
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call(&mut self, function: Rc<ObjFunction>, arg_count: usize) -> Result<(), RuntimeError> {
        if arg_count != function.arity as usize {
            return Err(RuntimeError::ArityMismatch {
                expected: function.arity as usize,
                got: arg_count,
            });
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }

        // The base slot aliases the function value; arguments land in the
        // parameter slots right above it.
        let slots = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots,
        });
        Ok(())
    }

    //
    // --- Diagnostics --------------------------------------------------------
    //

    /// Print the fault and a backtrace, innermost frame first, then reset
    /// the machine so the embedder can keep using it.
    fn report_runtime_error(&mut self, error: &RuntimeError) {
        eprintln!("{}", error);

        for frame in self.frames.iter().rev() {
            let line = frame.function.chunk.lines[frame.ip.saturating_sub(1)];
            if frame.function.name.chars.is_empty() {
                eprintln!("[line {}] in script", line);
            } else {
                eprintln!("[line {}] in {}()", line, frame.function.name);
            }
        }

        self.stack.clear();
        self.frames.clear();
    }

    /// With `--debug`: dump the operand stack, then disassemble the
    /// instruction about to execute.
    fn trace_instruction(&self) {
        if self.frames.is_empty() {
            return;
        }

        eprint!("          [ ");
        for (index, value) in self.stack.iter().enumerate() {
            if index > 0 {
                eprint!(", ");
            }
            eprint!("{}: {}", index, value);
        }
        eprintln!(" ]");

        let frame = self.frame();
        frame.function.chunk.disassemble_instruction(frame.ip);
    }
}

#[cfg(test)]
mod tests;
