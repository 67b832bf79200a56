//! # Single-Pass Compiler (Pratt Parser + Code Generator)
//!
//! This module lowers source text straight to bytecode in one pass: the
//! parser pulls tokens from the [`Scanner`] on demand and emits into the
//! chunk of the function currently being built. There is no AST.
//!
//! ## High-level model
//! - **Pratt table (`RULES`)**: for each token kind, an optional prefix
//!   rule, an optional infix rule, and a binding precedence. The table is
//!   process-wide read-only data, initialized once.
//! - **Function states (`states`)**: a stack of per-function compiler
//!   states sharing the single parser cursor. `fun` declarations push a
//!   fresh state, compile the body into its own chunk, then pop and load
//!   the finished function as a constant in the enclosing chunk.
//! - **Locals**: an ordered array per function plus the current scope
//!   depth. Slot 0 is reserved so local indices line up with the VM frame,
//!   where the called function itself occupies the base slot. Depth `-1`
//!   marks a local that is declared but not yet initialized.
//! - **Globals**: declarations at depth 0 compile to name constants and
//!   `DefineGlobal`/`GetGlobal`/`SetGlobal` instructions instead.
//!
//! ## Error recovery
//! The first diagnostic sets `panic_mode`; further diagnostics are
//! suppressed until the parser resynchronizes at a statement boundary.
//! Compilation always runs to the end of input for better diagnostics, but
//! any recorded error discards the result.

use std::rc::Rc;

use once_cell::sync::Lazy;

use crate::chunk::{Chunk, OpCode};
use crate::object::{Obj, ObjFunction, ObjString};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

/// Locals per function, including the reserved base slot.
const MAX_LOCALS: usize = 256;
/// Constants per chunk; the pool is indexed by one operand byte.
const MAX_CONSTANTS: usize = 255;
/// Largest encodable jump distance.
const MAX_JUMP: usize = u16::MAX as usize;
/// Arguments (and parameters) per call.
const MAX_ARGS: u8 = 255;

/// Binding powers, weakest first. `parse_precedence(p)` consumes every
/// infix operator binding at least as tightly as `p`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = for<'src> fn(&mut Compiler<'src>, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const NO_RULE: ParseRule = ParseRule {
    prefix: None,
    infix: None,
    precedence: Precedence::None,
};

const RULE_COUNT: usize = TokenKind::Eof as usize + 1;

/// The Pratt table. Token kinds missing from this list parse as neither
/// prefix nor infix and carry no binding power.
static RULES: Lazy<[ParseRule; RULE_COUNT]> = Lazy::new(|| {
    let mut rules = [NO_RULE; RULE_COUNT];
    let mut set = |kind: TokenKind, rule: ParseRule| rules[kind as usize] = rule;

    set(
        TokenKind::LeftParen,
        ParseRule {
            prefix: Some(grouping),
            infix: Some(call),
            precedence: Precedence::Call,
        },
    );
    set(
        TokenKind::Minus,
        ParseRule {
            prefix: Some(unary),
            infix: Some(binary),
            precedence: Precedence::Term,
        },
    );
    set(
        TokenKind::Plus,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Term,
        },
    );
    set(
        TokenKind::Slash,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Factor,
        },
    );
    set(
        TokenKind::Star,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Factor,
        },
    );
    set(
        TokenKind::Bang,
        ParseRule {
            prefix: Some(unary),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::BangEqual,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Equality,
        },
    );
    set(
        TokenKind::EqualEqual,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Equality,
        },
    );
    set(
        TokenKind::Greater,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Comparison,
        },
    );
    set(
        TokenKind::GreaterEqual,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Comparison,
        },
    );
    set(
        TokenKind::Less,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Comparison,
        },
    );
    set(
        TokenKind::LessEqual,
        ParseRule {
            prefix: None,
            infix: Some(binary),
            precedence: Precedence::Comparison,
        },
    );
    set(
        TokenKind::Identifier,
        ParseRule {
            prefix: Some(variable),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::String,
        ParseRule {
            prefix: Some(string),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::Number,
        ParseRule {
            prefix: Some(number),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::And,
        ParseRule {
            prefix: None,
            infix: Some(and_),
            precedence: Precedence::And,
        },
    );
    set(
        TokenKind::Or,
        ParseRule {
            prefix: None,
            infix: Some(or_),
            precedence: Precedence::Or,
        },
    );
    set(
        TokenKind::False,
        ParseRule {
            prefix: Some(literal),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::True,
        ParseRule {
            prefix: Some(literal),
            infix: None,
            precedence: Precedence::None,
        },
    );
    set(
        TokenKind::Nil,
        ParseRule {
            prefix: Some(literal),
            infix: None,
            precedence: Precedence::None,
        },
    );

    rules
});

fn get_rule(kind: TokenKind) -> &'static ParseRule {
    &RULES[kind as usize]
}

/// Whether a chunk belongs to a named function or the top-level script.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// A declared local: the source bytes of its name and its scope depth.
/// Depth `-1` means declared but not yet initialized.
struct Local<'src> {
    name: &'src [u8],
    depth: i32,
}

/// Per-function compile state. One of these per entry in the nesting
/// stack; the innermost is the function currently receiving bytecode.
struct FnState<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
}

impl<'src> FnState<'src> {
    fn new(name: Rc<ObjString>, kind: FunctionKind) -> Self {
        let mut locals = Vec::with_capacity(MAX_LOCALS);
        // Slot 0 holds the function value itself at runtime.
        locals.push(Local {
            name: b"",
            depth: 0,
        });
        FnState {
            function: ObjFunction::new(name),
            kind,
            locals,
            scope_depth: 0,
        }
    }
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    states: Vec<FnState<'src>>,
    debug: bool,
}

/// Compile a whole source string into the implicit top-level function.
///
/// Returns `None` if any diagnostic was reported; the caller treats that
/// as a compile error and never sees partial bytecode.
pub fn compile(source: &str, debug: bool) -> Option<Rc<ObjFunction>> {
    let blank = Token {
        kind: TokenKind::Eof,
        lexeme: b"",
        line: 1,
        start: 0,
    };
    let script_name = Rc::new(ObjString::new(Vec::new()));
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        current: blank,
        previous: blank,
        had_error: false,
        panic_mode: false,
        states: vec![FnState::new(script_name, FunctionKind::Script)],
        debug,
    };

    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_function();

    if compiler.had_error {
        None
    } else {
        Some(Rc::new(function))
    }
}

impl<'src> Compiler<'src> {
    //
    // --- Token plumbing -----------------------------------------------------
    //

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // Error tokens carry their message as the lexeme.
            let message = self.current.text().into_owned();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    //
    // --- Diagnostics --------------------------------------------------------
    //

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.text()),
        }
        eprintln!(": {}", message);

        self.had_error = true;
    }

    /// Skip forward to a statement boundary and leave panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    //
    // --- State access and emission ------------------------------------------
    //

    fn state(&self) -> &FnState<'src> {
        self.states.last().expect("compiler state stack is empty")
    }

    fn state_mut(&mut self) -> &mut FnState<'src> {
        self.states
            .last_mut()
            .expect("compiler state stack is empty")
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_return(&mut self) {
        self.emit_ops(OpCode::Nil, OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        if self.current_chunk().constants.len() >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        self.current_chunk().add_constant(value) as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_bytes(OpCode::Constant as u8, index);
    }

    /// Emit a jump with a two-byte placeholder and return the placeholder's
    /// offset for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    /// Back-patch a forward jump to land on the next emitted byte.
    fn patch_jump(&mut self, offset: usize) {
        // The distance is measured from past the two operand bytes.
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }

        let code = &mut self.current_chunk().code;
        code[offset] = ((jump >> 8) & 0xff) as u8;
        code[offset + 1] = (jump & 0xff) as u8;
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Seal the innermost function: implicit return, optional debug dump,
    /// and pop its state off the nesting stack.
    fn end_function(&mut self) -> ObjFunction {
        self.emit_return();
        let state = self.states.pop().expect("compiler state stack is empty");

        if self.debug && !self.had_error {
            let label = if state.function.name.chars.is_empty() {
                "script".to_string()
            } else {
                state.function.name.to_string()
            };
            state.function.chunk.disassemble(&label);
        }

        state.function
    }

    //
    // --- Declarations and statements ----------------------------------------
    //

    fn declaration(&mut self) {
        if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Functions may refer to their own name while the body compiles.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = Rc::new(ObjString::new(self.previous.lexeme.to_vec()));
        self.states.push(FnState::new(name, kind));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.state().function.arity == MAX_ARGS {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.state_mut().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the frame teardown discards the body's locals.
        let function = self.end_function();
        self.emit_constant(Value::Obj(Obj::Fun(Rc::new(function))));
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        // Initializer clause.
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();

        // Condition clause.
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        // Increment clause: compiled now, executed after each body pass, so
        // the body jumps over it and the loop re-enters at its start.
        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    //
    // --- Variables and scopes -----------------------------------------------
    //

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;

        // Pop every local that belonged to the closed scope.
        while self.has_local_above_scope() {
            self.state_mut().locals.pop();
            self.emit_op(OpCode::Pop);
        }
    }

    fn has_local_above_scope(&self) -> bool {
        let state = self.state();
        matches!(state.locals.last(), Some(local) if local.depth > state.scope_depth)
    }

    /// Consume an identifier and declare it; returns the name-constant
    /// index for globals, 0 for locals (which need no constant).
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }

        let name = self.previous;
        self.identifier_constant(name)
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let string = ObjString::new(name.lexeme.to_vec());
        self.make_constant(Value::Obj(Obj::Str(Rc::new(string))))
    }

    /// Record a new local in the current scope. Globals are late-bound and
    /// skip this entirely.
    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }

        let name = self.previous;
        let state = self.state();
        let mut duplicate = false;
        for local in state.locals.iter().rev() {
            if local.depth != -1 && local.depth < state.scope_depth {
                break;
            }
            if local.name == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.state().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local {
            name: name.lexeme,
            depth: -1,
        });
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }

    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Find `name` among the current function's locals, innermost first.
    /// `None` means the name resolves to a global at runtime.
    fn resolve_local(&mut self, name: Token<'_>) -> Option<u8> {
        let state = self.state();
        let mut found = None;
        for (slot, local) in state.locals.iter().enumerate().rev() {
            if local.name == name.lexeme {
                found = Some((slot, local.depth));
                break;
            }
        }

        match found {
            Some((slot, depth)) => {
                if depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                Some(slot as u8)
            }
            None => None,
        }
    }

    //
    // --- Expressions --------------------------------------------------------
    //

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// The Pratt core: run the prefix rule for the token just consumed,
    /// then fold in infix rules while they bind at least as tightly as
    /// `precedence`.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        // Only a lowest-precedence context may consume an `=`; the flag is
        // threaded to prefix rules so `variable` can compile assignments.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            // Every token with a binding power has an infix rule.
            let infix = get_rule(self.previous.kind)
                .infix
                .expect("token with precedence lacks an infix rule");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Compile a read or write of `name`, choosing local or global forms.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            self.emit_bytes(get_op as u8, arg);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }
}

//
// --- Pratt rule functions ---------------------------------------------------
//

fn grouping(c: &mut Compiler<'_>, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expect ')' after expression.");
}

fn number(c: &mut Compiler<'_>, _can_assign: bool) {
    // The scanner guarantees a well-formed literal.
    let value: f64 = c.previous.text().parse().unwrap_or(0.0);
    c.emit_constant(Value::Number(value));
}

fn string(c: &mut Compiler<'_>, _can_assign: bool) {
    // Strip the surrounding quotes; no escape processing.
    let lexeme = c.previous.lexeme;
    let chars = lexeme[1..lexeme.len() - 1].to_vec();
    c.emit_constant(Value::Obj(Obj::Str(Rc::new(ObjString::new(chars)))));
}

fn literal(c: &mut Compiler<'_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::True => c.emit_op(OpCode::True),
        TokenKind::Nil => c.emit_op(OpCode::Nil),
        _ => {}
    }
}

fn variable<'src>(c: &mut Compiler<'src>, can_assign: bool) {
    let name = c.previous;
    c.named_variable(name, can_assign);
}

fn unary(c: &mut Compiler<'_>, _can_assign: bool) {
    let operator = c.previous.kind;

    // Compile the operand.
    c.parse_precedence(Precedence::Unary);

    match operator {
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        TokenKind::Bang => c.emit_op(OpCode::Not),
        _ => {}
    }
}

fn binary(c: &mut Compiler<'_>, _can_assign: bool) {
    let operator = c.previous.kind;
    let rule = get_rule(operator);
    c.parse_precedence(rule.precedence.next());

    match operator {
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Subtract),
        TokenKind::Star => c.emit_op(OpCode::Multiply),
        TokenKind::Slash => c.emit_op(OpCode::Divide),
        TokenKind::BangEqual => c.emit_ops(OpCode::Equal, OpCode::Not),
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        // `a >= b` compiles as `!(a < b)`, which is wrong when an operand
        // is NaN. Same below for `<=`.
        TokenKind::GreaterEqual => c.emit_ops(OpCode::Less, OpCode::Not),
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => c.emit_ops(OpCode::Greater, OpCode::Not),
        _ => {}
    }
}

/// `and` short-circuits: if the left side is falsy it stays as the result
/// and the right side is skipped.
fn and_(c: &mut Compiler<'_>, _can_assign: bool) {
    let end_jump = c.emit_jump(OpCode::JumpIfFalse);

    c.emit_op(OpCode::Pop);
    c.parse_precedence(Precedence::And);

    c.patch_jump(end_jump);
}

/// `or` short-circuits: a truthy left side stays as the result.
fn or_(c: &mut Compiler<'_>, _can_assign: bool) {
    let else_jump = c.emit_jump(OpCode::JumpIfFalse);
    let end_jump = c.emit_jump(OpCode::Jump);

    c.patch_jump(else_jump);
    c.emit_op(OpCode::Pop);

    c.parse_precedence(Precedence::Or);
    c.patch_jump(end_jump);
}

fn call(c: &mut Compiler<'_>, _can_assign: bool) {
    let arg_count = c.argument_list();
    c.emit_bytes(OpCode::Call as u8, arg_count);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(chunk: &Chunk) -> &[u8] {
        &chunk.code
    }

    #[test]
    fn expression_statement_bytecode() {
        let function = compile("1;", false).unwrap();
        assert_eq!(
            ops(&function.chunk),
            &[
                OpCode::Constant as u8,
                0,
                OpCode::Pop as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
        assert_eq!(function.chunk.constants[0], Value::Number(1.0));
    }

    #[test]
    fn lines_stay_parallel_to_code() {
        let function = compile("var a = 1;\nvar b = 2;\nprint a + b;", false).unwrap();
        assert_eq!(function.chunk.code.len(), function.chunk.lines.len());
    }

    #[test]
    fn comparison_synthesis() {
        let function = compile("1 <= 2;", false).unwrap();
        assert_eq!(
            ops(&function.chunk),
            &[
                OpCode::Constant as u8,
                0,
                OpCode::Constant as u8,
                1,
                OpCode::Greater as u8,
                OpCode::Not as u8,
                OpCode::Pop as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn global_definition_bytecode() {
        let function = compile("var x = 1;", false).unwrap();
        // Name constant first, then the initializer.
        assert_eq!(
            ops(&function.chunk),
            &[
                OpCode::Constant as u8,
                1,
                OpCode::DefineGlobal as u8,
                0,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn if_else_jumps_are_patched() {
        let function = compile("if (true) 1; else 2;", false).unwrap();
        let code = ops(&function.chunk);
        assert_eq!(code[1], OpCode::JumpIfFalse as u8);
        // Distance from past the operands (offset 4) to the else-path pop.
        assert_eq!([code[2], code[3]], [0, 7]);
        assert_eq!(code[8], OpCode::Jump as u8);
        assert_eq!([code[9], code[10]], [0, 4]);
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let function = compile("while (false) 1;", false).unwrap();
        let code = ops(&function.chunk);
        assert_eq!(code[0], OpCode::False as u8);
        assert_eq!(code[8], OpCode::Loop as u8);
        // From past the loop operands (offset 11) back to offset 0.
        assert_eq!([code[9], code[10]], [0, 11]);
    }

    #[test]
    fn function_declaration_produces_constant() {
        let function = compile("fun f(a, b) { return a + b; }", false).unwrap();
        let inner = function
            .chunk
            .constants
            .iter()
            .find_map(|value| match value {
                Value::Obj(Obj::Fun(inner)) => Some(inner.clone()),
                _ => None,
            })
            .expect("function constant");
        assert_eq!(inner.arity, 2);
        assert_eq!(inner.name.chars, b"f");
        // Parameters resolve as locals 1 and 2.
        assert_eq!(
            &inner.chunk.code[..4],
            &[OpCode::GetLocal as u8, 1, OpCode::GetLocal as u8, 2]
        );
    }

    #[test]
    fn invalid_assignment_target() {
        assert!(compile("1 + 2 = 3;", false).is_none());
    }

    #[test]
    fn duplicate_local_in_same_scope() {
        assert!(compile("{ var a = 1; var a = 2; }", false).is_none());
        // Shadowing in an inner scope stays legal.
        assert!(compile("{ var a = 1; { var a = 2; } }", false).is_some());
    }

    #[test]
    fn local_read_in_own_initializer() {
        assert!(compile("{ var a = a; }", false).is_none());
    }

    #[test]
    fn return_outside_function() {
        assert!(compile("return 1;", false).is_none());
        assert!(compile("fun f() { return 1; }", false).is_some());
    }

    #[test]
    fn block_pops_locals_on_exit() {
        let function = compile("{ var a = 1; var b = 2; }", false).unwrap();
        let code = ops(&function.chunk);
        // Two locals, two pops before the implicit return.
        assert_eq!(
            &code[code.len() - 4..],
            &[
                OpCode::Pop as u8,
                OpCode::Pop as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn constant_pool_overflow() {
        let mut source = String::new();
        for i in 0..255 {
            source.push_str(&format!("{};", i));
        }
        assert!(compile(&source, false).is_some());

        source.push_str("255;");
        assert!(compile(&source, false).is_none());
    }

    #[test]
    fn local_slot_overflow() {
        let mut body = String::new();
        for i in 0..255 {
            body.push_str(&format!("var l{} = 0;", i));
        }
        let fits = format!("fun f() {{ {} }}", body);
        assert!(compile(&fits, false).is_some());

        body.push_str("var overflow = 0;");
        let overflows = format!("fun f() {{ {} }}", body);
        assert!(compile(&overflows, false).is_none());
    }

    #[test]
    fn jump_distance_overflow() {
        // Each `true;` statement is two bytes with no constants, so the
        // then-branch comfortably exceeds the 16-bit jump range.
        let mut source = String::from("if (true) {");
        source.push_str(&"true;".repeat(33_000));
        source.push('}');
        assert!(compile(&source, false).is_none());
    }

    #[test]
    fn error_recovery_reaches_later_statements() {
        // The first statement is malformed; the second still parses, and
        // the whole result is still a failure.
        assert!(compile("var = 1; var ok = 2;", false).is_none());
    }
}
