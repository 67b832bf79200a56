use super::*;
use crate::error::{InterpretError, RuntimeError};

fn run(source: &str) -> (Vm, Result<(), InterpretError>) {
    let mut vm = Vm::new(false);
    let result = vm.interpret(source);
    (vm, result)
}

/// Read a global left behind by the program under test.
fn global(vm: &Vm, name: &str) -> Option<Value> {
    vm.globals.get(&ObjString::from_str(name)).cloned()
}

#[test]
fn arithmetic_precedence() {
    let (vm, result) = run("var r = 1 + 2 * 3;");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Number(7.0)));
}

#[test]
fn grouping_and_unary() {
    let (vm, result) = run("var r = -(3 - 5) * 2;");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Number(4.0)));
}

#[test]
fn string_concatenation() {
    let (vm, result) = run("var a = \"foo\"; var b = \"bar\"; var r = a + b;");
    assert_eq!(result, Ok(()));
    let expected = Value::Obj(Obj::Str(Rc::new(ObjString::from_str("foobar"))));
    assert_eq!(global(&vm, "r"), Some(expected));
}

#[test]
fn comparison_chain() {
    let (vm, result) = run("var a = 1 < 2; var b = 2 <= 2; var c = 3 >= 4; var d = 1 != 2;");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "a"), Some(Value::Bool(true)));
    assert_eq!(global(&vm, "b"), Some(Value::Bool(true)));
    assert_eq!(global(&vm, "c"), Some(Value::Bool(false)));
    assert_eq!(global(&vm, "d"), Some(Value::Bool(true)));
}

#[test]
fn if_else_branches() {
    let (vm, result) = run("var r = \"none\"; if (1 < 2) r = \"then\"; else r = \"else\";");
    assert_eq!(result, Ok(()));
    let expected = Value::Obj(Obj::Str(Rc::new(ObjString::from_str("then"))));
    assert_eq!(global(&vm, "r"), Some(expected));

    let (vm, result) = run("var r = \"none\"; if (nil) r = \"then\"; else r = \"else\";");
    assert_eq!(result, Ok(()));
    let expected = Value::Obj(Obj::Str(Rc::new(ObjString::from_str("else"))));
    assert_eq!(global(&vm, "r"), Some(expected));
}

#[test]
fn zero_is_falsy() {
    let (vm, result) = run("var r = \"yes\"; if (0) r = \"no\";");
    assert_eq!(result, Ok(()));
    let expected = Value::Obj(Obj::Str(Rc::new(ObjString::from_str("yes"))));
    assert_eq!(global(&vm, "r"), Some(expected));
}

#[test]
fn while_loop() {
    let (vm, result) = run("var n = 0; while (n < 5) n = n + 1;");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "n"), Some(Value::Number(5.0)));
}

#[test]
fn for_loop_accumulates() {
    let (vm, result) = run("var x = 0; for (var i = 0; i < 5; i = i + 1) { x = x + i; }");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "x"), Some(Value::Number(10.0)));
}

#[test]
fn for_loop_with_empty_clauses() {
    // Without the condition and increment the only way out is a return.
    let source = "fun first() { for (;;) { return 9; } } var r = first();";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Number(9.0)));
}

#[test]
fn block_scoping_and_shadowing() {
    let source = "var outer = 0; var inner = 0; { var a = 1; { var a = 2; inner = a; } outer = a; }";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "inner"), Some(Value::Number(2.0)));
    assert_eq!(global(&vm, "outer"), Some(Value::Number(1.0)));
}

#[test]
fn stack_is_empty_after_normal_return() {
    let (vm, result) = run("var a = 1; { var b = 2; a = a + b; } print a;");
    assert_eq!(result, Ok(()));
    assert!(vm.stack.is_empty());
    assert!(vm.frames.is_empty());
}

#[test]
fn short_circuit_evaluation() {
    let source = "var called = 0; \
                  fun touch() { called = called + 1; return true; } \
                  var a = false and touch(); \
                  var b = true or touch(); \
                  var c = true and touch();";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "called"), Some(Value::Number(1.0)));
    assert_eq!(global(&vm, "a"), Some(Value::Bool(false)));
    assert_eq!(global(&vm, "b"), Some(Value::Bool(true)));
    assert_eq!(global(&vm, "c"), Some(Value::Bool(true)));
}

#[test]
fn function_call_and_return() {
    let source = "fun square(n) { return n * n; } var r = square(9);";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Number(81.0)));
}

#[test]
fn function_without_return_yields_nil() {
    let (vm, result) = run("fun noop() { } var r = noop();");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Nil));
}

#[test]
fn fibonacci_recursion() {
    let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
                  var r = fib(10);";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "r"), Some(Value::Number(55.0)));
}

#[test]
fn globals_persist_across_interpret_calls() {
    let mut vm = Vm::new(false);
    assert_eq!(vm.interpret("var counter = 1;"), Ok(()));
    assert_eq!(vm.interpret("counter = counter + 1;"), Ok(()));
    assert_eq!(global(&vm, "counter"), Some(Value::Number(2.0)));
}

#[test]
fn clock_native_returns_seconds() {
    let (vm, result) = run("var r = clock();");
    assert_eq!(result, Ok(()));
    match global(&vm, "r") {
        Some(Value::Number(seconds)) => assert!(seconds > 0.0),
        other => panic!("expected a number, got {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn native_value_is_first_class() {
    let (vm, result) = run("var r = clock;");
    assert_eq!(result, Ok(()));
    assert!(matches!(
        global(&vm, "r"),
        Some(Value::Obj(Obj::Native(_)))
    ));
}

#[test]
fn variadic_native_accepts_any_argc() {
    let (vm, result) = run("var a = add(); var b = add(1, 2, 3, 4);");
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "a"), Some(Value::Number(0.0)));
    assert_eq!(global(&vm, "b"), Some(Value::Number(10.0)));
}

#[test]
fn native_arity_mismatch_faults_before_invocation() {
    let (_, result) = run("clock(1);");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::ArityMismatch {
            expected: 0,
            got: 1
        }))
    );
}

#[test]
fn function_arity_mismatch() {
    let (_, result) = run("fun two(a, b) { return a + b; } two(1);");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::ArityMismatch {
            expected: 2,
            got: 1
        }))
    );
}

#[test]
fn adding_number_and_string_faults() {
    let (_, result) = run("1 + \"x\";");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::TypeError(
            "Operands must be numbers or strings.".to_string()
        )))
    );
}

#[test]
fn negating_a_string_faults() {
    let (_, result) = run("-\"x\";");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::TypeError(
            "Operand must be a number.".to_string()
        )))
    );
}

#[test]
fn comparing_mixed_types_faults() {
    let (_, result) = run("1 < \"x\";");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::TypeError(
            "Operands must be numbers.".to_string()
        )))
    );
}

#[test]
fn undefined_global_read() {
    let (_, result) = run("var r = undefined_name;");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::UndefinedVariable(
            "undefined_name".to_string()
        )))
    );
}

#[test]
fn undefined_global_assignment() {
    let (vm, result) = run("undefined_name = 1;");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::UndefinedVariable(
            "undefined_name".to_string()
        )))
    );
    // The failed assignment must not leave the global defined.
    assert_eq!(global(&vm, "undefined_name"), None);
}

#[test]
fn calling_a_non_callable_faults() {
    let (_, result) = run("var x = 1; x();");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::NotCallable))
    );
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let (_, result) = run("fun spin() { spin(); } spin();");
    assert_eq!(
        result,
        Err(InterpretError::Runtime(RuntimeError::StackOverflow))
    );
}

#[test]
fn machine_is_usable_after_a_fault() {
    let mut vm = Vm::new(false);
    assert!(vm.interpret("1 + \"x\";").is_err());
    assert!(vm.stack.is_empty());
    assert!(vm.frames.is_empty());
    assert_eq!(vm.interpret("var ok = 1 + 2;"), Ok(()));
    assert_eq!(global(&vm, "ok"), Some(Value::Number(3.0)));
}

#[test]
fn compile_error_is_distinguished() {
    let (_, result) = run("var = ;");
    assert_eq!(result, Err(InterpretError::Compile));
}

#[test]
fn equality_semantics_end_to_end() {
    let source = "var a = 1 == 1; var b = \"x\" == \"x\"; var c = \"x\" == 1; var d = nil == nil;";
    let (vm, result) = run(source);
    assert_eq!(result, Ok(()));
    assert_eq!(global(&vm, "a"), Some(Value::Bool(true)));
    assert_eq!(global(&vm, "b"), Some(Value::Bool(true)));
    assert_eq!(global(&vm, "c"), Some(Value::Bool(false)));
    assert_eq!(global(&vm, "d"), Some(Value::Bool(true)));
}
