//! # Standard Native Functions
//!
//! The handful of host callables every machine starts with. Natives take
//! their already-evaluated arguments as a slice and always produce a
//! value; argument-count checking for fixed arities happens in the VM
//! before the call.
//!
//! Embedders wanting more can register their own via `Vm::define_native`.

use std::time::{SystemTime, UNIX_EPOCH};

use super::Vm;
use crate::value::Value;

/// Register the standard natives on a fresh machine.
pub fn install(vm: &mut Vm) {
    vm.define_native("clock", Some(0), clock);
    vm.define_native("add", None, add);
}

/// `clock()` - seconds since the Unix epoch, as a number.
fn clock(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(seconds)
}

/// `add(...)` - variadic sum of the numeric arguments; non-numbers are
/// ignored rather than faulting.
fn add(args: &[Value]) -> Value {
    let mut total = 0.0;
    for arg in args {
        if let Value::Number(n) = arg {
            total += n;
        }
    }
    Value::Number(total)
}
