//! # Heap Objects for the Lox VM
//!
//! Values that live behind a pointer: strings, compiled functions, and
//! host-provided natives. [`Obj`] is a closed sum over the three kinds;
//! dispatch is always by variant, never by downcasting.
//!
//! Handles are `Rc` pointers. Nothing in the supported language can form a
//! reference cycle (there are no closures or classes), so dropping the VM's
//! roots at teardown releases every object.

use std::fmt;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::value::Value;

/// A heap object handle. Cloning copies the `Rc`, not the payload.
#[derive(Clone)]
pub enum Obj {
    /// Immutable byte string with a precomputed content hash.
    Str(Rc<ObjString>),
    /// A compiled function (the top-level script is one with an empty name).
    Fun(Rc<ObjFunction>),
    /// A host-provided callable.
    Native(Rc<ObjNative>),
}

impl PartialEq for Obj {
    /// Strings compare by content. Non-string objects of the same kind
    /// always compare equal; a quirk of this dialect, kept as-is.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Obj::Str(a), Obj::Str(b)) => a.chars == b.chars,
            (Obj::Fun(_), Obj::Fun(_)) => true,
            (Obj::Native(_), Obj::Native(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Str(s) => write!(f, "{}", s),
            Obj::Fun(fun) => {
                if fun.name.chars.is_empty() {
                    write!(f, "<script>")
                } else {
                    write!(f, "<fn {}>", fun.name)
                }
            }
            Obj::Native(_) => write!(f, "<native fn>"),
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An immutable byte sequence plus its 32-bit FNV-1a hash.
///
/// The bytes are treated opaquely; nothing here is UTF-8 aware. Two strings
/// with identical bytes always carry identical hashes, which is what the
/// hash table relies on.
pub struct ObjString {
    pub chars: Vec<u8>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(chars: Vec<u8>) -> Self {
        let hash = hash_bytes(&chars);
        ObjString { chars, hash }
    }

    /// Convenience constructor from UTF-8 text (host-side names, tests).
    pub fn from_str(text: &str) -> Self {
        ObjString::new(text.as_bytes().to_vec())
    }
}

impl fmt::Display for ObjString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.chars))
    }
}

/// 32-bit FNV-1a over a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// A compiled function: its arity, the chunk holding its bytecode, and a
/// name for diagnostics. The implicit top-level script uses an empty name
/// and arity 0.
pub struct ObjFunction {
    pub arity: u8,
    pub chunk: Chunk,
    pub name: Rc<ObjString>,
}

impl ObjFunction {
    pub fn new(name: Rc<ObjString>) -> Self {
        ObjFunction {
            arity: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

/// Signature for host callables. Arguments arrive as an already-evaluated
/// slice; the result is pushed back onto the operand stack by the VM.
pub type NativeFn = fn(&[Value]) -> Value;

/// A host-provided function: display name, arity (`None` means variadic),
/// and the function pointer itself.
pub struct ObjNative {
    pub name: String,
    pub arity: Option<u8>,
    pub function: NativeFn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_vectors() {
        // Offset basis for the empty input, published vector for "a".
        assert_eq!(hash_bytes(b""), 0x811c_9dc5);
        assert_eq!(hash_bytes(b"a"), 0xe40c_292c);
    }

    #[test]
    fn equal_bytes_hash_equally() {
        let a = ObjString::new(b"hello".to_vec());
        let b = ObjString::from_str("hello");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.chars, b.chars);
    }

    #[test]
    fn different_bytes_hash_differently() {
        // Not guaranteed in general, but these must not collide for the
        // probe-seed role to be useful.
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"hello!"));
    }

    #[test]
    fn display_forms() {
        let s = Obj::Str(Rc::new(ObjString::from_str("abc")));
        assert_eq!(s.to_string(), "abc");

        let script = Obj::Fun(Rc::new(ObjFunction::new(Rc::new(ObjString::new(
            Vec::new(),
        )))));
        assert_eq!(script.to_string(), "<script>");

        let named = Obj::Fun(Rc::new(ObjFunction::new(Rc::new(ObjString::from_str(
            "fib",
        )))));
        assert_eq!(named.to_string(), "<fn fib>");
    }
}
