use std::fmt;

/// Unique identifier for an interned symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Index into the object heap. This is the GC handle for every
/// heap-allocated value kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// The fundamental Scheme value: a small Copy tagged union. Immediates
/// carry their payload directly; heap kinds carry an `ObjId` whose cell
/// kind must agree with the tag. The cell representation itself lives in
/// `heap.rs` and is never exposed to embedding hosts.
#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    /// Normalized rational: gcd(num, den) = 1, den > 0.
    Ratio(i64, i64),
    Real(f64),
    Complex(f64, f64),
    Char(char),
    /// The value of expressions evaluated for effect.
    Unspecified,
    /// The "no such thing" sentinel (distinct from nil and unspecified).
    Undefined,
    Eof,
    Symbol(SymbolId),
    /// Self-evaluating `:name` marker used for keyword argument binding.
    Keyword(SymbolId),
    Pair(ObjId),
    Str(ObjId),
    Vector(ObjId),
    IntVector(ObjId),
    FloatVector(ObjId),
    HashTable(ObjId),
    Let(ObjId),
    Port(ObjId),
    Closure(ObjId),
    Builtin(ObjId),
    Continuation(ObjId),
    CObject(ObjId),
    Promise(ObjId),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(self) -> bool {
        matches!(self, Value::Pair(_))
    }

    pub fn is_symbol(self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    pub fn is_let(self) -> bool {
        matches!(self, Value::Let(_))
    }

    pub fn is_number(self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Ratio(_, _) | Value::Real(_) | Value::Complex(_, _)
        )
    }

    pub fn is_procedure(self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Builtin(_) | Value::Continuation(_)
        )
    }

    /// Scheme truth: everything except `#f` is true.
    pub fn is_true(self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn as_pair(self) -> Option<ObjId> {
        match self {
            Value::Pair(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_symbol(self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// The heap handle, for any heap-allocated kind.
    pub fn obj_id(self) -> Option<ObjId> {
        match self {
            Value::Pair(id)
            | Value::Str(id)
            | Value::Vector(id)
            | Value::IntVector(id)
            | Value::FloatVector(id)
            | Value::HashTable(id)
            | Value::Let(id)
            | Value::Port(id)
            | Value::Closure(id)
            | Value::Builtin(id)
            | Value::Continuation(id)
            | Value::CObject(id)
            | Value::Promise(id) => Some(id),
            _ => None,
        }
    }

    /// A normalized rational: gcd reduced, denominator positive, and
    /// collapsed to `Int` when the denominator is 1. Zero denominators
    /// are the caller's problem (signalled before construction).
    pub fn ratio(num: i64, den: i64) -> Value {
        let (mut n, mut d) = if den < 0 {
            // i64::MIN has no negation; give up exactness
            match (num.checked_neg(), den.checked_neg()) {
                (Some(n), Some(d)) => (n, d),
                _ => return Value::Real(num as f64 / den as f64),
            }
        } else {
            (num, den)
        };
        let g = gcd(n.unsigned_abs(), d.unsigned_abs());
        if g > 1 {
            n /= g as i64;
            d /= g as i64;
        }
        if d == 1 {
            Value::Int(n)
        } else {
            Value::Ratio(n, d)
        }
    }

    /// Pointer identity / immediate identity (the `eq?` predicate).
    /// Heap kinds compare by handle, immediates by payload. `Real` and
    /// `Complex` compare by bits so `eq?` stays reflexive over NaN.
    pub fn is_eq(self, other: Value) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Complex(ar, ai), Value::Complex(br, bi)) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            _ => self == other,
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Ratio(n, d) => write!(f, "Ratio({}/{})", n, d),
            Value::Real(x) => write!(f, "Real({})", x),
            Value::Complex(re, im) => write!(f, "Complex({}+{}i)", re, im),
            Value::Char(c) => write!(f, "Char({:?})", c),
            Value::Unspecified => write!(f, "Unspecified"),
            Value::Undefined => write!(f, "Undefined"),
            Value::Eof => write!(f, "Eof"),
            Value::Symbol(id) => write!(f, "Sym({})", id.0),
            Value::Keyword(id) => write!(f, "Key({})", id.0),
            Value::Pair(id) => write!(f, "Pair({})", id.0),
            Value::Str(id) => write!(f, "Str({})", id.0),
            Value::Vector(id) => write!(f, "Vector({})", id.0),
            Value::IntVector(id) => write!(f, "IntVector({})", id.0),
            Value::FloatVector(id) => write!(f, "FloatVector({})", id.0),
            Value::HashTable(id) => write!(f, "HashTable({})", id.0),
            Value::Let(id) => write!(f, "Let({})", id.0),
            Value::Port(id) => write!(f, "Port({})", id.0),
            Value::Closure(id) => write!(f, "Closure({})", id.0),
            Value::Builtin(id) => write!(f, "Builtin({})", id.0),
            Value::Continuation(id) => write!(f, "Continuation({})", id.0),
            Value::CObject(id) => write!(f, "CObject({})", id.0),
            Value::Promise(id) => write!(f, "Promise({})", id.0),
        }
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.0)
    }
}
