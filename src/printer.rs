use std::fmt::Write as _;

use rustc_hash::FxHashSet;

use crate::error::Condition;
use crate::heap::{ClosureKind, Heap, Obj, PortObj};
use crate::symbol::{sym, SymbolTable};
use crate::value::{ObjId, Value};

/// Print a value read-compatibly where possible (`write` semantics).
pub fn write_value(heap: &Heap, symbols: &SymbolTable, val: Value) -> String {
    let mut p = Printer::new(heap, symbols, false);
    p.print(val);
    p.out
}

/// Print a value for humans: raw strings and characters.
pub fn display_value(heap: &Heap, symbols: &SymbolTable, val: Value) -> String {
    let mut p = Printer::new(heap, symbols, true);
    p.print(val);
    p.out
}

struct Printer<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    display: bool,
    /// Cells on the current print path; a revisit is a cycle.
    path: FxHashSet<u32>,
    out: String,
}

impl<'a> Printer<'a> {
    fn new(heap: &'a Heap, symbols: &'a SymbolTable, display: bool) -> Self {
        Printer {
            heap,
            symbols,
            display,
            path: FxHashSet::default(),
            out: String::new(),
        }
    }

    fn print(&mut self, val: Value) {
        match val {
            Value::Nil => self.out.push_str("()"),
            Value::Bool(true) => self.out.push_str("#t"),
            Value::Bool(false) => self.out.push_str("#f"),
            Value::Int(n) => {
                let _ = write!(self.out, "{}", n);
            }
            Value::Ratio(n, d) => {
                let _ = write!(self.out, "{}/{}", n, d);
            }
            Value::Real(r) => self.print_real(r),
            Value::Complex(re, im) => {
                self.print_real(re);
                if im >= 0.0 || im.is_nan() {
                    self.out.push('+');
                }
                self.print_real(im);
                self.out.push('i');
            }
            Value::Char(c) => {
                if self.display {
                    self.out.push(c);
                } else {
                    match c {
                        ' ' => self.out.push_str("#\\space"),
                        '\n' => self.out.push_str("#\\newline"),
                        '\t' => self.out.push_str("#\\tab"),
                        '\r' => self.out.push_str("#\\return"),
                        '\0' => self.out.push_str("#\\null"),
                        _ => {
                            self.out.push_str("#\\");
                            self.out.push(c);
                        }
                    }
                }
            }
            Value::Unspecified => self.out.push_str("#<unspecified>"),
            Value::Undefined => self.out.push_str("#<undefined>"),
            Value::Eof => self.out.push_str("#<eof>"),
            Value::Symbol(s) => self.out.push_str(self.symbols.name(s)),
            Value::Keyword(s) => {
                self.out.push(':');
                self.out.push_str(self.symbols.name(s));
            }
            Value::Str(id) => {
                if self.display {
                    self.out.push_str(self.heap.string(id));
                } else {
                    self.out.push('"');
                    for c in self.heap.string(id).chars() {
                        match c {
                            '"' => self.out.push_str("\\\""),
                            '\\' => self.out.push_str("\\\\"),
                            '\n' => self.out.push_str("\\n"),
                            '\t' => self.out.push_str("\\t"),
                            _ => self.out.push(c),
                        }
                    }
                    self.out.push('"');
                }
            }
            Value::Pair(id) => {
                if !self.path.insert(id.0) {
                    self.out.push_str("#<cycle>");
                    return;
                }
                if let Some((prefix, inner)) = self.quote_sugar(id) {
                    self.out.push_str(prefix);
                    self.print(inner);
                } else {
                    self.print_list(val);
                }
                self.path.remove(&id.0);
            }
            Value::Vector(id) => {
                if !self.path.insert(id.0) {
                    self.out.push_str("#<cycle>");
                    return;
                }
                self.out.push_str("#(");
                let len = self.heap.vector(id).len();
                for i in 0..len {
                    if i > 0 {
                        self.out.push(' ');
                    }
                    let elem = self.heap.vector(id)[i];
                    self.print(elem);
                }
                self.out.push(')');
                self.path.remove(&id.0);
            }
            Value::IntVector(id) => {
                self.out.push_str("#i(");
                if let Obj::IntVector(v) = self.heap.obj(id) {
                    for (i, n) in v.iter().enumerate() {
                        if i > 0 {
                            self.out.push(' ');
                        }
                        let _ = write!(self.out, "{}", n);
                    }
                }
                self.out.push(')');
            }
            Value::FloatVector(id) => {
                self.out.push_str("#r(");
                if let Obj::FloatVector(v) = self.heap.obj(id) {
                    let items: Vec<f64> = v.clone();
                    for (i, r) in items.iter().enumerate() {
                        if i > 0 {
                            self.out.push(' ');
                        }
                        self.print_real(*r);
                    }
                }
                self.out.push(')');
            }
            Value::HashTable(id) => {
                let n = match self.heap.obj(id) {
                    Obj::HashTable(entries) => entries.len(),
                    _ => 0,
                };
                let _ = write!(self.out, "#<hash-table:{}>", n);
            }
            Value::Let(id) => {
                let n = self.heap.let_obj(id).slots.len();
                let _ = write!(self.out, "#<let:{}>", n);
            }
            Value::Port(id) => {
                let kind = match self.heap.obj(id) {
                    Obj::Port(PortObj::InputString { .. }) => "input-string",
                    Obj::Port(PortObj::OutputString(_)) => "output-string",
                    Obj::Port(PortObj::Stdout) => "stdout",
                    Obj::Port(PortObj::Closed) => "closed",
                    _ => "port",
                };
                let _ = write!(self.out, "#<{}-port>", kind);
            }
            Value::Closure(id) => {
                if let Obj::Closure(c) = self.heap.obj(id) {
                    let what = match c.kind {
                        ClosureKind::Function | ClosureKind::FunctionStar => "lambda",
                        ClosureKind::Macro | ClosureKind::MacroStar => "macro",
                    };
                    match c.name {
                        Some(s) => {
                            let _ = write!(self.out, "#<{} {}>", what, self.symbols.name(s));
                        }
                        None => {
                            let _ = write!(self.out, "#<{}>", what);
                        }
                    }
                }
            }
            Value::Builtin(id) => {
                if let Obj::Builtin(b) = self.heap.obj(id) {
                    let _ = write!(self.out, "#<builtin {}>", b.name);
                }
            }
            Value::Continuation(_) => self.out.push_str("#<continuation>"),
            Value::CObject(id) => {
                if let Obj::CObject(c) = self.heap.obj(id) {
                    let _ = write!(self.out, "#<{}>", self.heap.c_type(c.ctype).name);
                }
            }
            Value::Promise(_) => self.out.push_str("#<promise>"),
        }
    }

    /// Two-element quote-family lists render with reader sugar.
    fn quote_sugar(&self, id: ObjId) -> Option<(&'static str, Value)> {
        let prefix = match self.heap.car(id) {
            Value::Symbol(sym::QUOTE) => "'",
            Value::Symbol(sym::QUASIQUOTE) => "`",
            Value::Symbol(sym::UNQUOTE) => ",",
            Value::Symbol(sym::UNQUOTE_SPLICING) => ",@",
            _ => return None,
        };
        let Value::Pair(tail) = self.heap.cdr(id) else {
            return None;
        };
        if !matches!(self.heap.cdr(tail), Value::Nil) {
            return None;
        }
        Some((prefix, self.heap.car(tail)))
    }

    fn print_real(&mut self, r: f64) {
        if r.is_nan() {
            self.out.push_str("+nan.0");
        } else if r.is_infinite() {
            self.out.push_str(if r > 0.0 { "+inf.0" } else { "-inf.0" });
        } else if r == r.trunc() && r.abs() < 1e16 {
            let _ = write!(self.out, "{:.1}", r);
        } else {
            let _ = write!(self.out, "{}", r);
        }
    }

    fn print_list(&mut self, val: Value) {
        self.out.push('(');
        let mut current = val;
        let mut first = true;
        loop {
            match current {
                Value::Nil => break,
                Value::Pair(id) => {
                    if !first && !self.path.insert(id.0) {
                        self.out.push_str(" . #<cycle>");
                        break;
                    }
                    if !first {
                        self.out.push(' ');
                    }
                    first = false;
                    let car = self.heap.car(id);
                    self.print(car);
                    current = self.heap.cdr(id);
                }
                other => {
                    self.out.push_str(" . ");
                    self.print(other);
                    break;
                }
            }
        }
        self.out.push(')');
        // Clear the spine from the path; stop at the first cell that is
        // already gone so cyclic tails terminate.
        let mut current = val;
        while let Value::Pair(id) = current {
            if !self.path.remove(&id.0) {
                break;
            }
            current = self.heap.cdr(id);
        }
    }

    fn print_template(&mut self, template: &str, args: &[Value]) {
        let mut next = 0;
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '~' {
                self.out.push(c);
                continue;
            }
            match chars.next() {
                Some('A') | Some('a') | Some('D') | Some('d') => {
                    let arg = args.get(next).copied().unwrap_or(Value::Unspecified);
                    next += 1;
                    let was = self.display;
                    self.display = true;
                    self.print(arg);
                    self.display = was;
                }
                Some('S') | Some('s') => {
                    let arg = args.get(next).copied().unwrap_or(Value::Unspecified);
                    next += 1;
                    let was = self.display;
                    self.display = false;
                    self.print(arg);
                    self.display = was;
                }
                Some('%') => self.out.push('\n'),
                Some('~') => self.out.push('~'),
                Some(other) => {
                    self.out.push('~');
                    self.out.push(other);
                }
                None => self.out.push('~'),
            }
        }
    }
}

/// Render a condition for the default (uncaught) handler. When the info
/// list starts with a string it is treated as a `~A`/`~S` template over
/// the remaining items; otherwise tag and info are printed directly.
pub fn format_condition(heap: &Heap, symbols: &SymbolTable, cond: Condition) -> String {
    let mut p = Printer::new(heap, symbols, true);
    p.print(cond.tag);
    p.out.push_str(": ");
    let mut formatted = false;
    if let Value::Pair(id) = cond.info {
        if let Value::Str(sid) = heap.car(id) {
            let template = heap.string(sid).to_string();
            let args = heap.list_to_vec(heap.cdr(id)).unwrap_or_default();
            p.print_template(&template, &args);
            formatted = true;
        }
    }
    if !formatted {
        let was = p.display;
        p.display = false;
        let info = cond.info;
        p.print(info);
        p.display = was;
    }
    p.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::sym;
    use crate::value::Value;

    fn setup() -> (Heap, SymbolTable) {
        (Heap::new(), SymbolTable::new())
    }

    #[test]
    fn writes_basic_values() {
        let (mut h, st) = setup();
        assert_eq!(write_value(&h, &st, Value::Int(42)), "42");
        assert_eq!(write_value(&h, &st, Value::Bool(false)), "#f");
        assert_eq!(write_value(&h, &st, Value::Ratio(1, 2)), "1/2");
        assert_eq!(write_value(&h, &st, Value::Real(2.0)), "2.0");
        assert_eq!(write_value(&h, &st, Value::Char(' ')), "#\\space");
        let s = h.make_string("a\"b");
        assert_eq!(write_value(&h, &st, s), "\"a\\\"b\"");
        assert_eq!(display_value(&h, &st, s), "a\"b");
    }

    #[test]
    fn writes_lists_and_dots() {
        let (mut h, st) = setup();
        let inner = h.cons(Value::Int(2), Value::Int(3));
        let outer = h.cons(Value::Int(1), inner);
        assert_eq!(write_value(&h, &st, outer), "(1 2 . 3)");
    }

    #[test]
    fn cyclic_list_terminates() {
        let (mut h, st) = setup();
        let a = h.cons(Value::Int(1), Value::Nil);
        h.set_cdr(a.obj_id().unwrap(), a);
        let printed = write_value(&h, &st, a);
        assert!(printed.contains("#<cycle>"));
    }

    #[test]
    fn quote_family_prints_as_sugar() {
        let (mut h, mut st) = setup();
        let b = st.intern("b");
        let uq = h.list(&[Value::Symbol(sym::UNQUOTE), Value::Symbol(b)]);
        let a = st.intern("a");
        let body = h.list(&[Value::Symbol(a), uq]);
        let qq = h.list(&[Value::Symbol(sym::QUASIQUOTE), body]);
        assert_eq!(write_value(&h, &st, qq), "`(a ,b)");
        let x = st.intern("x");
        let q = h.list(&[Value::Symbol(sym::QUOTE), Value::Symbol(x)]);
        assert_eq!(write_value(&h, &st, q), "'x");
        // three-element lists are not sugar
        let long = h.list(&[Value::Symbol(sym::QUOTE), Value::Symbol(x), Value::Symbol(x)]);
        assert_eq!(write_value(&h, &st, long), "(quote x x)");
    }

    #[test]
    fn condition_templates_format() {
        let (mut h, mut st) = setup();
        let msg = h.make_string("expected ~S, got ~A");
        let x = st.intern("x");
        let info = h.list(&[msg, Value::Symbol(x), Value::Int(3)]);
        let cond = Condition::new(Value::Symbol(sym::WRONG_TYPE_ARG), info);
        let out = format_condition(&h, &st, cond);
        assert_eq!(out, "wrong-type-arg: expected x, got 3");
    }
}
