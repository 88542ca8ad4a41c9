//! Environment frames ("lets") and the lookup chain.
//!
//! A let is a heap object holding symbol slots plus an outlet pointer to
//! the enclosing frame. The rootlet terminates the chain with a Nil
//! outlet. All functions here take the heap explicitly; the evaluator
//! and the host API build on them.

use crate::heap::Heap;
use crate::symbol::sym;
use crate::value::{ObjId, SymbolId, Value};

/// Look up a symbol in one frame only, ignoring the outlet chain.
pub fn lookup_local(heap: &Heap, let_id: ObjId, name: SymbolId) -> Option<Value> {
    heap.let_obj(let_id)
        .slots
        .iter()
        .rev()
        .find(|(s, _)| *s == name)
        .map(|(_, v)| *v)
}

/// Walk the outlet chain looking for a binding. Inner frames shadow
/// outer ones.
pub fn lookup(heap: &Heap, env: Value, name: SymbolId) -> Option<Value> {
    let mut current = env;
    while let Value::Let(id) = current {
        if let Some(v) = lookup_local(heap, id, name) {
            return Some(v);
        }
        current = heap.let_obj(id).outlet;
    }
    None
}

/// Add a binding to a frame, or overwrite one already present there.
/// This is `varlet` and the back end of `define`.
pub fn define(heap: &mut Heap, let_id: ObjId, name: SymbolId, value: Value) {
    let l = heap.let_obj_mut(let_id);
    for (s, v) in l.slots.iter_mut().rev() {
        if *s == name {
            *v = value;
            return;
        }
    }
    l.slots.push((name, value));
}

/// Mutate the innermost existing binding of `name`. Returns false when
/// no frame in the chain binds it; `set!` turns that into a condition.
pub fn set_existing(heap: &mut Heap, env: Value, name: SymbolId, value: Value) -> bool {
    let mut current = env;
    while let Value::Let(id) = current {
        let l = heap.let_obj_mut(id);
        if let Some((_, v)) = l.slots.iter_mut().rev().find(|(s, _)| *s == name) {
            *v = value;
            return true;
        }
        current = heap.let_obj(id).outlet;
    }
    false
}

/// A fresh frame whose outlet is `env`, with the given initial bindings.
pub fn sublet(heap: &mut Heap, env: Value, bindings: &[(SymbolId, Value)]) -> Value {
    let new_let = heap.make_let(env);
    if let Value::Let(id) = new_let {
        for &(s, v) in bindings {
            define(heap, id, s, v);
        }
    }
    new_let
}

pub fn outlet(heap: &Heap, let_id: ObjId) -> Value {
    heap.let_obj(let_id).outlet
}

pub fn openlet(heap: &mut Heap, let_id: ObjId) {
    heap.let_obj_mut(let_id).open = true;
}

pub fn coverlet(heap: &mut Heap, let_id: ObjId) {
    heap.let_obj_mut(let_id).open = false;
}

pub fn is_openlet(heap: &Heap, let_id: ObjId) -> bool {
    heap.let_obj(let_id).open
}

/// After a whole-chain lookup miss, find the innermost open frame that
/// binds `*fallback*`. The evaluator applies that handler to
/// `(let symbol)`.
pub fn find_fallback(heap: &Heap, env: Value) -> Option<(Value, Value)> {
    let mut current = env;
    while let Value::Let(id) = current {
        let l = heap.let_obj(id);
        if l.open {
            if let Some(handler) = lookup_local(heap, id, sym::FALLBACK) {
                return Some((current, handler));
            }
        }
        current = l.outlet;
    }
    None
}

/// The bindings of one frame as an association list, newest first.
pub fn frame_alist(heap: &mut Heap, let_id: ObjId) -> Value {
    let slots: Vec<(SymbolId, Value)> = heap.let_obj(let_id).slots.clone();
    let mut result = Value::Nil;
    for &(s, v) in &slots {
        let entry = heap.cons(Value::Symbol(s), v);
        result = heap.cons(entry, result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn setup() -> (Heap, SymbolTable) {
        (Heap::new(), SymbolTable::new())
    }

    #[test]
    fn inner_frames_shadow_outer() {
        let (mut h, mut st) = setup();
        let x = st.intern("x");
        let root = h.make_let(Value::Nil);
        let root_id = root.obj_id().unwrap();
        define(&mut h, root_id, x, Value::Int(1));
        let inner = sublet(&mut h, root, &[(x, Value::Int(2))]);
        assert_eq!(lookup(&h, inner, x), Some(Value::Int(2)));
        assert_eq!(lookup(&h, root, x), Some(Value::Int(1)));
    }

    #[test]
    fn set_existing_walks_the_chain() {
        let (mut h, mut st) = setup();
        let x = st.intern("x");
        let y = st.intern("y");
        let root = h.make_let(Value::Nil);
        define(&mut h, root.obj_id().unwrap(), x, Value::Int(1));
        let inner = sublet(&mut h, root, &[]);
        assert!(set_existing(&mut h, inner, x, Value::Int(5)));
        assert_eq!(lookup(&h, root, x), Some(Value::Int(5)));
        assert!(!set_existing(&mut h, inner, y, Value::Int(0)));
    }

    #[test]
    fn define_overwrites_in_place() {
        let (mut h, mut st) = setup();
        let x = st.intern("x");
        let root = h.make_let(Value::Nil);
        let id = root.obj_id().unwrap();
        define(&mut h, id, x, Value::Int(1));
        define(&mut h, id, x, Value::Int(2));
        assert_eq!(h.let_obj(id).slots.len(), 1);
        assert_eq!(lookup(&h, root, x), Some(Value::Int(2)));
    }

    #[test]
    fn fallback_found_only_in_open_frames() {
        let (mut h, _st) = setup();
        let handler = Value::Int(42); // stand-in for a procedure
        let root = h.make_let(Value::Nil);
        let frame = sublet(&mut h, root, &[(sym::FALLBACK, handler)]);
        assert!(find_fallback(&h, frame).is_none());
        openlet(&mut h, frame.obj_id().unwrap());
        let (found_let, found) = find_fallback(&h, frame).unwrap();
        assert!(found_let.is_eq(frame));
        assert_eq!(found, Value::Int(42));
    }
}
