use std::any::Any;

use rustc_hash::FxHashSet;

use crate::error::Condition;
use crate::eval::{Op, Winder};
use crate::value::{ObjId, SymbolId, Value};

/// Number of recently-allocated values treated as implicit GC roots.
/// This is the lag between an unprotected allocation and the first moment
/// the collector may reclaim it, so native code can build small graphs
/// (nested conses and the like) without protecting every intermediate.
pub const GC_TEMPS: usize = 256;

/// Allocations between collection attempts, before occupancy adjustment.
const INITIAL_GC_THRESHOLD: usize = 1024 * 64;

/// A native function: receives the interpreter and the evaluated
/// arguments, returns a value or raises a condition.
pub type NativeFn =
    fn(&mut crate::eval::Interp, &[Value]) -> std::result::Result<Value, Condition>;

/// How a closure or builtin treats its parameter list.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClosureKind {
    Function,
    /// lambda*/define*: all parameters optional, keyword-addressable.
    FunctionStar,
    Macro,
    MacroStar,
}

/// One declared parameter. `default` is an unevaluated expression run in
/// the new frame when the argument is absent.
#[derive(Clone)]
pub struct Param {
    pub name: SymbolId,
    pub default: Option<Value>,
}

/// Parsed parameter specification shared by closures and `define*`-style
/// builtins.
#[derive(Clone)]
pub struct ParamSpec {
    pub params: Vec<Param>,
    pub rest: Option<SymbolId>,
    /// Number of parameters without defaults; the required count for
    /// plain lambdas (star closures require none).
    pub required: usize,
}

/// A closure: parameter spec, body, and the environment captured at
/// creation.
pub struct ClosureObj {
    pub kind: ClosureKind,
    pub spec: ParamSpec,
    /// List of body expressions.
    pub body: Value,
    /// The captured let.
    pub env: Value,
    pub name: Option<SymbolId>,
}

/// Builtins that cannot return a value directly because they manipulate
/// the evaluator's own control state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SpecialOp {
    Catch,
    DynamicWind,
    CallCc,
    Apply,
    Eval,
    Force,
    Quit,
}

pub enum BuiltinKind {
    Native(NativeFn),
    /// Keyword-argument builtin: the dispatcher resolves the spec, then
    /// calls the native with one value per declared parameter.
    NativeStar(NativeFn, ParamSpec),
    Special(SpecialOp),
}

pub struct BuiltinObj {
    pub name: String,
    pub doc: String,
    pub required: usize,
    pub optional: usize,
    pub rest: bool,
    pub kind: BuiltinKind,
}

/// An environment frame ("let"): symbol -> mutable slot, chained to an
/// outer frame. `open` marks the frame for `*fallback*` method dispatch.
pub struct LetObj {
    pub slots: Vec<(SymbolId, Value)>,
    /// The parent frame (a Let) or Nil at the rootlet.
    pub outlet: Value,
    pub open: bool,
}

/// A captured continuation: the evaluator's pending control state as
/// ordinary data.
pub struct ContObj {
    pub ops: Vec<Op>,
    pub vals: Vec<Value>,
    pub winders: Vec<Winder>,
}

pub enum PortObj {
    InputString { text: String, pos: usize },
    OutputString(String),
    Stdout,
    Closed,
}

/// A promise created by `delay`, forced at most once.
pub struct PromiseObj {
    pub expr: Value,
    pub env: Value,
    pub forced: Option<Value>,
}

/// Per-foreign-type dispatch table. Optional methods default to the
/// obvious behavior: no embedded values, identity equality, no ref/set.
pub struct CType {
    pub name: String,
    /// Report values embedded in the instance data to the collector.
    pub mark: Option<fn(&dyn Any, &mut dyn FnMut(Value))>,
    pub equal: Option<fn(&dyn Any, &dyn Any) -> bool>,
    /// `(obj index)` element access, if the type is applicable.
    pub object_ref: Option<NativeFn>,
    /// `(set! (obj index) value)` analogue.
    pub object_set: Option<NativeFn>,
}

/// A host-defined opaque object. Dropping the cell drops the data, which
/// is the free hook.
pub struct CObj {
    pub ctype: usize,
    pub data: Box<dyn Any>,
}

/// The payload of one heap cell.
pub enum Obj {
    Free,
    Pair { car: Value, cdr: Value },
    Str(String),
    Vector(Vec<Value>),
    IntVector(Vec<i64>),
    FloatVector(Vec<f64>),
    /// Association storage; keys compared with structural equality.
    HashTable(Vec<(Value, Value)>),
    Let(LetObj),
    Port(PortObj),
    Closure(ClosureObj),
    Builtin(BuiltinObj),
    Continuation(ContObj),
    CObject(CObj),
    Promise(PromiseObj),
}

struct Cell {
    obj: Obj,
    mark: bool,
}

/// The object heap. Every heap-allocated Scheme value lives in `cells`;
/// a `Value`'s ObjId is an index into it. Allocation never fails visibly:
/// the free list is tried first, then the arena grows.
pub struct Heap {
    cells: Vec<Cell>,
    free_list: Vec<ObjId>,
    /// Semi-permanent roots registered by the host; Undefined marks a
    /// reusable slot.
    protected: Vec<Value>,
    protected_free: Vec<usize>,
    /// Ring of the GC_TEMPS most recent allocations, implicit roots.
    temps: Vec<Value>,
    temp_next: usize,
    /// Foreign type dispatch tables, indexed by ctype tag.
    ctypes: Vec<CType>,
    allocs_since_gc: usize,
    gc_threshold: usize,
    gc_enabled: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
            free_list: Vec::new(),
            protected: Vec::new(),
            protected_free: Vec::new(),
            temps: vec![Value::Nil; GC_TEMPS],
            temp_next: 0,
            ctypes: Vec::new(),
            allocs_since_gc: 0,
            gc_threshold: INITIAL_GC_THRESHOLD,
            gc_enabled: true,
        }
    }

    // === allocation ===

    pub fn alloc(&mut self, obj: Obj) -> ObjId {
        self.allocs_since_gc += 1;

        if let Some(id) = self.free_list.pop() {
            self.cells[id.0 as usize] = Cell { obj, mark: false };
            id
        } else {
            let id = ObjId(self.cells.len() as u32);
            self.cells.push(Cell { obj, mark: false });
            id
        }
    }

    fn remember(&mut self, v: Value) -> Value {
        self.temps[self.temp_next] = v;
        self.temp_next = (self.temp_next + 1) % GC_TEMPS;
        v
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        let id = self.alloc(Obj::Pair { car, cdr });
        self.remember(Value::Pair(id))
    }

    pub fn make_string(&mut self, s: impl Into<String>) -> Value {
        let id = self.alloc(Obj::Str(s.into()));
        self.remember(Value::Str(id))
    }

    pub fn make_vector(&mut self, v: Vec<Value>) -> Value {
        let id = self.alloc(Obj::Vector(v));
        self.remember(Value::Vector(id))
    }

    pub fn make_int_vector(&mut self, v: Vec<i64>) -> Value {
        let id = self.alloc(Obj::IntVector(v));
        self.remember(Value::IntVector(id))
    }

    pub fn make_float_vector(&mut self, v: Vec<f64>) -> Value {
        let id = self.alloc(Obj::FloatVector(v));
        self.remember(Value::FloatVector(id))
    }

    pub fn make_hash_table(&mut self) -> Value {
        let id = self.alloc(Obj::HashTable(Vec::new()));
        self.remember(Value::HashTable(id))
    }

    pub fn make_let(&mut self, outlet: Value) -> Value {
        let id = self.alloc(Obj::Let(LetObj {
            slots: Vec::new(),
            outlet,
            open: false,
        }));
        self.remember(Value::Let(id))
    }

    pub fn make_port(&mut self, port: PortObj) -> Value {
        let id = self.alloc(Obj::Port(port));
        self.remember(Value::Port(id))
    }

    pub fn make_closure(&mut self, clo: ClosureObj) -> Value {
        let id = self.alloc(Obj::Closure(clo));
        self.remember(Value::Closure(id))
    }

    pub fn make_builtin(&mut self, b: BuiltinObj) -> Value {
        let id = self.alloc(Obj::Builtin(b));
        self.remember(Value::Builtin(id))
    }

    pub fn make_continuation(&mut self, c: ContObj) -> Value {
        let id = self.alloc(Obj::Continuation(c));
        self.remember(Value::Continuation(id))
    }

    pub fn make_promise(&mut self, p: PromiseObj) -> Value {
        let id = self.alloc(Obj::Promise(p));
        self.remember(Value::Promise(id))
    }

    pub fn make_c_object(&mut self, ctype: usize, data: Box<dyn Any>) -> Value {
        let id = self.alloc(Obj::CObject(CObj { ctype, data }));
        self.remember(Value::CObject(id))
    }

    /// Host access to a foreign object's payload, for downcasting.
    pub fn c_object_data(&self, id: ObjId) -> Option<&dyn Any> {
        match &self.cells[id.0 as usize].obj {
            Obj::CObject(c) => Some(c.data.as_ref()),
            _ => None,
        }
    }

    /// Register a foreign type; the returned tag goes into each instance.
    pub fn make_c_type(&mut self, ctype: CType) -> usize {
        self.ctypes.push(ctype);
        self.ctypes.len() - 1
    }

    pub fn c_type(&self, tag: usize) -> &CType {
        &self.ctypes[tag]
    }

    // === cell access ===

    pub fn obj(&self, id: ObjId) -> &Obj {
        &self.cells[id.0 as usize].obj
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut Obj {
        &mut self.cells[id.0 as usize].obj
    }

    #[inline]
    pub fn car(&self, id: ObjId) -> Value {
        match &self.cells[id.0 as usize].obj {
            Obj::Pair { car, .. } => *car,
            _ => unreachable!("car of non-pair cell"),
        }
    }

    #[inline]
    pub fn cdr(&self, id: ObjId) -> Value {
        match &self.cells[id.0 as usize].obj {
            Obj::Pair { cdr, .. } => *cdr,
            _ => unreachable!("cdr of non-pair cell"),
        }
    }

    #[inline]
    pub fn set_car(&mut self, id: ObjId, val: Value) {
        if let Obj::Pair { car, .. } = &mut self.cells[id.0 as usize].obj {
            *car = val;
        }
    }

    #[inline]
    pub fn set_cdr(&mut self, id: ObjId, val: Value) {
        if let Obj::Pair { cdr, .. } = &mut self.cells[id.0 as usize].obj {
            *cdr = val;
        }
    }

    pub fn string(&self, id: ObjId) -> &str {
        match &self.cells[id.0 as usize].obj {
            Obj::Str(s) => s,
            _ => unreachable!("string cell expected"),
        }
    }

    pub fn string_mut(&mut self, id: ObjId) -> &mut String {
        match &mut self.cells[id.0 as usize].obj {
            Obj::Str(s) => s,
            _ => unreachable!("string cell expected"),
        }
    }

    pub fn vector(&self, id: ObjId) -> &Vec<Value> {
        match &self.cells[id.0 as usize].obj {
            Obj::Vector(v) => v,
            _ => unreachable!("vector cell expected"),
        }
    }

    pub fn vector_mut(&mut self, id: ObjId) -> &mut Vec<Value> {
        match &mut self.cells[id.0 as usize].obj {
            Obj::Vector(v) => v,
            _ => unreachable!("vector cell expected"),
        }
    }

    pub fn let_obj(&self, id: ObjId) -> &LetObj {
        match &self.cells[id.0 as usize].obj {
            Obj::Let(l) => l,
            _ => unreachable!("let cell expected"),
        }
    }

    pub fn let_obj_mut(&mut self, id: ObjId) -> &mut LetObj {
        match &mut self.cells[id.0 as usize].obj {
            Obj::Let(l) => l,
            _ => unreachable!("let cell expected"),
        }
    }

    /// Validity check for host-held handles: the index must be in bounds
    /// and the cell kind must agree with the value's tag. Internal code
    /// never needs this.
    pub fn is_valid(&self, v: Value) -> bool {
        let id = match v.obj_id() {
            Some(id) => id,
            None => return true, // immediates are always valid
        };
        let cell = match self.cells.get(id.0 as usize) {
            Some(c) => c,
            None => return false,
        };
        matches!(
            (&cell.obj, v),
            (Obj::Pair { .. }, Value::Pair(_))
                | (Obj::Str(_), Value::Str(_))
                | (Obj::Vector(_), Value::Vector(_))
                | (Obj::IntVector(_), Value::IntVector(_))
                | (Obj::FloatVector(_), Value::FloatVector(_))
                | (Obj::HashTable(_), Value::HashTable(_))
                | (Obj::Let(_), Value::Let(_))
                | (Obj::Port(_), Value::Port(_))
                | (Obj::Closure(_), Value::Closure(_))
                | (Obj::Builtin(_), Value::Builtin(_))
                | (Obj::Continuation(_), Value::Continuation(_))
                | (Obj::CObject(_), Value::CObject(_))
                | (Obj::Promise(_), Value::Promise(_))
        )
    }

    // === list helpers ===

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> Value {
        let mut result = Value::Nil;
        for &val in values.iter().rev() {
            result = self.cons(val, result);
        }
        result
    }

    /// Returns true if the walk terminates at nil. Cyclic lists return
    /// false via tortoise-and-hare.
    pub fn is_proper_list(&self, val: Value) -> bool {
        let mut slow = val;
        let mut fast = val;
        loop {
            match fast {
                Value::Nil => return true,
                Value::Pair(id) => fast = self.cdr(id),
                _ => return false,
            }
            match fast {
                Value::Nil => return true,
                Value::Pair(id) => fast = self.cdr(id),
                _ => return false,
            }
            if let Value::Pair(id) = slow {
                slow = self.cdr(id);
            }
            if slow.is_eq(fast) {
                return false; // cycle
            }
        }
    }

    /// Collect a proper list into a Vec. None if improper or cyclic.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(result),
                Value::Pair(id) => {
                    result.push(self.car(id));
                    current = self.cdr(id);
                    if result.len() > self.cells.len() + 1 {
                        return None; // cycle
                    }
                }
                _ => return None,
            }
        }
    }

    pub fn list_len(&self, val: Value) -> Option<usize> {
        let mut n = 0;
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(n),
                Value::Pair(id) => {
                    n += 1;
                    current = self.cdr(id);
                    if n > self.cells.len() + 1 {
                        return None;
                    }
                }
                _ => return None,
            }
        }
    }

    // === structural equality ===

    /// The `equal?` predicate: structural and cycle-tolerant. Two values
    /// compare equal once the same cell pair is revisited.
    pub fn structural_equal(&self, a: Value, b: Value) -> bool {
        let mut visited = FxHashSet::default();
        self.equal_inner(a, b, &mut visited)
    }

    fn equal_inner(&self, a: Value, b: Value, visited: &mut FxHashSet<(u32, u32)>) -> bool {
        if a.is_eq(b) {
            return true;
        }
        match (a, b) {
            (Value::Pair(x), Value::Pair(y)) => {
                if !visited.insert((x.0, y.0)) {
                    return true;
                }
                self.equal_inner(self.car(x), self.car(y), visited)
                    && self.equal_inner(self.cdr(x), self.cdr(y), visited)
            }
            (Value::Str(x), Value::Str(y)) => self.string(x) == self.string(y),
            (Value::Vector(x), Value::Vector(y)) => {
                if !visited.insert((x.0, y.0)) {
                    return true;
                }
                if self.vector(x).len() != self.vector(y).len() {
                    return false;
                }
                (0..self.vector(x).len()).all(|i| {
                    let (ea, eb) = (self.vector(x)[i], self.vector(y)[i]);
                    self.equal_inner(ea, eb, visited)
                })
            }
            (Value::IntVector(x), Value::IntVector(y)) => {
                match (&self.cells[x.0 as usize].obj, &self.cells[y.0 as usize].obj) {
                    (Obj::IntVector(va), Obj::IntVector(vb)) => va == vb,
                    _ => false,
                }
            }
            (Value::FloatVector(x), Value::FloatVector(y)) => {
                match (&self.cells[x.0 as usize].obj, &self.cells[y.0 as usize].obj) {
                    (Obj::FloatVector(va), Obj::FloatVector(vb)) => va == vb,
                    _ => false,
                }
            }
            (Value::CObject(x), Value::CObject(y)) => {
                match (&self.cells[x.0 as usize].obj, &self.cells[y.0 as usize].obj) {
                    (Obj::CObject(ca), Obj::CObject(cb)) => {
                        ca.ctype == cb.ctype
                            && match self.ctypes[ca.ctype].equal {
                                Some(eq) => eq(ca.data.as_ref(), cb.data.as_ref()),
                                None => false, // identity already failed
                            }
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    // === protection ===

    /// Register a value as a GC root outside the evaluator's own state.
    /// Returns a slot id for `unprotect_at`; freed slots are reused.
    pub fn protect(&mut self, v: Value) -> usize {
        if let Some(slot) = self.protected_free.pop() {
            self.protected[slot] = v;
            slot
        } else {
            self.protected.push(v);
            self.protected.len() - 1
        }
    }

    pub fn unprotect_at(&mut self, slot: usize) {
        if slot < self.protected.len() {
            self.protected[slot] = Value::Undefined;
            self.protected_free.push(slot);
        }
    }

    pub fn protected_at(&self, slot: usize) -> Value {
        self.protected.get(slot).copied().unwrap_or(Value::Undefined)
    }

    pub fn gc_on(&mut self, on: bool) {
        self.gc_enabled = on;
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    // === statistics / triggering ===

    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Live cells (accurate right after a collection).
    pub fn live_count(&self) -> usize {
        self.cells.len() - self.free_list.len()
    }

    pub fn should_gc(&self) -> bool {
        self.gc_enabled && self.allocs_since_gc >= self.gc_threshold
    }

    pub fn reset_gc_counter(&mut self) {
        self.allocs_since_gc = 0;
    }

    /// Back off when most cells survived the last collection, so a large
    /// stable working set does not thrash the collector.
    pub fn adjust_gc_threshold(&mut self) {
        let total = self.total_cells();
        if total > 0 {
            let occupancy = self.live_count() as f64 / total as f64;
            if occupancy > 0.75 {
                self.gc_threshold = self.gc_threshold.saturating_mul(2);
            }
        }
    }

    // === mark & sweep ===

    pub fn clear_marks(&mut self) {
        for cell in &mut self.cells {
            cell.mark = false;
        }
    }

    /// Mark a value as reachable; heap kinds go on the worklist.
    pub fn mark_value(&mut self, val: Value, worklist: &mut Vec<ObjId>) {
        if let Some(id) = val.obj_id() {
            let cell = &mut self.cells[id.0 as usize];
            if !cell.mark {
                cell.mark = true;
                worklist.push(id);
            }
        }
    }

    /// Mark the roots the heap itself owns: the protection table and the
    /// recency ring.
    pub fn mark_own_roots(&mut self, worklist: &mut Vec<ObjId>) {
        for i in 0..self.protected.len() {
            let v = self.protected[i];
            self.mark_value(v, worklist);
        }
        for i in 0..self.temps.len() {
            let v = self.temps[i];
            self.mark_value(v, worklist);
        }
    }

    /// Drain the worklist, marking every value embedded in each reached
    /// object. The per-cell mark bit makes this cycle-safe.
    pub fn process_worklist(&mut self, worklist: &mut Vec<ObjId>) {
        let mut children: Vec<Value> = Vec::new();
        while let Some(id) = worklist.pop() {
            children.clear();
            {
                let cell = &self.cells[id.0 as usize];
                collect_children(&cell.obj, &self.ctypes, &mut children);
            }
            for i in 0..children.len() {
                let child = children[i];
                self.mark_value(child, worklist);
            }
        }
    }

    /// Reclaim every unmarked cell to the free list. Live cells keep
    /// their index, so surviving handles stay valid.
    pub fn sweep(&mut self) {
        self.free_list.clear();
        for i in 0..self.cells.len() {
            let cell = &mut self.cells[i];
            if !cell.mark {
                // Dropping the payload is the free hook for strings,
                // vectors, and foreign data alike.
                cell.obj = Obj::Free;
                self.free_list.push(ObjId(i as u32));
            }
        }
    }

    #[cfg(test)]
    pub fn clear_temps(&mut self) {
        for t in &mut self.temps {
            *t = Value::Nil;
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Every value embedded in an object, for the mark phase.
fn collect_children(obj: &Obj, ctypes: &[CType], out: &mut Vec<Value>) {
    match obj {
        Obj::Free | Obj::Str(_) | Obj::IntVector(_) | Obj::FloatVector(_) | Obj::Port(_) => {}
        Obj::Pair { car, cdr } => {
            out.push(*car);
            out.push(*cdr);
        }
        Obj::Vector(v) => out.extend_from_slice(v),
        Obj::HashTable(entries) => {
            for (k, v) in entries {
                out.push(*k);
                out.push(*v);
            }
        }
        Obj::Let(l) => {
            out.push(l.outlet);
            for (_, v) in &l.slots {
                out.push(*v);
            }
        }
        Obj::Closure(c) => {
            out.push(c.body);
            out.push(c.env);
            for p in &c.spec.params {
                if let Some(d) = p.default {
                    out.push(d);
                }
            }
        }
        Obj::Builtin(b) => {
            if let BuiltinKind::NativeStar(_, spec) = &b.kind {
                for p in &spec.params {
                    if let Some(d) = p.default {
                        out.push(d);
                    }
                }
            }
        }
        Obj::Continuation(c) => {
            for op in &c.ops {
                op.trace(&mut |v| out.push(v));
            }
            out.extend_from_slice(&c.vals);
            for w in &c.winders {
                out.push(w.before);
                out.push(w.after);
            }
        }
        Obj::CObject(c) => {
            if let Some(mark) = ctypes[c.ctype].mark {
                mark(c.data.as_ref(), &mut |v| out.push(v));
            }
        }
        Obj::Promise(p) => {
            out.push(p.expr);
            out.push(p.env);
            if let Some(v) = p.forced {
                out.push(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(h: &mut Heap) {
        h.clear_marks();
        let mut wl = Vec::new();
        h.mark_own_roots(&mut wl);
        h.process_worklist(&mut wl);
        h.sweep();
    }

    #[test]
    fn alloc_reuses_free_list() {
        let mut h = Heap::new();
        let a = h.cons(Value::Int(1), Value::Nil);
        let id = a.obj_id().unwrap();
        // Nothing roots `a` once the ring is cleared.
        h.clear_temps();
        collect(&mut h);
        assert!(h.free_count() > 0);
        let b = h.cons(Value::Int(2), Value::Nil);
        assert_eq!(b.obj_id(), Some(id));
    }

    #[test]
    fn protected_values_survive() {
        let mut h = Heap::new();
        let a = h.cons(Value::Int(7), Value::Nil);
        let slot = h.protect(a);
        h.clear_temps();
        collect(&mut h);
        let id = a.obj_id().unwrap();
        assert!(matches!(h.obj(id), Obj::Pair { .. }));
        assert_eq!(h.car(id), Value::Int(7));
        h.unprotect_at(slot);
        collect(&mut h);
        assert!(matches!(h.obj(id), Obj::Free));
    }

    #[test]
    fn protection_table_reuses_slots() {
        let mut h = Heap::new();
        let v = h.cons(Value::Int(1), Value::Nil);
        let s0 = h.protect(v);
        h.unprotect_at(s0);
        let s1 = h.protect(v);
        assert_eq!(s0, s1);
        assert!(h.protected_at(s1).is_eq(v));
    }

    #[test]
    fn cyclic_garbage_is_reclaimed() {
        let mut h = Heap::new();
        let a = h.cons(Value::Int(1), Value::Nil);
        let b = h.cons(Value::Int(2), a);
        h.set_cdr(a.obj_id().unwrap(), b);
        h.clear_temps();
        collect(&mut h);
        assert!(matches!(h.obj(a.obj_id().unwrap()), Obj::Free));
        assert!(matches!(h.obj(b.obj_id().unwrap()), Obj::Free));
    }

    #[test]
    fn proper_list_detects_cycles() {
        let mut h = Heap::new();
        let a = h.cons(Value::Int(1), Value::Nil);
        let b = h.cons(Value::Int(2), a);
        h.set_cdr(a.obj_id().unwrap(), b);
        assert!(!h.is_proper_list(b));
        assert!(h.list_to_vec(b).is_none());
    }

    #[test]
    fn equal_tolerates_cycles() {
        let mut h = Heap::new();
        let a = h.cons(Value::Int(1), Value::Nil);
        let b = h.cons(Value::Int(1), Value::Nil);
        h.set_cdr(a.obj_id().unwrap(), a);
        h.set_cdr(b.obj_id().unwrap(), b);
        assert!(h.structural_equal(a, b));
    }

    #[test]
    fn is_valid_checks_tag_agreement() {
        let mut h = Heap::new();
        let p = h.cons(Value::Nil, Value::Nil);
        assert!(h.is_valid(p));
        assert!(h.is_valid(Value::Int(3)));
        let id = p.obj_id().unwrap();
        assert!(!h.is_valid(Value::Str(id)));
        assert!(!h.is_valid(Value::Pair(ObjId(9999))));
    }
}
