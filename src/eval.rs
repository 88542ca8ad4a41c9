use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::env as envs;
use crate::error::{Condition, Error, Result};
use crate::heap::{
    BuiltinKind, BuiltinObj, ClosureKind, ClosureObj, ContObj, CType, Heap, NativeFn, Obj, Param,
    ParamSpec, PortObj, PromiseObj, SpecialOp,
};
use crate::printer;
use crate::reader;
use crate::symbol::{sym, SymbolTable};
use crate::value::{ObjId, SymbolId, Value};

/// Iterations between interrupt-flag polls.
const POLL_INTERVAL: u64 = 128;

/// One pending operation on the evaluator's explicit control stack.
/// Because the whole control state is these two vectors (plus the winder
/// stack), a continuation is just a snapshot of them.
#[derive(Clone)]
pub enum Op {
    /// Evaluate `expr` in `env`; push the result.
    Eval { expr: Value, env: Value },
    /// Operator already evaluated (top of vals); `args` unevaluated.
    Funcall { args: Value, env: Value },
    /// Pop `argc` arguments and the operator below them; dispatch.
    Apply { argc: usize },
    /// Apply a known procedure to already-evaluated arguments.
    ApplyCall { func: Value, args: Vec<Value> },
    Const(Value),
    Drop,
    /// Discard the previous body value, continue with the rest.
    Seq { rest: Value, env: Value },
    Branch { conseq: Value, alt: Option<Value>, env: Value },
    /// `when`/`unless` bodies; `negate` flips the test.
    BranchSeq { body: Value, env: Value, negate: bool },
    /// Pop a value, install it in the frame of `env`, push it back.
    Define { name: SymbolId, env: Value },
    SetBang { name: SymbolId, env: Value },
    /// Pop a value into a local slot (parameter defaults, let inits).
    BindSlot { name: SymbolId, let_id: ObjId },
    /// Pop a macro expansion and evaluate it where the call appeared.
    EvalExpansion { env: Value },
    /// `and`/`or` continuation over the remaining forms.
    ShortCircuit { rest: Value, env: Value, is_and: bool },
    /// Pop a clause test; run the body, chase `=>`, or try the rest.
    CondTest { body: Value, rest: Value, env: Value },
    /// Pop the `=>` receiver, apply it to the saved test value.
    CondArrow { arg: Value },
    /// Catch boundary. A no-op when reached normally; `raise` searches
    /// the op stack for the nearest matching one.
    CatchMark { tag: Value, handler: Value, winders_depth: usize, vals_depth: usize },
    PushWinder { before: Value, after: Value },
    PopWinder,
    /// Memoize the value on top of the stack into a promise.
    ForceSave { id: ObjId },
    /// Overwrite ops/vals/winders from a continuation is done eagerly;
    /// no op needed. Terminal ops below end the run loop.
    Quit,
    Interrupted,
    Uncaught(Condition),
}

impl Op {
    /// Report every heap value this op holds, for the GC mark phase.
    pub fn trace(&self, f: &mut dyn FnMut(Value)) {
        match self {
            Op::Eval { expr, env } => {
                f(*expr);
                f(*env);
            }
            Op::Funcall { args, env } => {
                f(*args);
                f(*env);
            }
            Op::Apply { .. } | Op::Drop | Op::PopWinder | Op::Quit | Op::Interrupted => {}
            Op::ApplyCall { func, args } => {
                f(*func);
                for a in args {
                    f(*a);
                }
            }
            Op::Const(v) => f(*v),
            Op::Seq { rest, env } => {
                f(*rest);
                f(*env);
            }
            Op::Branch { conseq, alt, env } => {
                f(*conseq);
                if let Some(a) = alt {
                    f(*a);
                }
                f(*env);
            }
            Op::BranchSeq { body, env, .. } => {
                f(*body);
                f(*env);
            }
            Op::Define { env, .. } | Op::SetBang { env, .. } | Op::EvalExpansion { env } => f(*env),
            Op::BindSlot { let_id, .. } => f(Value::Let(*let_id)),
            Op::ShortCircuit { rest, env, .. } => {
                f(*rest);
                f(*env);
            }
            Op::CondTest { body, rest, env } => {
                f(*body);
                f(*rest);
                f(*env);
            }
            Op::CondArrow { arg } => f(*arg),
            Op::CatchMark { tag, handler, .. } => {
                f(*tag);
                f(*handler);
            }
            Op::PushWinder { before, after } => {
                f(*before);
                f(*after);
            }
            Op::ForceSave { id } => f(Value::Promise(*id)),
            Op::Uncaught(c) => {
                f(c.tag);
                f(c.info);
            }
        }
    }
}

/// One active dynamic-wind extent. The id orders extents across
/// continuation jumps so the common prefix can be found.
#[derive(Clone)]
pub struct Winder {
    pub id: u64,
    pub before: Value,
    pub after: Value,
}

struct SavedMachine {
    ops: Vec<Op>,
    vals: Vec<Value>,
    winders: Vec<Winder>,
}

/// One interpreter instance. Owns its heap and symbol table; instances
/// share nothing, so a host may run several on separate threads.
pub struct Interp {
    pub heap: Heap,
    pub symbols: SymbolTable,
    rootlet: Value,
    shadow_rootlet: Value,
    curlet: Value,
    ops: Vec<Op>,
    vals: Vec<Value>,
    winders: Vec<Winder>,
    /// Stacks shelved by re-entrant host calls; still GC roots.
    saved: Vec<SavedMachine>,
    next_winder_id: u64,
    interrupt: Arc<AtomicBool>,
    steps: u64,
    trace: bool,
}

impl Interp {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let symbols = SymbolTable::new();
        let rootlet = heap.make_let(Value::Nil);
        let mut interp = Interp {
            heap,
            symbols,
            rootlet,
            shadow_rootlet: rootlet,
            curlet: rootlet,
            ops: Vec::new(),
            vals: Vec::new(),
            winders: Vec::new(),
            saved: Vec::new(),
            next_winder_id: 0,
            interrupt: Arc::new(AtomicBool::new(false)),
            steps: 0,
            trace: std::env::var("SHED_TRACE").is_ok(),
        };
        crate::builtins::install(&mut interp);
        interp
    }

    // === host API: evaluation ===

    /// Read and evaluate every form in `src`, returning the last value.
    pub fn eval_str(&mut self, src: &str) -> Result<Value> {
        let forms = reader::read_all(&mut self.heap, &mut self.symbols, src)?;
        let holder = self.heap.list(&forms);
        let slot = self.heap.protect(holder);
        let mut result = Ok(Value::Unspecified);
        for form in forms {
            result = self.eval(form, self.shadow_rootlet);
            if result.is_err() {
                break;
            }
        }
        self.heap.unprotect_at(slot);
        result
    }

    /// Evaluate one expression in the given environment.
    pub fn eval(&mut self, expr: Value, env: Value) -> Result<Value> {
        self.enter(vec![Op::Eval { expr, env }])
    }

    /// Read and evaluate a file.
    pub fn load(&mut self, path: &str) -> Result<Value> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path, e)))?;
        self.eval_str(&src)
    }

    /// Apply a procedure to arguments from the host.
    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<Value> {
        self.enter(vec![Op::ApplyCall { func, args: args.to_vec() }])
    }

    /// Run `thunk` under a catch boundary, as `(catch tag thunk handler)`.
    pub fn call_with_catch(&mut self, tag: Value, thunk: Value, handler: Value) -> Result<Value> {
        self.enter(vec![
            Op::CatchMark { tag, handler, winders_depth: 0, vals_depth: 0 },
            Op::ApplyCall { func: thunk, args: Vec::new() },
        ])
    }

    /// Run the machine over `start` with the current stacks shelved, so
    /// natives and hosts can re-enter the evaluator.
    fn enter(&mut self, start: Vec<Op>) -> Result<Value> {
        self.saved.push(SavedMachine {
            ops: std::mem::replace(&mut self.ops, start),
            vals: std::mem::take(&mut self.vals),
            winders: std::mem::take(&mut self.winders),
        });
        let result = self.run();
        if let Some(frame) = self.saved.pop() {
            self.ops = frame.ops;
            self.vals = frame.vals;
            self.winders = frame.winders;
        }
        result
    }

    fn run(&mut self) -> Result<Value> {
        loop {
            if self.heap.should_gc() {
                self.gc_now();
            }
            self.steps += 1;
            if self.steps % POLL_INTERVAL == 0 && self.interrupt.swap(false, Ordering::SeqCst) {
                self.unwind_halt(Op::Interrupted);
            }
            let op = match self.ops.pop() {
                Some(op) => op,
                None => break,
            };
            self.step(op)?;
        }
        Ok(self.vals.pop().unwrap_or(Value::Unspecified))
    }

    fn step(&mut self, op: Op) -> Result<()> {
        match op {
            Op::Quit => return Err(Error::Quit),
            Op::Interrupted => return Err(Error::Interrupted),
            Op::Uncaught(c) => {
                let msg = printer::format_condition(&self.heap, &self.symbols, c);
                return Err(Error::Uncaught(msg));
            }
            other => {
                if let Err(c) = self.exec(other) {
                    self.raise(c);
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self, op: Op) -> std::result::Result<(), Condition> {
        match op {
            Op::Eval { expr, env } => {
                if env.is_let() {
                    self.curlet = env;
                }
                self.eval_expr(expr, env)?;
            }
            Op::Funcall { args, env } => self.funcall(args, env)?,
            Op::Apply { argc } => {
                let split = self.vals.len() - argc;
                let args = self.vals.split_off(split);
                let func = self.pop_val();
                self.apply_values(func, args)?;
            }
            Op::ApplyCall { func, args } => self.apply_values(func, args)?,
            Op::Const(v) => self.vals.push(v),
            Op::Drop => {
                self.pop_val();
            }
            Op::Seq { rest, env } => {
                self.pop_val();
                self.push_body(rest, env);
            }
            Op::Branch { conseq, alt, env } => {
                let test = self.pop_val();
                if test.is_true() {
                    self.ops.push(Op::Eval { expr: conseq, env });
                } else {
                    match alt {
                        Some(a) => self.ops.push(Op::Eval { expr: a, env }),
                        None => self.vals.push(Value::Unspecified),
                    }
                }
            }
            Op::BranchSeq { body, env, negate } => {
                let test = self.pop_val();
                if test.is_true() != negate {
                    self.push_body(body, env);
                } else {
                    self.vals.push(Value::Unspecified);
                }
            }
            Op::Define { name, env } => {
                let mut v = self.pop_val();
                if let Value::Closure(id) = v {
                    if let Obj::Closure(c) = self.heap.obj_mut(id) {
                        if c.name.is_none() {
                            c.name = Some(name);
                        }
                    }
                }
                if let Value::Let(id) = env {
                    envs::define(&mut self.heap, id, name, v);
                } else {
                    v = Value::Unspecified;
                }
                self.vals.push(v);
            }
            Op::SetBang { name, env } => {
                let v = self.pop_val();
                if envs::set_existing(&mut self.heap, env, name, v) {
                    self.vals.push(v);
                } else {
                    return Err(self.unbound(name));
                }
            }
            Op::BindSlot { name, let_id } => {
                let v = self.pop_val();
                envs::define(&mut self.heap, let_id, name, v);
            }
            Op::EvalExpansion { env } => {
                let expansion = self.pop_val();
                self.ops.push(Op::Eval { expr: expansion, env });
            }
            Op::ShortCircuit { rest, env, is_and } => {
                let v = self.pop_val();
                let stop = if is_and { !v.is_true() } else { v.is_true() };
                if stop || rest.is_nil() {
                    self.vals.push(v);
                } else if let Value::Pair(id) = rest {
                    let first = self.heap.car(id);
                    let tail = self.heap.cdr(id);
                    self.ops.push(Op::ShortCircuit { rest: tail, env, is_and });
                    self.ops.push(Op::Eval { expr: first, env });
                } else {
                    self.vals.push(v);
                }
            }
            Op::CondTest { body, rest, env } => {
                let test = self.pop_val();
                if test.is_true() {
                    if body.is_nil() {
                        self.vals.push(test);
                    } else if self.is_arrow_body(body) {
                        let recv = match body {
                            Value::Pair(id) => {
                                let tail = self.heap.cdr(id);
                                match tail {
                                    Value::Pair(t) => self.heap.car(t),
                                    _ => Value::Nil,
                                }
                            }
                            _ => Value::Nil,
                        };
                        self.ops.push(Op::CondArrow { arg: test });
                        self.ops.push(Op::Eval { expr: recv, env });
                    } else {
                        self.push_body(body, env);
                    }
                } else {
                    self.push_cond(rest, env)?;
                }
            }
            Op::CondArrow { arg } => {
                let recv = self.pop_val();
                self.apply_values(recv, vec![arg])?;
            }
            Op::CatchMark { .. } => {
                // Reached normally: the thunk's value passes through.
            }
            Op::PushWinder { before, after } => {
                let id = self.next_winder_id;
                self.next_winder_id += 1;
                self.winders.push(Winder { id, before, after });
            }
            Op::PopWinder => {
                self.winders.pop();
            }
            Op::ForceSave { id } => {
                let v = *self.vals.last().unwrap_or(&Value::Unspecified);
                if let Obj::Promise(p) = self.heap.obj_mut(id) {
                    p.forced = Some(v);
                }
            }
            Op::Quit | Op::Interrupted | Op::Uncaught(_) => {
                // Terminal ops are handled in step().
            }
        }
        Ok(())
    }

    #[inline]
    fn pop_val(&mut self) -> Value {
        self.vals.pop().unwrap_or(Value::Unspecified)
    }

    fn is_arrow_body(&self, body: Value) -> bool {
        if let Value::Pair(id) = body {
            if let Value::Symbol(s) = self.heap.car(id) {
                return s == sym::ARROW;
            }
        }
        false
    }

    // === expression evaluation ===

    fn eval_expr(&mut self, expr: Value, env: Value) -> std::result::Result<(), Condition> {
        match expr {
            Value::Symbol(s) => self.eval_symbol(s, env),
            Value::Pair(id) => self.eval_pair(id, env),
            // Everything else self-evaluates, keywords included.
            v => {
                self.vals.push(v);
                Ok(())
            }
        }
    }

    fn eval_symbol(&mut self, s: SymbolId, env: Value) -> std::result::Result<(), Condition> {
        if let Some(v) = envs::lookup(&self.heap, env, s) {
            self.vals.push(v);
            return Ok(());
        }
        // Second global consulted after the primary chain misses.
        if !self.shadow_rootlet.is_eq(self.rootlet) {
            if let Some(v) = envs::lookup(&self.heap, self.shadow_rootlet, s) {
                self.vals.push(v);
                return Ok(());
            }
        }
        // Whole-chain miss: an open frame binding *fallback* gets a shot.
        if let Some((flet, handler)) = envs::find_fallback(&self.heap, env) {
            return self.apply_values(handler, vec![flet, Value::Symbol(s)]);
        }
        Err(self.unbound(s))
    }

    fn eval_pair(&mut self, id: ObjId, env: Value) -> std::result::Result<(), Condition> {
        let head = self.heap.car(id);
        let rest = self.heap.cdr(id);
        if let Value::Symbol(s) = head {
            if is_special_form(s) {
                return self.eval_special(s, rest, env);
            }
        }
        self.ops.push(Op::Funcall { args: rest, env });
        self.ops.push(Op::Eval { expr: head, env });
        Ok(())
    }

    fn eval_special(
        &mut self,
        form: SymbolId,
        rest: Value,
        env: Value,
    ) -> std::result::Result<(), Condition> {
        match form {
            sym::QUOTE => {
                let v = self.nth_form(rest, 0)?;
                self.vals.push(v);
            }
            sym::IF => {
                let test = self.nth_form(rest, 0)?;
                let conseq = self.nth_form(rest, 1)?;
                let alt = self.nth_form_opt(rest, 2);
                self.ops.push(Op::Branch { conseq, alt, env });
                self.ops.push(Op::Eval { expr: test, env });
            }
            sym::DEFINE | sym::DEFINE_STAR => {
                let target = self.nth_form(rest, 0)?;
                match target {
                    Value::Symbol(name) => {
                        if form == sym::DEFINE_STAR {
                            return Err(self.syntax_error("define*: procedure form required"));
                        }
                        let expr = self.nth_form(rest, 1)?;
                        self.ops.push(Op::Define { name, env });
                        self.ops.push(Op::Eval { expr, env });
                    }
                    Value::Pair(tid) => {
                        let name_v = self.heap.car(tid);
                        let params = self.heap.cdr(tid);
                        let Value::Symbol(name) = name_v else {
                            return Err(self.syntax_error("define: bad procedure name"));
                        };
                        let body = self.cdr_of(rest);
                        let kind = if form == sym::DEFINE_STAR {
                            ClosureKind::FunctionStar
                        } else {
                            ClosureKind::Function
                        };
                        let clo = self.make_closure(kind, params, body, env, Some(name))?;
                        if let Value::Let(lid) = env {
                            envs::define(&mut self.heap, lid, name, clo);
                        }
                        self.vals.push(clo);
                    }
                    _ => return Err(self.syntax_error("define: bad target")),
                }
            }
            sym::SET => {
                let Value::Symbol(name) = self.nth_form(rest, 0)? else {
                    return Err(self.syntax_error("set!: variable required"));
                };
                let expr = self.nth_form(rest, 1)?;
                self.ops.push(Op::SetBang { name, env });
                self.ops.push(Op::Eval { expr, env });
            }
            sym::LAMBDA | sym::LAMBDA_STAR => {
                let params = self.nth_form(rest, 0)?;
                let body = self.cdr_of(rest);
                let kind = if form == sym::LAMBDA_STAR {
                    ClosureKind::FunctionStar
                } else {
                    ClosureKind::Function
                };
                let clo = self.make_closure(kind, params, body, env, None)?;
                self.vals.push(clo);
            }
            sym::LET => self.eval_let(rest, env)?,
            sym::LET_STAR | sym::LETREC => {
                let bindings = self.nth_form(rest, 0)?;
                let body = self.cdr_of(rest);
                let frame = self.heap.make_let(env);
                let Value::Let(frame_id) = frame else { unreachable!() };
                let pairs = self.binding_pairs(bindings)?;
                if form == sym::LETREC {
                    for &(name, _) in &pairs {
                        envs::define(&mut self.heap, frame_id, name, Value::Undefined);
                    }
                }
                self.push_body(body, frame);
                // Inits run in the new frame, left to right.
                for &(name, init) in pairs.iter().rev() {
                    self.ops.push(Op::BindSlot { name, let_id: frame_id });
                    self.ops.push(Op::Eval { expr: init, env: frame });
                }
            }
            sym::BEGIN => self.push_body(rest, env),
            sym::AND | sym::OR => {
                let is_and = form == sym::AND;
                match rest {
                    Value::Nil => self.vals.push(Value::Bool(is_and)),
                    Value::Pair(rid) => {
                        let first = self.heap.car(rid);
                        let tail = self.heap.cdr(rid);
                        self.ops.push(Op::ShortCircuit { rest: tail, env, is_and });
                        self.ops.push(Op::Eval { expr: first, env });
                    }
                    _ => return Err(self.syntax_error("and/or: bad form")),
                }
            }
            sym::COND => self.push_cond(rest, env)?,
            sym::WHEN | sym::UNLESS => {
                let test = self.nth_form(rest, 0)?;
                let body = self.cdr_of(rest);
                self.ops.push(Op::BranchSeq { body, env, negate: form == sym::UNLESS });
                self.ops.push(Op::Eval { expr: test, env });
            }
            sym::DEFINE_MACRO | sym::DEFINE_MACRO_STAR => {
                let target = self.nth_form(rest, 0)?;
                let Value::Pair(tid) = target else {
                    return Err(self.syntax_error("define-macro: procedure form required"));
                };
                let Value::Symbol(name) = self.heap.car(tid) else {
                    return Err(self.syntax_error("define-macro: bad name"));
                };
                let params = self.heap.cdr(tid);
                let body = self.cdr_of(rest);
                let kind = if form == sym::DEFINE_MACRO_STAR {
                    ClosureKind::MacroStar
                } else {
                    ClosureKind::Macro
                };
                let clo = self.make_closure(kind, params, body, env, Some(name))?;
                if let Value::Let(lid) = env {
                    envs::define(&mut self.heap, lid, name, clo);
                }
                self.vals.push(clo);
            }
            sym::QUASIQUOTE => {
                let template = self.nth_form(rest, 0)?;
                let expanded = self.qq_expand(template, 1)?;
                self.ops.push(Op::Eval { expr: expanded, env });
            }
            sym::UNQUOTE | sym::UNQUOTE_SPLICING => {
                return Err(self.syntax_error("unquote outside quasiquote"));
            }
            sym::DELAY => {
                let expr = self.nth_form(rest, 0)?;
                let v = self.heap.make_promise(PromiseObj { expr, env, forced: None });
                self.vals.push(v);
            }
            _ => unreachable!("unhandled special form"),
        }
        Ok(())
    }

    fn eval_let(&mut self, rest: Value, env: Value) -> std::result::Result<(), Condition> {
        let first = self.nth_form(rest, 0)?;
        if let Value::Symbol(loop_name) = first {
            // Named let: a self-referential closure applied to the inits.
            let bindings = self.nth_form(rest, 1)?;
            let body = self.cdr_of(self.cdr_of(rest));
            let pairs = self.binding_pairs(bindings)?;
            let loop_frame = self.heap.make_let(env);
            let Value::Let(loop_id) = loop_frame else { unreachable!() };
            let spec = ParamSpec {
                params: pairs.iter().map(|&(n, _)| Param { name: n, default: None }).collect(),
                rest: None,
                required: pairs.len(),
            };
            let clo = self.heap.make_closure(ClosureObj {
                kind: ClosureKind::Function,
                spec,
                body,
                env: loop_frame,
                name: Some(loop_name),
            });
            envs::define(&mut self.heap, loop_id, loop_name, clo);
            self.vals.push(clo);
            self.ops.push(Op::Apply { argc: pairs.len() });
            for &(_, init) in pairs.iter().rev() {
                self.ops.push(Op::Eval { expr: init, env });
            }
        } else {
            let body = self.cdr_of(rest);
            let pairs = self.binding_pairs(first)?;
            let frame = self.heap.make_let(env);
            let Value::Let(frame_id) = frame else { unreachable!() };
            self.push_body(body, frame);
            // Inits are evaluated in the enclosing environment.
            for &(name, init) in pairs.iter().rev() {
                self.ops.push(Op::BindSlot { name, let_id: frame_id });
                self.ops.push(Op::Eval { expr: init, env });
            }
        }
        Ok(())
    }

    fn binding_pairs(
        &mut self,
        bindings: Value,
    ) -> std::result::Result<Vec<(SymbolId, Value)>, Condition> {
        let items = self
            .heap
            .list_to_vec(bindings)
            .ok_or_else(|| self.syntax_error("let: bad binding list"))?;
        let mut pairs = Vec::with_capacity(items.len());
        for item in items {
            let Value::Pair(pid) = item else {
                return Err(self.syntax_error("let: binding must be (name value)"));
            };
            let Value::Symbol(name) = self.heap.car(pid) else {
                return Err(self.syntax_error("let: binding name must be a symbol"));
            };
            let init = match self.heap.cdr(pid) {
                Value::Pair(vid) => self.heap.car(vid),
                _ => Value::Unspecified,
            };
            pairs.push((name, init));
        }
        Ok(pairs)
    }

    fn push_cond(&mut self, clauses: Value, env: Value) -> std::result::Result<(), Condition> {
        match clauses {
            Value::Nil => {
                self.vals.push(Value::Unspecified);
                Ok(())
            }
            Value::Pair(cid) => {
                let clause = self.heap.car(cid);
                let rest = self.heap.cdr(cid);
                let Value::Pair(pid) = clause else {
                    return Err(self.syntax_error("cond: bad clause"));
                };
                let test = self.heap.car(pid);
                let body = self.heap.cdr(pid);
                if let Value::Symbol(s) = test {
                    if s == sym::ELSE {
                        self.push_body(body, env);
                        return Ok(());
                    }
                }
                self.ops.push(Op::CondTest { body, rest, env });
                self.ops.push(Op::Eval { expr: test, env });
                Ok(())
            }
            _ => Err(self.syntax_error("cond: bad clause list")),
        }
    }

    /// Schedule a body (list of expressions); the last is in tail
    /// position, so loops written with tail calls run in constant space.
    fn push_body(&mut self, body: Value, env: Value) {
        match body {
            Value::Nil => self.vals.push(Value::Unspecified),
            Value::Pair(id) => {
                let first = self.heap.car(id);
                let rest = self.heap.cdr(id);
                if !rest.is_nil() {
                    self.ops.push(Op::Seq { rest, env });
                }
                self.ops.push(Op::Eval { expr: first, env });
            }
            other => self.ops.push(Op::Eval { expr: other, env }),
        }
    }

    // === quasiquote expansion ===

    /// Rewrite a quasiquote template into cons/append code, which then
    /// evaluates normally.
    fn qq_expand(&mut self, template: Value, depth: u32) -> std::result::Result<Value, Condition> {
        match template {
            Value::Pair(id) => {
                let head = self.heap.car(id);
                let tail = self.heap.cdr(id);
                if let Value::Symbol(s) = head {
                    if s == sym::UNQUOTE {
                        let inner = match tail {
                            Value::Pair(t) => self.heap.car(t),
                            _ => return Err(self.syntax_error("unquote: bad form")),
                        };
                        if depth == 1 {
                            return Ok(inner);
                        }
                        let sub = self.qq_expand(inner, depth - 1)?;
                        let tag = self.quoted(sym::UNQUOTE);
                        return Ok(self.build_call2(sym::LIST, tag, sub));
                    }
                    if s == sym::QUASIQUOTE {
                        let inner = match tail {
                            Value::Pair(t) => self.heap.car(t),
                            _ => return Err(self.syntax_error("quasiquote: bad form")),
                        };
                        let sub = self.qq_expand(inner, depth + 1)?;
                        let tag = self.quoted(sym::QUASIQUOTE);
                        return Ok(self.build_call2(sym::LIST, tag, sub));
                    }
                }
                // (unquote-splicing x) in head position splices.
                if depth == 1 {
                    if let Value::Pair(hid) = head {
                        if let Value::Symbol(hs) = self.heap.car(hid) {
                            if hs == sym::UNQUOTE_SPLICING {
                                let spliced = match self.heap.cdr(hid) {
                                    Value::Pair(t) => self.heap.car(t),
                                    _ => {
                                        return Err(
                                            self.syntax_error("unquote-splicing: bad form")
                                        )
                                    }
                                };
                                let rest_code = self.qq_expand(tail, depth)?;
                                return Ok(self.build_call2(sym::APPEND, spliced, rest_code));
                            }
                        }
                    }
                }
                let head_code = self.qq_expand(head, depth)?;
                let tail_code = self.qq_expand(tail, depth)?;
                Ok(self.build_call2(sym::CONS, head_code, tail_code))
            }
            // Atoms (symbols included) are quoted.
            v => {
                let q = Value::Symbol(sym::QUOTE);
                let inner = self.heap.cons(v, Value::Nil);
                Ok(self.heap.cons(q, inner))
            }
        }
    }

    fn quoted(&mut self, s: SymbolId) -> Value {
        let inner = self.heap.cons(Value::Symbol(s), Value::Nil);
        self.heap.cons(Value::Symbol(sym::QUOTE), inner)
    }

    fn build_call2(&mut self, op: SymbolId, a: Value, b: Value) -> Value {
        let tail = self.heap.cons(b, Value::Nil);
        let mid = self.heap.cons(a, tail);
        self.heap.cons(Value::Symbol(op), mid)
    }

    // === application ===

    fn funcall(&mut self, args: Value, env: Value) -> std::result::Result<(), Condition> {
        let func = self.pop_val();
        // Macros receive the unevaluated forms; the expansion is then
        // evaluated where the call appeared.
        if let Value::Closure(id) = func {
            let kind = match self.heap.obj(id) {
                Obj::Closure(c) => c.kind,
                _ => unreachable!(),
            };
            if kind == ClosureKind::Macro || kind == ClosureKind::MacroStar {
                let forms = self
                    .heap
                    .list_to_vec(args)
                    .ok_or_else(|| self.syntax_error("macro call: improper argument list"))?;
                self.ops.push(Op::EvalExpansion { env });
                return self.apply_closure(id, forms);
            }
        }
        let forms = self
            .heap
            .list_to_vec(args)
            .ok_or_else(|| self.syntax_error("call: improper argument list"))?;
        self.vals.push(func);
        self.ops.push(Op::Apply { argc: forms.len() });
        for &form in forms.iter().rev() {
            self.ops.push(Op::Eval { expr: form, env });
        }
        Ok(())
    }

    /// Dispatch an application over evaluated arguments.
    pub fn apply_values(
        &mut self,
        func: Value,
        args: Vec<Value>,
    ) -> std::result::Result<(), Condition> {
        if self.trace {
            eprintln!(
                "[shed] apply {} <- {} args",
                printer::write_value(&self.heap, &self.symbols, func),
                args.len()
            );
        }
        match func {
            Value::Closure(id) => self.apply_closure(id, args),
            Value::Builtin(id) => self.apply_builtin(id, args),
            Value::Continuation(id) => {
                self.invoke_continuation(id, args);
                Ok(())
            }
            Value::Let(_) => {
                // Applicable let: (env 'sym)
                if args.len() != 1 {
                    return Err(self.arg_count_error("let application", args.len()));
                }
                let Value::Symbol(s) = args[0] else {
                    return Err(self.type_error("let application", args[0], "a symbol"));
                };
                self.eval_symbol(s, func)
            }
            Value::Vector(id) => {
                let idx = self.index_arg("vector application", &args)?;
                let v = self.heap.vector(id).get(idx).copied();
                match v {
                    Some(v) => {
                        self.vals.push(v);
                        Ok(())
                    }
                    None => Err(self.range_error("vector application", args[0])),
                }
            }
            Value::Str(id) => {
                let idx = self.index_arg("string application", &args)?;
                match self.heap.string(id).chars().nth(idx) {
                    Some(c) => {
                        self.vals.push(Value::Char(c));
                        Ok(())
                    }
                    None => Err(self.range_error("string application", args[0])),
                }
            }
            Value::HashTable(id) => {
                if args.len() != 1 {
                    return Err(self.arg_count_error("hash-table application", args.len()));
                }
                let v = self.hash_lookup(id, args[0]);
                self.vals.push(v);
                Ok(())
            }
            Value::CObject(id) => {
                let ctype = match self.heap.obj(id) {
                    Obj::CObject(c) => c.ctype,
                    _ => unreachable!(),
                };
                match self.heap.c_type(ctype).object_ref {
                    Some(f) => {
                        let mut argv = vec![func];
                        argv.extend_from_slice(&args);
                        let r = f(self, &argv)?;
                        self.vals.push(r);
                        Ok(())
                    }
                    None => Err(self.type_error("apply", func, "an applicable object")),
                }
            }
            other => Err(self.type_error("apply", other, "a procedure")),
        }
    }

    pub fn hash_lookup(&self, id: ObjId, key: Value) -> Value {
        if let Obj::HashTable(entries) = self.heap.obj(id) {
            for &(k, v) in entries {
                if self.heap.structural_equal(k, key) {
                    return v;
                }
            }
        }
        Value::Bool(false)
    }

    fn index_arg(&mut self, who: &str, args: &[Value]) -> std::result::Result<usize, Condition> {
        if args.len() != 1 {
            return Err(self.arg_count_error(who, args.len()));
        }
        match args[0] {
            Value::Int(i) if i >= 0 => Ok(i as usize),
            v => Err(self.type_error(who, v, "a non-negative integer")),
        }
    }

    fn apply_closure(
        &mut self,
        id: ObjId,
        args: Vec<Value>,
    ) -> std::result::Result<(), Condition> {
        let (kind, spec, body, cenv, name) = match self.heap.obj(id) {
            Obj::Closure(c) => (c.kind, c.spec.clone(), c.body, c.env, c.name),
            _ => unreachable!(),
        };
        let frame = self.heap.make_let(cenv);
        let Value::Let(frame_id) = frame else { unreachable!() };
        self.push_body(body, frame);
        match kind {
            ClosureKind::Function | ClosureKind::Macro => {
                self.bind_plain(frame_id, frame, &spec, &args, name)
            }
            ClosureKind::FunctionStar | ClosureKind::MacroStar => {
                self.bind_star(frame_id, frame, &spec, &args, name)
            }
        }
    }

    fn bind_plain(
        &mut self,
        frame_id: ObjId,
        frame: Value,
        spec: &ParamSpec,
        args: &[Value],
        name: Option<SymbolId>,
    ) -> std::result::Result<(), Condition> {
        let n = args.len();
        if n < spec.required || (n > spec.params.len() && spec.rest.is_none()) {
            return Err(self.closure_arity_error(name, n));
        }
        let mut deferred: Vec<(SymbolId, Value)> = Vec::new();
        for (i, p) in spec.params.iter().enumerate() {
            if i < n {
                envs::define(&mut self.heap, frame_id, p.name, args[i]);
            } else {
                match p.default {
                    Some(d) => deferred.push((p.name, d)),
                    None => return Err(self.closure_arity_error(name, n)),
                }
            }
        }
        if let Some(r) = spec.rest {
            let extra = &args[spec.params.len().min(n)..];
            let rest_list = self.heap.list(extra);
            envs::define(&mut self.heap, frame_id, r, rest_list);
        }
        // Defaults are evaluated in the new frame, left to right, so a
        // later default may refer to an earlier parameter.
        for &(pname, d) in deferred.iter().rev() {
            self.ops.push(Op::BindSlot { name: pname, let_id: frame_id });
            self.ops.push(Op::Eval { expr: d, env: frame });
        }
        Ok(())
    }

    fn bind_star(
        &mut self,
        frame_id: ObjId,
        frame: Value,
        spec: &ParamSpec,
        args: &[Value],
        name: Option<SymbolId>,
    ) -> std::result::Result<(), Condition> {
        let slots = self.resolve_star_args(spec, args, name)?;
        let mut deferred: Vec<(SymbolId, Value)> = Vec::new();
        for (p, slot) in spec.params.iter().zip(slots.filled.iter()) {
            match slot {
                Some(v) => envs::define(&mut self.heap, frame_id, p.name, *v),
                None => match p.default {
                    Some(d) => deferred.push((p.name, d)),
                    None => envs::define(&mut self.heap, frame_id, p.name, Value::Bool(false)),
                },
            }
        }
        if let Some(r) = spec.rest {
            let rest_list = self.heap.list(&slots.rest);
            envs::define(&mut self.heap, frame_id, r, rest_list);
        }
        for &(pname, d) in deferred.iter().rev() {
            self.ops.push(Op::BindSlot { name: pname, let_id: frame_id });
            self.ops.push(Op::Eval { expr: d, env: frame });
        }
        Ok(())
    }

    /// Keyword/positional resolution shared by star closures and star
    /// builtins: keywords address parameters by name, positionals fill
    /// the remaining slots left to right.
    fn resolve_star_args(
        &mut self,
        spec: &ParamSpec,
        args: &[Value],
        name: Option<SymbolId>,
    ) -> std::result::Result<StarArgs, Condition> {
        let mut filled: Vec<Option<Value>> = vec![None; spec.params.len()];
        let mut rest: Vec<Value> = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                Value::Keyword(k) => {
                    let Some(pi) = spec.params.iter().position(|p| p.name == k) else {
                        return Err(self.closure_arity_error(name, args.len()));
                    };
                    i += 1;
                    if i >= args.len() || filled[pi].is_some() {
                        return Err(self.closure_arity_error(name, args.len()));
                    }
                    filled[pi] = Some(args[i]);
                    i += 1;
                }
                v => {
                    if let Some(pi) = filled.iter().position(Option::is_none) {
                        filled[pi] = Some(v);
                    } else if spec.rest.is_some() {
                        rest.push(v);
                    } else {
                        return Err(self.closure_arity_error(name, args.len()));
                    }
                    i += 1;
                }
            }
        }
        Ok(StarArgs { filled, rest })
    }

    fn apply_builtin(
        &mut self,
        id: ObjId,
        args: Vec<Value>,
    ) -> std::result::Result<(), Condition> {
        enum Kind {
            Native(NativeFn),
            NativeStar(NativeFn, ParamSpec),
            Special(SpecialOp),
        }
        let (required, optional, has_rest, kind) = match self.heap.obj(id) {
            Obj::Builtin(b) => (
                b.required,
                b.optional,
                b.rest,
                match &b.kind {
                    BuiltinKind::Native(f) => Kind::Native(*f),
                    BuiltinKind::NativeStar(f, spec) => Kind::NativeStar(*f, spec.clone()),
                    BuiltinKind::Special(op) => Kind::Special(*op),
                },
            ),
            _ => unreachable!(),
        };
        let n = args.len();
        // Star builtins count arguments only after keyword resolution;
        // resolve_star_args enforces their arity.
        let star = matches!(&kind, Kind::NativeStar(..));
        if !star && (n < required || (!has_rest && n > required + optional)) {
            let bname = match self.heap.obj(id) {
                Obj::Builtin(b) => b.name.clone(),
                _ => unreachable!(),
            };
            return Err(self.arg_count_error(&bname, n));
        }
        match kind {
            Kind::Native(f) => {
                let r = f(self, &args)?;
                self.vals.push(r);
                Ok(())
            }
            Kind::NativeStar(f, spec) => {
                let bname = match self.heap.obj(id) {
                    Obj::Builtin(b) => b.name.clone(),
                    _ => unreachable!(),
                };
                let name = self.symbols.intern(&bname);
                let slots = self.resolve_star_args(&spec, &args, Some(name))?;
                let mut argv: Vec<Value> = spec
                    .params
                    .iter()
                    .zip(slots.filled.iter())
                    .map(|(p, s)| s.or(p.default).unwrap_or(Value::Bool(false)))
                    .collect();
                if spec.rest.is_some() {
                    let rest_list = self.heap.list(&slots.rest);
                    argv.push(rest_list);
                }
                let r = f(self, &argv)?;
                self.vals.push(r);
                Ok(())
            }
            Kind::Special(op) => self.apply_special(op, args),
        }
    }

    fn apply_special(
        &mut self,
        op: SpecialOp,
        args: Vec<Value>,
    ) -> std::result::Result<(), Condition> {
        match op {
            SpecialOp::Catch => {
                let (tag, thunk, handler) = (args[0], args[1], args[2]);
                self.ops.push(Op::CatchMark {
                    tag,
                    handler,
                    winders_depth: self.winders.len(),
                    vals_depth: self.vals.len(),
                });
                self.apply_values(thunk, Vec::new())
            }
            SpecialOp::DynamicWind => {
                let (before, thunk, after) = (args[0], args[1], args[2]);
                // Executes: before, push winder, thunk, pop winder, after.
                self.ops.push(Op::Drop);
                self.ops.push(Op::ApplyCall { func: after, args: Vec::new() });
                self.ops.push(Op::PopWinder);
                self.ops.push(Op::ApplyCall { func: thunk, args: Vec::new() });
                self.ops.push(Op::PushWinder { before, after });
                self.ops.push(Op::Drop);
                self.ops.push(Op::ApplyCall { func: before, args: Vec::new() });
                Ok(())
            }
            SpecialOp::CallCc => {
                let proc = args[0];
                // The remaining ops/vals are exactly the continuation of
                // this call, expecting one value.
                let k = self.heap.make_continuation(ContObj {
                    ops: self.ops.clone(),
                    vals: self.vals.clone(),
                    winders: self.winders.clone(),
                });
                self.apply_values(proc, vec![k])
            }
            SpecialOp::Apply => {
                if args.is_empty() {
                    return Err(self.arg_count_error("apply", 0));
                }
                let func = args[0];
                let mut flat: Vec<Value> = Vec::new();
                if args.len() > 1 {
                    flat.extend_from_slice(&args[1..args.len() - 1]);
                    let last = args[args.len() - 1];
                    let tail = self
                        .heap
                        .list_to_vec(last)
                        .ok_or_else(|| self.type_error("apply", last, "a proper list"))?;
                    flat.extend(tail);
                }
                self.apply_values(func, flat)
            }
            SpecialOp::Eval => {
                let expr = args[0];
                let env = if args.len() > 1 { args[1] } else { self.curlet };
                if !env.is_let() {
                    return Err(self.type_error("eval", env, "a let"));
                }
                self.ops.push(Op::Eval { expr, env });
                Ok(())
            }
            SpecialOp::Force => {
                let v = args[0];
                if let Value::Promise(id) = v {
                    let (forced, expr, env) = match self.heap.obj(id) {
                        Obj::Promise(p) => (p.forced, p.expr, p.env),
                        _ => unreachable!(),
                    };
                    match forced {
                        Some(cached) => self.vals.push(cached),
                        None => {
                            self.ops.push(Op::ForceSave { id });
                            self.ops.push(Op::Eval { expr, env });
                        }
                    }
                } else {
                    self.vals.push(v);
                }
                Ok(())
            }
            SpecialOp::Quit => {
                self.unwind_halt(Op::Quit);
                Ok(())
            }
        }
    }

    // === continuations and unwinding ===

    fn invoke_continuation(&mut self, id: ObjId, args: Vec<Value>) {
        let (c_ops, c_vals, c_winders) = match self.heap.obj(id) {
            Obj::Continuation(c) => (c.ops.clone(), c.vals.clone(), c.winders.clone()),
            _ => unreachable!(),
        };
        let v = args.first().copied().unwrap_or(Value::Unspecified);
        // Extents shared by both winder stacks stay active; the rest are
        // left (afters, innermost first) or entered (befores, outermost
        // first).
        let mut p = 0;
        while p < self.winders.len()
            && p < c_winders.len()
            && self.winders[p].id == c_winders[p].id
        {
            p += 1;
        }
        let mut procs: Vec<Value> = self.winders[p..].iter().rev().map(|w| w.after).collect();
        procs.extend(c_winders[p..].iter().map(|w| w.before));
        self.ops = c_ops;
        self.vals = c_vals;
        self.winders = c_winders;
        self.ops.push(Op::Const(v));
        for &proc in procs.iter().rev() {
            self.ops.push(Op::Drop);
            self.ops.push(Op::ApplyCall { func: proc, args: Vec::new() });
        }
    }

    /// Raise a condition: unwind to the nearest matching catch, running
    /// the dynamic-wind afters of every extent being left, then call the
    /// handler with (tag info). No match: run all afters, return to the
    /// host, leave the instance usable.
    pub fn raise(&mut self, cond: Condition) {
        let mut found: Option<usize> = None;
        for (i, op) in self.ops.iter().enumerate().rev() {
            if let Op::CatchMark { tag, .. } = op {
                if tag.is_eq(Value::Bool(true)) || tag.is_eq(cond.tag) {
                    found = Some(i);
                    break;
                }
            }
        }
        match found {
            Some(i) => {
                let (handler, wd, vd) = match &self.ops[i] {
                    Op::CatchMark { handler, winders_depth, vals_depth, .. } => {
                        (*handler, *winders_depth, *vals_depth)
                    }
                    _ => unreachable!(),
                };
                self.ops.truncate(i);
                self.vals.truncate(vd);
                let afters: Vec<Value> = self.winders.drain(wd..).map(|w| w.after).collect();
                self.ops.push(Op::ApplyCall { func: handler, args: vec![cond.tag, cond.info] });
                // Drained outermost-first; pushing in that order runs the
                // innermost after first.
                for after in afters {
                    self.ops.push(Op::Drop);
                    self.ops.push(Op::ApplyCall { func: after, args: Vec::new() });
                }
            }
            None => {
                self.ops.clear();
                self.vals.clear();
                let afters: Vec<Value> = self.winders.drain(..).map(|w| w.after).collect();
                self.ops.push(Op::Uncaught(cond));
                for after in afters {
                    self.ops.push(Op::Drop);
                    self.ops.push(Op::ApplyCall { func: after, args: Vec::new() });
                }
            }
        }
    }

    /// Unwind everything (quit/interrupt): pending afters still run.
    fn unwind_halt(&mut self, terminal: Op) {
        self.ops.clear();
        self.vals.clear();
        let afters: Vec<Value> = self.winders.drain(..).map(|w| w.after).collect();
        self.ops.push(terminal);
        for after in afters {
            self.ops.push(Op::Drop);
            self.ops.push(Op::ApplyCall { func: after, args: Vec::new() });
        }
    }

    // === GC ===

    /// Run a full collection now. Roots: the let registers, both stacks,
    /// winders, shelved machines, plus the heap's own tables.
    pub fn gc_now(&mut self) {
        let mut roots: Vec<Value> = vec![self.rootlet, self.shadow_rootlet, self.curlet];
        for op in &self.ops {
            op.trace(&mut |v| roots.push(v));
        }
        roots.extend_from_slice(&self.vals);
        for w in &self.winders {
            roots.push(w.before);
            roots.push(w.after);
        }
        for frame in &self.saved {
            for op in &frame.ops {
                op.trace(&mut |v| roots.push(v));
            }
            roots.extend_from_slice(&frame.vals);
            for w in &frame.winders {
                roots.push(w.before);
                roots.push(w.after);
            }
        }
        self.heap.clear_marks();
        let mut worklist = Vec::new();
        for root in roots {
            self.heap.mark_value(root, &mut worklist);
        }
        self.heap.mark_own_roots(&mut worklist);
        self.heap.process_worklist(&mut worklist);
        self.heap.sweep();
        self.heap.reset_gc_counter();
        self.heap.adjust_gc_threshold();
    }

    // === host API: protection, environments, registration ===

    pub fn gc_protect(&mut self, v: Value) -> usize {
        self.heap.protect(v)
    }

    pub fn gc_unprotect_at(&mut self, slot: usize) {
        self.heap.unprotect_at(slot);
    }

    pub fn gc_protected_at(&self, slot: usize) -> Value {
        self.heap.protected_at(slot)
    }

    pub fn gc_on(&mut self, on: bool) {
        self.heap.gc_on(on);
    }

    pub fn rootlet(&self) -> Value {
        self.rootlet
    }

    pub fn curlet(&self) -> Value {
        self.curlet
    }

    pub fn shadow_rootlet(&self) -> Value {
        self.shadow_rootlet
    }

    /// Redirect where top-level evaluation happens (sandboxing), and
    /// install the frame as a global-lookup fallback consulted after the
    /// rootlet chain misses. The frame must chain to the rootlet for
    /// builtins to stay visible.
    pub fn set_shadow_rootlet(&mut self, env: Value) {
        if env.is_let() {
            self.shadow_rootlet = env;
        }
    }

    pub fn sublet(&mut self, env: Value, bindings: &[(SymbolId, Value)]) -> Value {
        envs::sublet(&mut self.heap, env, bindings)
    }

    /// A fresh frame directly over the rootlet.
    pub fn inlet(&mut self, bindings: &[(SymbolId, Value)]) -> Value {
        envs::sublet(&mut self.heap, self.rootlet, bindings)
    }

    pub fn varlet(&mut self, env: Value, name: SymbolId, value: Value) -> bool {
        if let Value::Let(id) = env {
            envs::define(&mut self.heap, id, name, value);
            true
        } else {
            false
        }
    }

    pub fn let_ref(&self, env: Value, name: SymbolId) -> Option<Value> {
        envs::lookup(&self.heap, env, name)
    }

    pub fn let_set(&mut self, env: Value, name: SymbolId, value: Value) -> bool {
        envs::set_existing(&mut self.heap, env, name, value)
    }

    pub fn openlet(&mut self, env: Value) -> bool {
        if let Value::Let(id) = env {
            envs::openlet(&mut self.heap, id);
            true
        } else {
            false
        }
    }

    /// A handle the host can flip from another thread to stop a runaway
    /// evaluation; pending dynamic-wind afters still run.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Register a native function under `name` in the rootlet.
    pub fn define_function(
        &mut self,
        name: &str,
        f: NativeFn,
        required: usize,
        optional: usize,
        rest: bool,
        doc: &str,
    ) -> Value {
        let b = self.heap.make_builtin(BuiltinObj {
            name: name.to_string(),
            doc: doc.to_string(),
            required,
            optional,
            rest,
            kind: BuiltinKind::Native(f),
        });
        let sym_id = self.symbols.intern(name);
        let Value::Let(root_id) = self.rootlet else { unreachable!() };
        envs::define(&mut self.heap, root_id, sym_id, b);
        b
    }

    /// Register a keyword-argument native. The parameter string uses the
    /// declaration syntax of `define*`: `"a (b 32) :rest r"`.
    pub fn define_function_star(
        &mut self,
        name: &str,
        f: NativeFn,
        params: &str,
        doc: &str,
    ) -> Result<Value> {
        let wrapped = format!("({})", params);
        let forms = reader::read_all(&mut self.heap, &mut self.symbols, &wrapped)?;
        let list = forms.first().copied().unwrap_or(Value::Nil);
        let spec = self
            .parse_params(list, true)
            .map_err(|c| Error::Uncaught(printer::format_condition(&self.heap, &self.symbols, c)))?;
        let b = self.heap.make_builtin(BuiltinObj {
            name: name.to_string(),
            doc: doc.to_string(),
            required: 0,
            optional: spec.params.len(),
            rest: spec.rest.is_some(),
            kind: BuiltinKind::NativeStar(f, spec),
        });
        let sym_id = self.symbols.intern(name);
        let Value::Let(root_id) = self.rootlet else { unreachable!() };
        envs::define(&mut self.heap, root_id, sym_id, b);
        Ok(b)
    }

    pub fn define_variable(&mut self, name: &str, value: Value) {
        let sym_id = self.symbols.intern(name);
        let Value::Let(root_id) = self.rootlet else { unreachable!() };
        envs::define(&mut self.heap, root_id, sym_id, value);
    }

    pub fn make_c_type(&mut self, ctype: CType) -> usize {
        self.heap.make_c_type(ctype)
    }

    pub fn make_c_object(&mut self, ctype: usize, data: Box<dyn std::any::Any>) -> Value {
        self.heap.make_c_object(ctype, data)
    }

    /// Build a condition the way scheme `(error tag fmt args...)` does.
    pub fn error(&mut self, tag: Value, info: Value) -> Condition {
        Condition::new(tag, info)
    }

    // === host conveniences ===

    pub fn make_symbol(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    pub fn make_keyword(&mut self, name: &str) -> Value {
        Value::Keyword(self.symbols.intern(name))
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        self.heap.cons(car, cdr)
    }

    pub fn list(&mut self, items: &[Value]) -> Value {
        self.heap.list(items)
    }

    pub fn make_string(&mut self, s: &str) -> Value {
        self.heap.make_string(s)
    }

    pub fn object_to_string(&self, v: Value) -> String {
        printer::write_value(&self.heap, &self.symbols, v)
    }

    pub fn display_string(&self, v: Value) -> String {
        printer::display_value(&self.heap, &self.symbols, v)
    }

    // === closures and parameter parsing ===

    fn make_closure(
        &mut self,
        kind: ClosureKind,
        params: Value,
        body: Value,
        env: Value,
        name: Option<SymbolId>,
    ) -> std::result::Result<Value, Condition> {
        let star = kind == ClosureKind::FunctionStar || kind == ClosureKind::MacroStar;
        let spec = self.parse_params(params, star)?;
        Ok(self.heap.make_closure(ClosureObj { kind, spec, body, env, name }))
    }

    /// Parse a parameter list: bare symbols, `(name default)`, dotted
    /// rest, and (star only) `:rest r`. A lone symbol is all-rest.
    fn parse_params(
        &mut self,
        params: Value,
        star: bool,
    ) -> std::result::Result<ParamSpec, Condition> {
        let mut spec = ParamSpec { params: Vec::new(), rest: None, required: 0 };
        let mut current = params;
        loop {
            match current {
                Value::Nil => break,
                Value::Symbol(s) => {
                    // Dotted rest (or a lone symbol for the whole list).
                    spec.rest = Some(s);
                    break;
                }
                Value::Pair(id) => {
                    let item = self.heap.car(id);
                    current = self.heap.cdr(id);
                    match item {
                        Value::Symbol(s) => {
                            if !star {
                                spec.required += 1;
                            }
                            spec.params.push(Param { name: s, default: None });
                        }
                        Value::Keyword(k) if star && k == sym::REST => {
                            let Value::Pair(rid) = current else {
                                return Err(self.syntax_error(":rest requires a name"));
                            };
                            let Value::Symbol(r) = self.heap.car(rid) else {
                                return Err(self.syntax_error(":rest requires a symbol"));
                            };
                            spec.rest = Some(r);
                            current = self.heap.cdr(rid);
                        }
                        Value::Pair(pid) => {
                            let Value::Symbol(s) = self.heap.car(pid) else {
                                return Err(self.syntax_error("bad parameter name"));
                            };
                            let default = match self.heap.cdr(pid) {
                                Value::Pair(did) => Some(self.heap.car(did)),
                                _ => Some(Value::Bool(false)),
                            };
                            spec.params.push(Param { name: s, default });
                        }
                        _ => return Err(self.syntax_error("bad parameter")),
                    }
                }
                _ => return Err(self.syntax_error("bad parameter list")),
            }
        }
        Ok(spec)
    }

    // === condition constructors ===

    pub fn make_condition(&mut self, tag: SymbolId, msg: &str, irritants: &[Value]) -> Condition {
        let s = self.heap.make_string(msg);
        let mut items = vec![s];
        items.extend_from_slice(irritants);
        let info = self.heap.list(&items);
        Condition::new(Value::Symbol(tag), info)
    }

    pub fn type_error(&mut self, who: &str, got: Value, want: &str) -> Condition {
        let msg = format!("{}: expected {}, got ~S", who, want);
        self.make_condition(sym::WRONG_TYPE_ARG, &msg, &[got])
    }

    pub fn range_error(&mut self, who: &str, got: Value) -> Condition {
        let msg = format!("{}: index ~S out of range", who);
        self.make_condition(sym::OUT_OF_RANGE, &msg, &[got])
    }

    pub fn arg_count_error(&mut self, who: &str, got: usize) -> Condition {
        let msg = format!("{}: wrong number of arguments: {}", who, got);
        self.make_condition(sym::WRONG_NUMBER_OF_ARGS, &msg, &[])
    }

    pub fn division_error(&mut self, who: &str) -> Condition {
        let msg = format!("{}: division by zero", who);
        self.make_condition(sym::DIVISION_BY_ZERO, &msg, &[])
    }

    fn closure_arity_error(&mut self, name: Option<SymbolId>, got: usize) -> Condition {
        let who = match name {
            Some(s) => self.symbols.name(s).to_string(),
            None => "lambda".to_string(),
        };
        self.arg_count_error(&who, got)
    }

    fn syntax_error(&mut self, msg: &str) -> Condition {
        self.make_condition(sym::SYNTAX_ERROR, msg, &[])
    }

    fn unbound(&mut self, s: SymbolId) -> Condition {
        let msg = format!("unbound variable: {}", self.symbols.name(s));
        self.make_condition(sym::UNBOUND_VARIABLE, &msg, &[Value::Symbol(s)])
    }

    // === small form accessors ===

    fn nth_form(&mut self, list: Value, n: usize) -> std::result::Result<Value, Condition> {
        self.nth_form_opt(list, n)
            .ok_or_else(|| self.syntax_error("missing form"))
    }

    fn nth_form_opt(&self, list: Value, n: usize) -> Option<Value> {
        let mut current = list;
        for _ in 0..n {
            match current {
                Value::Pair(id) => current = self.heap.cdr(id),
                _ => return None,
            }
        }
        match current {
            Value::Pair(id) => Some(self.heap.car(id)),
            _ => None,
        }
    }

    fn cdr_of(&self, list: Value) -> Value {
        match list {
            Value::Pair(id) => self.heap.cdr(id),
            _ => Value::Nil,
        }
    }

    /// Register the ordinary output port machinery used by the string
    /// port builtins.
    pub fn make_output_string_port(&mut self) -> Value {
        self.heap.make_port(PortObj::OutputString(String::new()))
    }

    pub fn make_input_string_port(&mut self, text: String) -> Value {
        self.heap.make_port(PortObj::InputString { text, pos: 0 })
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

struct StarArgs {
    filled: Vec<Option<Value>>,
    rest: Vec<Value>,
}

fn is_special_form(s: SymbolId) -> bool {
    matches!(
        s,
        sym::QUOTE
            | sym::QUASIQUOTE
            | sym::UNQUOTE
            | sym::UNQUOTE_SPLICING
            | sym::IF
            | sym::DEFINE
            | sym::DEFINE_STAR
            | sym::SET
            | sym::LAMBDA
            | sym::LAMBDA_STAR
            | sym::LET
            | sym::LET_STAR
            | sym::LETREC
            | sym::BEGIN
            | sym::AND
            | sym::OR
            | sym::COND
            | sym::WHEN
            | sym::UNLESS
            | sym::DEFINE_MACRO
            | sym::DEFINE_MACRO_STAR
            | sym::DELAY
    )
}
