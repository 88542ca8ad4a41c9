//! The built-in function set, registered into the rootlet at startup.

use rand::Rng;

use crate::error::Condition;
use crate::eval::Interp;
use crate::heap::{BuiltinKind, BuiltinObj, Obj, PortObj, SpecialOp};
use crate::printer;
use crate::reader;
use crate::symbol::sym;
use crate::value::{ObjId, Value};

type R = std::result::Result<Value, Condition>;

pub fn install(interp: &mut Interp) {
    // pairs and lists
    interp.define_function("cons", bi_cons, 2, 0, false, "(cons a b) new pair");
    interp.define_function("car", bi_car, 1, 0, false, "(car p) first element");
    interp.define_function("cdr", bi_cdr, 1, 0, false, "(cdr p) rest");
    interp.define_function("set-car!", bi_set_car, 2, 0, false, "(set-car! p v)");
    interp.define_function("set-cdr!", bi_set_cdr, 2, 0, false, "(set-cdr! p v)");
    interp.define_function("caar", bi_caar, 1, 0, false, "(caar p)");
    interp.define_function("cadr", bi_cadr, 1, 0, false, "(cadr p)");
    interp.define_function("cdar", bi_cdar, 1, 0, false, "(cdar p)");
    interp.define_function("cddr", bi_cddr, 1, 0, false, "(cddr p)");
    interp.define_function("list", bi_list, 0, 0, true, "(list ...) new list");
    interp.define_function("length", bi_length, 1, 0, false, "(length lst)");
    interp.define_function("append", bi_append, 0, 0, true, "(append ...) concatenated lists");
    interp.define_function("reverse", bi_reverse, 1, 0, false, "(reverse lst)");
    interp.define_function("list-ref", bi_list_ref, 2, 0, false, "(list-ref lst k)");
    interp.define_function("memq", bi_memq, 2, 0, false, "(memq v lst)");
    interp.define_function("assq", bi_assq, 2, 0, false, "(assq v alist)");

    // predicates
    interp.define_function("null?", bi_null_p, 1, 0, false, "(null? v)");
    interp.define_function("pair?", bi_pair_p, 1, 0, false, "(pair? v)");
    interp.define_function("symbol?", bi_symbol_p, 1, 0, false, "(symbol? v)");
    interp.define_function("string?", bi_string_p, 1, 0, false, "(string? v)");
    interp.define_function("number?", bi_number_p, 1, 0, false, "(number? v)");
    interp.define_function("integer?", bi_integer_p, 1, 0, false, "(integer? v)");
    interp.define_function("rational?", bi_rational_p, 1, 0, false, "(rational? v)");
    interp.define_function("real?", bi_real_p, 1, 0, false, "(real? v)");
    interp.define_function("complex?", bi_complex_p, 1, 0, false, "(complex? v)");
    interp.define_function("char?", bi_char_p, 1, 0, false, "(char? v)");
    interp.define_function("boolean?", bi_boolean_p, 1, 0, false, "(boolean? v)");
    interp.define_function("procedure?", bi_procedure_p, 1, 0, false, "(procedure? v)");
    interp.define_function("vector?", bi_vector_p, 1, 0, false, "(vector? v)");
    interp.define_function("hash-table?", bi_hash_table_p, 1, 0, false, "(hash-table? v)");
    interp.define_function("let?", bi_let_p, 1, 0, false, "(let? v)");
    interp.define_function("continuation?", bi_continuation_p, 1, 0, false, "(continuation? v)");
    interp.define_function("eof-object?", bi_eof_p, 1, 0, false, "(eof-object? v)");
    interp.define_function("keyword?", bi_keyword_p, 1, 0, false, "(keyword? v)");
    interp.define_function("defined?", bi_defined_p, 1, 1, false, "(defined? sym (env))");

    // equality
    interp.define_function("eq?", bi_eq, 2, 0, false, "(eq? a b) identity");
    interp.define_function("eqv?", bi_eq, 2, 0, false, "(eqv? a b)");
    interp.define_function("equal?", bi_equal, 2, 0, false, "(equal? a b) structural");
    interp.define_function("not", bi_not, 1, 0, false, "(not v)");

    // numbers
    interp.define_function("+", bi_add, 0, 0, true, "(+ ...)");
    interp.define_function("-", bi_sub, 1, 0, true, "(- ...)");
    interp.define_function("*", bi_mul, 0, 0, true, "(* ...)");
    interp.define_function("/", bi_div, 1, 0, true, "(/ ...)");
    interp.define_function("=", bi_num_eq, 1, 0, true, "(= ...)");
    interp.define_function("<", bi_lt, 1, 0, true, "(< ...)");
    interp.define_function(">", bi_gt, 1, 0, true, "(> ...)");
    interp.define_function("<=", bi_le, 1, 0, true, "(<= ...)");
    interp.define_function(">=", bi_ge, 1, 0, true, "(>= ...)");
    interp.define_function("quotient", bi_quotient, 2, 0, false, "(quotient a b)");
    interp.define_function("remainder", bi_remainder, 2, 0, false, "(remainder a b)");
    interp.define_function("modulo", bi_modulo, 2, 0, false, "(modulo a b)");
    interp.define_function("abs", bi_abs, 1, 0, false, "(abs x)");
    interp.define_function("min", bi_min, 1, 0, true, "(min ...)");
    interp.define_function("max", bi_max, 1, 0, true, "(max ...)");
    interp.define_function("floor", bi_floor, 1, 0, false, "(floor x)");
    interp.define_function("ceiling", bi_ceiling, 1, 0, false, "(ceiling x)");
    interp.define_function("round", bi_round, 1, 0, false, "(round x)");
    interp.define_function("truncate", bi_truncate, 1, 0, false, "(truncate x)");
    interp.define_function("numerator", bi_numerator, 1, 0, false, "(numerator q)");
    interp.define_function("denominator", bi_denominator, 1, 0, false, "(denominator q)");
    interp.define_function("real-part", bi_real_part, 1, 0, false, "(real-part z)");
    interp.define_function("imag-part", bi_imag_part, 1, 0, false, "(imag-part z)");
    interp.define_function("random", bi_random, 1, 0, false, "(random n)");
    interp.define_function("number->string", bi_number_to_string, 1, 1, false, "(number->string n)");
    interp.define_function("string->number", bi_string_to_number, 1, 0, false, "(string->number s)");

    // characters
    interp.define_function("char->integer", bi_char_to_integer, 1, 0, false, "(char->integer c)");
    interp.define_function("integer->char", bi_integer_to_char, 1, 0, false, "(integer->char n)");

    // strings
    interp.define_function("make-string", bi_make_string, 1, 1, false, "(make-string k (char))");
    interp.define_function("string-length", bi_string_length, 1, 0, false, "(string-length s)");
    interp.define_function("string-ref", bi_string_ref, 2, 0, false, "(string-ref s k)");
    interp.define_function("string-set!", bi_string_set, 3, 0, false, "(string-set! s k c)");
    interp.define_function("substring", bi_substring, 2, 1, false, "(substring s start (end))");
    interp.define_function("string-append", bi_string_append, 0, 0, true, "(string-append ...)");
    interp.define_function("string=?", bi_string_eq, 2, 0, true, "(string=? ...)");
    interp.define_function("string->symbol", bi_string_to_symbol, 1, 0, false, "(string->symbol s)");
    interp.define_function("symbol->string", bi_symbol_to_string, 1, 0, false, "(symbol->string sym)");
    interp.define_function("string->list", bi_string_to_list, 1, 0, false, "(string->list s)");
    interp.define_function("list->string", bi_list_to_string, 1, 0, false, "(list->string lst)");

    // vectors
    interp.define_function("make-vector", bi_make_vector, 1, 1, false, "(make-vector k (fill))");
    interp.define_function("vector", bi_vector, 0, 0, true, "(vector ...)");
    interp.define_function("vector-ref", bi_vector_ref, 2, 0, false, "(vector-ref v k)");
    interp.define_function("vector-set!", bi_vector_set, 3, 0, false, "(vector-set! v k val)");
    interp.define_function("vector-length", bi_vector_length, 1, 0, false, "(vector-length v)");
    interp.define_function("vector->list", bi_vector_to_list, 1, 0, false, "(vector->list v)");
    interp.define_function("list->vector", bi_list_to_vector, 1, 0, false, "(list->vector lst)");
    interp.define_function("make-int-vector", bi_make_int_vector, 1, 1, false, "(make-int-vector k (init))");
    interp.define_function("make-float-vector", bi_make_float_vector, 1, 1, false, "(make-float-vector k (init))");

    // hash tables
    interp.define_function("make-hash-table", bi_make_hash_table, 0, 1, false, "(make-hash-table)");
    interp.define_function("hash-table-ref", bi_hash_table_ref, 2, 0, false, "(hash-table-ref h k)");
    interp.define_function("hash-table-set!", bi_hash_table_set, 3, 0, false, "(hash-table-set! h k v)");

    // lets
    interp.define_function("rootlet", bi_rootlet, 0, 0, false, "(rootlet) the global let");
    interp.define_function("curlet", bi_curlet, 0, 0, false, "(curlet) the current let");
    interp.define_function("outlet", bi_outlet, 1, 0, false, "(outlet e)");
    interp.define_function("let->list", bi_let_to_list, 1, 0, false, "(let->list e)");
    interp.define_function("sublet", bi_sublet, 1, 0, true, "(sublet e sym val ...)");
    interp.define_function("inlet", bi_inlet, 0, 0, true, "(inlet sym val ...)");
    interp.define_function("varlet", bi_varlet, 1, 0, true, "(varlet e sym val ...)");
    interp.define_function("let-ref", bi_let_ref, 2, 0, false, "(let-ref e sym)");
    interp.define_function("let-set!", bi_let_set, 3, 0, false, "(let-set! e sym v)");
    interp.define_function("openlet", bi_openlet, 1, 0, false, "(openlet e)");
    interp.define_function("coverlet", bi_coverlet, 1, 0, false, "(coverlet e)");
    interp.define_function("openlet?", bi_openlet_p, 1, 0, false, "(openlet? e)");

    // control (most need the evaluator's own stacks)
    define_special(interp, "catch", SpecialOp::Catch, 3);
    define_special(interp, "dynamic-wind", SpecialOp::DynamicWind, 3);
    define_special(interp, "call/cc", SpecialOp::CallCc, 1);
    define_special(interp, "call-with-current-continuation", SpecialOp::CallCc, 1);
    define_special(interp, "force", SpecialOp::Force, 1);
    define_special(interp, "quit", SpecialOp::Quit, 0);
    define_special_rest(interp, "apply", SpecialOp::Apply, 1);
    define_special_opt(interp, "eval", SpecialOp::Eval, 1, 1);
    interp.define_function("throw", bi_throw, 1, 0, true, "(throw tag ...) raise a condition");
    interp.define_function("error", bi_throw, 1, 0, true, "(error tag fmt ...) raise a condition");
    interp.define_function("gc", bi_gc, 0, 1, false, "(gc (on)) collect or toggle");

    // I/O
    interp.define_function("display", bi_display, 1, 1, false, "(display v (port))");
    interp.define_function("write", bi_write, 1, 1, false, "(write v (port))");
    interp.define_function("newline", bi_newline, 0, 1, false, "(newline (port))");
    interp.define_function("open-input-string", bi_open_input_string, 1, 0, false, "(open-input-string s)");
    interp.define_function("open-output-string", bi_open_output_string, 0, 0, false, "(open-output-string)");
    interp.define_function("get-output-string", bi_get_output_string, 1, 0, false, "(get-output-string p)");
    interp.define_function("read-char", bi_read_char, 1, 0, false, "(read-char p)");
    interp.define_function("read-string", bi_read_string, 2, 0, false, "(read-string k p)");
    interp.define_function("current-output-port", bi_current_output_port, 0, 0, false, "(current-output-port)");
    interp.define_function("close-input-port", bi_close_port, 1, 0, false, "(close-input-port p)");
    interp.define_function("close-output-port", bi_close_port, 1, 0, false, "(close-output-port p)");
    interp.define_function("load", bi_load, 1, 0, false, "(load path)");
    interp.define_function("gensym", bi_gensym, 0, 1, false, "(gensym (prefix))");
    interp.define_function("object->string", bi_object_to_string, 1, 0, false, "(object->string v)");

    interp.define_variable("pi", Value::Real(std::f64::consts::PI));
    interp.define_variable("else", Value::Bool(true));
}

fn define_special(interp: &mut Interp, name: &str, op: SpecialOp, required: usize) {
    register_special(interp, name, op, required, 0, false);
}

fn define_special_opt(interp: &mut Interp, name: &str, op: SpecialOp, required: usize, optional: usize) {
    register_special(interp, name, op, required, optional, false);
}

fn define_special_rest(interp: &mut Interp, name: &str, op: SpecialOp, required: usize) {
    register_special(interp, name, op, required, 0, true);
}

fn register_special(
    interp: &mut Interp,
    name: &str,
    op: SpecialOp,
    required: usize,
    optional: usize,
    rest: bool,
) {
    let b = interp.heap.make_builtin(BuiltinObj {
        name: name.to_string(),
        doc: String::new(),
        required,
        optional,
        rest,
        kind: BuiltinKind::Special(op),
    });
    let s = interp.symbols.intern(name);
    let root = interp.rootlet();
    interp.varlet(root, s, b);
}

// === argument helpers ===

fn as_pair(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<ObjId, Condition> {
    match v {
        Value::Pair(id) => Ok(id),
        _ => Err(interp.type_error(who, v, "a pair")),
    }
}

fn as_str(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<ObjId, Condition> {
    match v {
        Value::Str(id) => Ok(id),
        _ => Err(interp.type_error(who, v, "a string")),
    }
}

fn as_int(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<i64, Condition> {
    match v {
        Value::Int(n) => Ok(n),
        _ => Err(interp.type_error(who, v, "an integer")),
    }
}

fn as_index(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<usize, Condition> {
    match v {
        Value::Int(n) if n >= 0 => Ok(n as usize),
        Value::Int(_) => Err(interp.range_error(who, v)),
        _ => Err(interp.type_error(who, v, "an index")),
    }
}

fn as_char(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<char, Condition> {
    match v {
        Value::Char(c) => Ok(c),
        _ => Err(interp.type_error(who, v, "a character")),
    }
}

fn as_let(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<ObjId, Condition> {
    match v {
        Value::Let(id) => Ok(id),
        _ => Err(interp.type_error(who, v, "a let")),
    }
}

fn as_symbolish(
    interp: &mut Interp,
    who: &str,
    v: Value,
) -> std::result::Result<crate::value::SymbolId, Condition> {
    match v {
        Value::Symbol(s) | Value::Keyword(s) => Ok(s),
        _ => Err(interp.type_error(who, v, "a symbol")),
    }
}

fn list_arg(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<Vec<Value>, Condition> {
    interp
        .heap
        .list_to_vec(v)
        .ok_or_else(|| interp.type_error(who, v, "a proper list"))
}

fn bool_val(b: bool) -> Value {
    Value::Bool(b)
}

// === pairs and lists ===

fn bi_cons(interp: &mut Interp, args: &[Value]) -> R {
    Ok(interp.heap.cons(args[0], args[1]))
}

fn bi_car(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_pair(interp, "car", args[0])?;
    Ok(interp.heap.car(id))
}

fn bi_cdr(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_pair(interp, "cdr", args[0])?;
    Ok(interp.heap.cdr(id))
}

fn bi_set_car(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_pair(interp, "set-car!", args[0])?;
    interp.heap.set_car(id, args[1]);
    Ok(args[1])
}

fn bi_set_cdr(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_pair(interp, "set-cdr!", args[0])?;
    interp.heap.set_cdr(id, args[1]);
    Ok(args[1])
}

fn cxr(interp: &mut Interp, who: &str, v: Value, first_car: bool, then_car: bool) -> R {
    let id = as_pair(interp, who, v)?;
    let step = if first_car { interp.heap.car(id) } else { interp.heap.cdr(id) };
    let id2 = as_pair(interp, who, step)?;
    Ok(if then_car { interp.heap.car(id2) } else { interp.heap.cdr(id2) })
}

fn bi_caar(interp: &mut Interp, args: &[Value]) -> R {
    cxr(interp, "caar", args[0], true, true)
}

fn bi_cadr(interp: &mut Interp, args: &[Value]) -> R {
    cxr(interp, "cadr", args[0], false, true)
}

fn bi_cdar(interp: &mut Interp, args: &[Value]) -> R {
    cxr(interp, "cdar", args[0], true, false)
}

fn bi_cddr(interp: &mut Interp, args: &[Value]) -> R {
    cxr(interp, "cddr", args[0], false, false)
}

fn bi_list(interp: &mut Interp, args: &[Value]) -> R {
    Ok(interp.heap.list(args))
}

fn bi_length(interp: &mut Interp, args: &[Value]) -> R {
    match interp.heap.list_len(args[0]) {
        Some(n) => Ok(Value::Int(n as i64)),
        None => Err(interp.type_error("length", args[0], "a proper list")),
    }
}

fn bi_append(interp: &mut Interp, args: &[Value]) -> R {
    match args {
        [] => Ok(Value::Nil),
        [only] => Ok(*only),
        _ => {
            let mut items: Vec<Value> = Vec::new();
            for &a in &args[..args.len() - 1] {
                items.extend(list_arg(interp, "append", a)?);
            }
            let mut result = args[args.len() - 1];
            for &item in items.iter().rev() {
                result = interp.heap.cons(item, result);
            }
            Ok(result)
        }
    }
}

fn bi_reverse(interp: &mut Interp, args: &[Value]) -> R {
    let items = list_arg(interp, "reverse", args[0])?;
    let mut result = Value::Nil;
    for &item in &items {
        result = interp.heap.cons(item, result);
    }
    Ok(result)
}

fn bi_list_ref(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "list-ref", args[1])?;
    let mut current = args[0];
    for _ in 0..k {
        let id = as_pair(interp, "list-ref", current)?;
        current = interp.heap.cdr(id);
    }
    let id = as_pair(interp, "list-ref", current)?;
    Ok(interp.heap.car(id))
}

fn bi_memq(interp: &mut Interp, args: &[Value]) -> R {
    let mut current = args[1];
    while let Value::Pair(id) = current {
        if interp.heap.car(id).is_eq(args[0]) {
            return Ok(current);
        }
        current = interp.heap.cdr(id);
    }
    Ok(Value::Bool(false))
}

fn bi_assq(interp: &mut Interp, args: &[Value]) -> R {
    let mut current = args[1];
    while let Value::Pair(id) = current {
        let entry = interp.heap.car(id);
        if let Value::Pair(eid) = entry {
            if interp.heap.car(eid).is_eq(args[0]) {
                return Ok(entry);
            }
        }
        current = interp.heap.cdr(id);
    }
    Ok(Value::Bool(false))
}

// === predicates ===

fn bi_null_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_nil()))
}

fn bi_pair_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_pair()))
}

fn bi_symbol_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_symbol()))
}

fn bi_string_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Str(_))))
}

fn bi_number_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_number()))
}

fn bi_integer_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Int(_))))
}

fn bi_rational_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Int(_) | Value::Ratio(_, _))))
}

fn bi_real_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(
        args[0],
        Value::Int(_) | Value::Ratio(_, _) | Value::Real(_)
    )))
}

fn bi_complex_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_number()))
}

fn bi_char_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Char(_))))
}

fn bi_boolean_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Bool(_))))
}

fn bi_procedure_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_procedure()))
}

fn bi_vector_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(
        args[0],
        Value::Vector(_) | Value::IntVector(_) | Value::FloatVector(_)
    )))
}

fn bi_hash_table_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::HashTable(_))))
}

fn bi_let_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_let()))
}

fn bi_continuation_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Continuation(_))))
}

fn bi_eof_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Eof)))
}

fn bi_keyword_p(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(matches!(args[0], Value::Keyword(_))))
}

fn bi_defined_p(interp: &mut Interp, args: &[Value]) -> R {
    let s = as_symbolish(interp, "defined?", args[0])?;
    let env = if args.len() > 1 { args[1] } else { interp.curlet() };
    Ok(bool_val(interp.let_ref(env, s).is_some()))
}

// === equality ===

fn bi_eq(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(args[0].is_eq(args[1])))
}

fn bi_equal(interp: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(interp.heap.structural_equal(args[0], args[1])))
}

fn bi_not(_: &mut Interp, args: &[Value]) -> R {
    Ok(bool_val(!args[0].is_true()))
}

// === the numeric tower ===

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Ratio(i64, i64),
    Real(f64),
    Complex(f64, f64),
}

fn to_num(interp: &mut Interp, who: &str, v: Value) -> std::result::Result<Num, Condition> {
    match v {
        Value::Int(n) => Ok(Num::Int(n)),
        Value::Ratio(n, d) => Ok(Num::Ratio(n, d)),
        Value::Real(r) => Ok(Num::Real(r)),
        Value::Complex(re, im) => Ok(Num::Complex(re, im)),
        _ => Err(interp.type_error(who, v, "a number")),
    }
}

fn num_val(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::Int(i),
        Num::Ratio(a, b) => Value::ratio(a, b),
        Num::Real(r) => Value::Real(r),
        Num::Complex(re, im) => {
            if im == 0.0 {
                Value::Real(re)
            } else {
                Value::Complex(re, im)
            }
        }
    }
}

fn num_to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Ratio(a, b) => a as f64 / b as f64,
        Num::Real(r) => r,
        Num::Complex(re, _) => re,
    }
}

fn num_to_complex(n: Num) -> (f64, f64) {
    match n {
        Num::Complex(re, im) => (re, im),
        other => (num_to_f64(other), 0.0),
    }
}

/// Exact rational arithmetic in i128; falls back to float on overflow.
fn ratio_op(an: i64, ad: i64, bn: i64, bd: i64, f: fn(i128, i128, i128, i128) -> (i128, i128)) -> Num {
    let (n, d) = f(an as i128, ad as i128, bn as i128, bd as i128);
    if d == 0 {
        return Num::Real(f64::NAN); // callers reject zero divisors first
    }
    let g = gcd128(n.unsigned_abs(), d.unsigned_abs()) as i128;
    let (n, d) = if g > 1 { (n / g, d / g) } else { (n, d) };
    let (n, d) = if d < 0 { (-n, -d) } else { (n, d) };
    match (i64::try_from(n), i64::try_from(d)) {
        (Ok(n64), Ok(d64)) => Num::Ratio(n64, d64),
        _ => Num::Real(n as f64 / d as f64),
    }
}

fn gcd128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn rat_parts(n: Num) -> Option<(i64, i64)> {
    match n {
        Num::Int(i) => Some((i, 1)),
        Num::Ratio(a, b) => Some((a, b)),
        _ => None,
    }
}

fn arith2(a: Num, b: Num, op: ArithOp) -> Num {
    if let (Num::Complex(_, _), _) | (_, Num::Complex(_, _)) = (a, b) {
        let (ar, ai) = num_to_complex(a);
        let (br, bi) = num_to_complex(b);
        return match op {
            ArithOp::Add => Num::Complex(ar + br, ai + bi),
            ArithOp::Sub => Num::Complex(ar - br, ai - bi),
            ArithOp::Mul => Num::Complex(ar * br - ai * bi, ar * bi + ai * br),
            ArithOp::Div => {
                let den = br * br + bi * bi;
                Num::Complex((ar * br + ai * bi) / den, (ai * br - ar * bi) / den)
            }
        };
    }
    if let (Num::Real(_), _) | (_, Num::Real(_)) = (a, b) {
        let (x, y) = (num_to_f64(a), num_to_f64(b));
        return Num::Real(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
        });
    }
    // both exact
    let (an, ad) = match rat_parts(a) {
        Some(p) => p,
        None => return Num::Real(f64::NAN),
    };
    let (bn, bd) = match rat_parts(b) {
        Some(p) => p,
        None => return Num::Real(f64::NAN),
    };
    match op {
        ArithOp::Add => ratio_op(an, ad, bn, bd, |an, ad, bn, bd| (an * bd + bn * ad, ad * bd)),
        ArithOp::Sub => ratio_op(an, ad, bn, bd, |an, ad, bn, bd| (an * bd - bn * ad, ad * bd)),
        ArithOp::Mul => ratio_op(an, ad, bn, bd, |an, ad, bn, bd| (an * bn, ad * bd)),
        ArithOp::Div => ratio_op(an, ad, bn, bd, |an, ad, bn, bd| (an * bd, ad * bn)),
    }
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

fn is_exact_zero(n: Num) -> bool {
    matches!(n, Num::Int(0))
}

fn fold_arith(interp: &mut Interp, who: &str, args: &[Value], init: Num, op: ArithOp) -> R {
    let mut acc = init;
    for &a in args {
        let n = to_num(interp, who, a)?;
        acc = arith2(acc, n, op);
    }
    Ok(num_val(acc))
}

fn bi_add(interp: &mut Interp, args: &[Value]) -> R {
    fold_arith(interp, "+", args, Num::Int(0), ArithOp::Add)
}

fn bi_mul(interp: &mut Interp, args: &[Value]) -> R {
    fold_arith(interp, "*", args, Num::Int(1), ArithOp::Mul)
}

fn bi_sub(interp: &mut Interp, args: &[Value]) -> R {
    let first = to_num(interp, "-", args[0])?;
    if args.len() == 1 {
        return Ok(num_val(arith2(Num::Int(0), first, ArithOp::Sub)));
    }
    let mut acc = first;
    for &a in &args[1..] {
        let n = to_num(interp, "-", a)?;
        acc = arith2(acc, n, ArithOp::Sub);
    }
    Ok(num_val(acc))
}

fn bi_div(interp: &mut Interp, args: &[Value]) -> R {
    let first = to_num(interp, "/", args[0])?;
    if args.len() == 1 {
        if is_exact_zero(first) {
            return Err(interp.division_error("/"));
        }
        return Ok(num_val(arith2(Num::Int(1), first, ArithOp::Div)));
    }
    let mut acc = first;
    for &a in &args[1..] {
        let n = to_num(interp, "/", a)?;
        if is_exact_zero(n) {
            return Err(interp.division_error("/"));
        }
        acc = arith2(acc, n, ArithOp::Div);
    }
    Ok(num_val(acc))
}

/// Exact comparison when both sides are rational, float otherwise.
fn num_cmp(
    interp: &mut Interp,
    who: &str,
    a: Num,
    b: Num,
) -> std::result::Result<std::cmp::Ordering, Condition> {
    if matches!(a, Num::Complex(_, _)) || matches!(b, Num::Complex(_, _)) {
        return Err(interp.type_error(who, num_val(a), "a real number"));
    }
    if let (Some((an, ad)), Some((bn, bd))) = (rat_parts(a), rat_parts(b)) {
        let lhs = an as i128 * bd as i128;
        let rhs = bn as i128 * ad as i128;
        return Ok(lhs.cmp(&rhs));
    }
    let (x, y) = (num_to_f64(a), num_to_f64(b));
    Ok(x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Greater))
}

fn compare_chain(
    interp: &mut Interp,
    who: &str,
    args: &[Value],
    ok: fn(std::cmp::Ordering) -> bool,
) -> R {
    let mut prev = to_num(interp, who, args[0])?;
    for &a in &args[1..] {
        let n = to_num(interp, who, a)?;
        if !ok(num_cmp(interp, who, prev, n)?) {
            return Ok(Value::Bool(false));
        }
        prev = n;
    }
    Ok(Value::Bool(true))
}

fn bi_num_eq(interp: &mut Interp, args: &[Value]) -> R {
    let mut prev = to_num(interp, "=", args[0])?;
    for &a in &args[1..] {
        let n = to_num(interp, "=", a)?;
        let (ar, ai) = num_to_complex(prev);
        let (br, bi) = num_to_complex(n);
        let eq = if let (Some((an, ad)), Some((bn, bd))) = (rat_parts(prev), rat_parts(n)) {
            an as i128 * bd as i128 == bn as i128 * ad as i128
        } else {
            ar == br && ai == bi
        };
        if !eq {
            return Ok(Value::Bool(false));
        }
        prev = n;
    }
    Ok(Value::Bool(true))
}

fn bi_lt(interp: &mut Interp, args: &[Value]) -> R {
    compare_chain(interp, "<", args, |o| o == std::cmp::Ordering::Less)
}

fn bi_gt(interp: &mut Interp, args: &[Value]) -> R {
    compare_chain(interp, ">", args, |o| o == std::cmp::Ordering::Greater)
}

fn bi_le(interp: &mut Interp, args: &[Value]) -> R {
    compare_chain(interp, "<=", args, |o| o != std::cmp::Ordering::Greater)
}

fn bi_ge(interp: &mut Interp, args: &[Value]) -> R {
    compare_chain(interp, ">=", args, |o| o != std::cmp::Ordering::Less)
}

fn int_div2(
    interp: &mut Interp,
    who: &str,
    args: &[Value],
) -> std::result::Result<(i64, i64), Condition> {
    let a = as_int(interp, who, args[0])?;
    let b = as_int(interp, who, args[1])?;
    if b == 0 {
        return Err(interp.division_error(who));
    }
    Ok((a, b))
}

fn bi_quotient(interp: &mut Interp, args: &[Value]) -> R {
    let (a, b) = int_div2(interp, "quotient", args)?;
    Ok(Value::Int(a / b))
}

fn bi_remainder(interp: &mut Interp, args: &[Value]) -> R {
    let (a, b) = int_div2(interp, "remainder", args)?;
    Ok(Value::Int(a % b))
}

fn bi_modulo(interp: &mut Interp, args: &[Value]) -> R {
    let (a, b) = int_div2(interp, "modulo", args)?;
    // Result takes the sign of the divisor.
    let r = a % b;
    Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
}

fn bi_abs(interp: &mut Interp, args: &[Value]) -> R {
    match to_num(interp, "abs", args[0])? {
        Num::Int(i) => Ok(Value::Int(i.saturating_abs())),
        Num::Ratio(n, d) => Ok(Value::Ratio(n.saturating_abs(), d)),
        Num::Real(r) => Ok(Value::Real(r.abs())),
        n @ Num::Complex(_, _) => Err(interp.type_error("abs", num_val(n), "a real number")),
    }
}

fn bi_min(interp: &mut Interp, args: &[Value]) -> R {
    let mut best = args[0];
    let mut best_n = to_num(interp, "min", best)?;
    for &a in &args[1..] {
        let n = to_num(interp, "min", a)?;
        if num_cmp(interp, "min", n, best_n)? == std::cmp::Ordering::Less {
            best = a;
            best_n = n;
        }
    }
    Ok(best)
}

fn bi_max(interp: &mut Interp, args: &[Value]) -> R {
    let mut best = args[0];
    let mut best_n = to_num(interp, "max", best)?;
    for &a in &args[1..] {
        let n = to_num(interp, "max", a)?;
        if num_cmp(interp, "max", n, best_n)? == std::cmp::Ordering::Greater {
            best = a;
            best_n = n;
        }
    }
    Ok(best)
}

fn round_like(interp: &mut Interp, who: &str, v: Value, f: fn(f64) -> f64) -> R {
    match to_num(interp, who, v)? {
        Num::Int(i) => Ok(Value::Int(i)),
        Num::Ratio(n, d) => Ok(Value::Int(f(n as f64 / d as f64) as i64)),
        Num::Real(r) => {
            if r.is_finite() {
                Ok(Value::Int(f(r) as i64))
            } else {
                Err(interp.range_error(who, v))
            }
        }
        n @ Num::Complex(_, _) => Err(interp.type_error(who, num_val(n), "a real number")),
    }
}

fn bi_floor(interp: &mut Interp, args: &[Value]) -> R {
    round_like(interp, "floor", args[0], f64::floor)
}

fn bi_ceiling(interp: &mut Interp, args: &[Value]) -> R {
    round_like(interp, "ceiling", args[0], f64::ceil)
}

fn bi_round(interp: &mut Interp, args: &[Value]) -> R {
    round_like(interp, "round", args[0], f64::round)
}

fn bi_truncate(interp: &mut Interp, args: &[Value]) -> R {
    round_like(interp, "truncate", args[0], f64::trunc)
}

fn bi_numerator(interp: &mut Interp, args: &[Value]) -> R {
    match args[0] {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Ratio(n, _) => Ok(Value::Int(n)),
        v => Err(interp.type_error("numerator", v, "a rational")),
    }
}

fn bi_denominator(interp: &mut Interp, args: &[Value]) -> R {
    match args[0] {
        Value::Int(_) => Ok(Value::Int(1)),
        Value::Ratio(_, d) => Ok(Value::Int(d)),
        v => Err(interp.type_error("denominator", v, "a rational")),
    }
}

fn bi_real_part(interp: &mut Interp, args: &[Value]) -> R {
    match to_num(interp, "real-part", args[0])? {
        Num::Complex(re, _) => Ok(Value::Real(re)),
        _ => Ok(args[0]),
    }
}

fn bi_imag_part(interp: &mut Interp, args: &[Value]) -> R {
    match to_num(interp, "imag-part", args[0])? {
        Num::Complex(_, im) => Ok(Value::Real(im)),
        Num::Real(_) => Ok(Value::Real(0.0)),
        _ => Ok(Value::Int(0)),
    }
}

fn bi_random(interp: &mut Interp, args: &[Value]) -> R {
    let mut rng = rand::thread_rng();
    match args[0] {
        Value::Int(n) if n > 0 => Ok(Value::Int(rng.gen_range(0..n))),
        Value::Real(r) if r > 0.0 => Ok(Value::Real(rng.gen::<f64>() * r)),
        v => Err(interp.type_error("random", v, "a positive number")),
    }
}

fn bi_number_to_string(interp: &mut Interp, args: &[Value]) -> R {
    if !args[0].is_number() {
        return Err(interp.type_error("number->string", args[0], "a number"));
    }
    let s = printer::write_value(&interp.heap, &interp.symbols, args[0]);
    Ok(interp.heap.make_string(s))
}

fn bi_string_to_number(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string->number", args[0])?;
    let text = interp.heap.string(id).to_string();
    Ok(reader::parse_number(&text).unwrap_or(Value::Bool(false)))
}

// === characters ===

fn bi_char_to_integer(interp: &mut Interp, args: &[Value]) -> R {
    let c = as_char(interp, "char->integer", args[0])?;
    Ok(Value::Int(c as i64))
}

fn bi_integer_to_char(interp: &mut Interp, args: &[Value]) -> R {
    let n = as_int(interp, "integer->char", args[0])?;
    u32::try_from(n)
        .ok()
        .and_then(char::from_u32)
        .map(Value::Char)
        .ok_or_else(|| interp.range_error("integer->char", args[0]))
}

// === strings ===

fn bi_make_string(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "make-string", args[0])?;
    let fill = if args.len() > 1 { as_char(interp, "make-string", args[1])? } else { ' ' };
    let s: String = std::iter::repeat(fill).take(k).collect();
    Ok(interp.heap.make_string(s))
}

fn bi_string_length(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string-length", args[0])?;
    Ok(Value::Int(interp.heap.string(id).chars().count() as i64))
}

fn bi_string_ref(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string-ref", args[0])?;
    let k = as_index(interp, "string-ref", args[1])?;
    interp
        .heap
        .string(id)
        .chars()
        .nth(k)
        .map(Value::Char)
        .ok_or_else(|| interp.range_error("string-ref", args[1]))
}

fn bi_string_set(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string-set!", args[0])?;
    let k = as_index(interp, "string-set!", args[1])?;
    let c = as_char(interp, "string-set!", args[2])?;
    let mut chars: Vec<char> = interp.heap.string(id).chars().collect();
    if k >= chars.len() {
        return Err(interp.range_error("string-set!", args[1]));
    }
    chars[k] = c;
    *interp.heap.string_mut(id) = chars.into_iter().collect();
    Ok(args[2])
}

fn bi_substring(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "substring", args[0])?;
    let start = as_index(interp, "substring", args[1])?;
    let chars: Vec<char> = interp.heap.string(id).chars().collect();
    let end = if args.len() > 2 { as_index(interp, "substring", args[2])? } else { chars.len() };
    if start > end || end > chars.len() {
        return Err(interp.range_error("substring", args[1]));
    }
    let s: String = chars[start..end].iter().collect();
    Ok(interp.heap.make_string(s))
}

fn bi_string_append(interp: &mut Interp, args: &[Value]) -> R {
    let mut out = String::new();
    for &a in args {
        let id = as_str(interp, "string-append", a)?;
        out.push_str(interp.heap.string(id));
    }
    Ok(interp.heap.make_string(out))
}

fn bi_string_eq(interp: &mut Interp, args: &[Value]) -> R {
    let first = as_str(interp, "string=?", args[0])?;
    for &a in &args[1..] {
        let id = as_str(interp, "string=?", a)?;
        if interp.heap.string(id) != interp.heap.string(first) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn bi_string_to_symbol(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string->symbol", args[0])?;
    let name = interp.heap.string(id).to_string();
    Ok(Value::Symbol(interp.symbols.intern(&name)))
}

fn bi_symbol_to_string(interp: &mut Interp, args: &[Value]) -> R {
    let s = as_symbolish(interp, "symbol->string", args[0])?;
    let name = interp.symbols.name(s).to_string();
    Ok(interp.heap.make_string(name))
}

fn bi_string_to_list(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "string->list", args[0])?;
    let chars: Vec<Value> = interp.heap.string(id).chars().map(Value::Char).collect();
    Ok(interp.heap.list(&chars))
}

fn bi_list_to_string(interp: &mut Interp, args: &[Value]) -> R {
    let items = list_arg(interp, "list->string", args[0])?;
    let mut s = String::with_capacity(items.len());
    for item in items {
        s.push(as_char(interp, "list->string", item)?);
    }
    Ok(interp.heap.make_string(s))
}

// === vectors ===

fn bi_make_vector(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "make-vector", args[0])?;
    let fill = if args.len() > 1 { args[1] } else { Value::Unspecified };
    Ok(interp.heap.make_vector(vec![fill; k]))
}

fn bi_vector(interp: &mut Interp, args: &[Value]) -> R {
    Ok(interp.heap.make_vector(args.to_vec()))
}

fn bi_vector_ref(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "vector-ref", args[1])?;
    match args[0] {
        Value::Vector(id) => interp
            .heap
            .vector(id)
            .get(k)
            .copied()
            .ok_or_else(|| interp.range_error("vector-ref", args[1])),
        Value::IntVector(id) => match interp.heap.obj(id) {
            Obj::IntVector(v) => v
                .get(k)
                .map(|&n| Value::Int(n))
                .ok_or_else(|| interp.range_error("vector-ref", args[1])),
            _ => unreachable!(),
        },
        Value::FloatVector(id) => match interp.heap.obj(id) {
            Obj::FloatVector(v) => v
                .get(k)
                .map(|&r| Value::Real(r))
                .ok_or_else(|| interp.range_error("vector-ref", args[1])),
            _ => unreachable!(),
        },
        v => Err(interp.type_error("vector-ref", v, "a vector")),
    }
}

fn bi_vector_set(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "vector-set!", args[1])?;
    match args[0] {
        Value::Vector(id) => {
            if k >= interp.heap.vector(id).len() {
                return Err(interp.range_error("vector-set!", args[1]));
            }
            interp.heap.vector_mut(id)[k] = args[2];
            Ok(args[2])
        }
        Value::IntVector(id) => {
            let n = as_int(interp, "vector-set!", args[2])?;
            match interp.heap.obj_mut(id) {
                Obj::IntVector(v) if k < v.len() => {
                    v[k] = n;
                    Ok(args[2])
                }
                _ => Err(interp.range_error("vector-set!", args[1])),
            }
        }
        Value::FloatVector(id) => {
            let r = match args[2] {
                Value::Real(r) => r,
                Value::Int(n) => n as f64,
                v => return Err(interp.type_error("vector-set!", v, "a real")),
            };
            match interp.heap.obj_mut(id) {
                Obj::FloatVector(v) if k < v.len() => {
                    v[k] = r;
                    Ok(args[2])
                }
                _ => Err(interp.range_error("vector-set!", args[1])),
            }
        }
        v => Err(interp.type_error("vector-set!", v, "a vector")),
    }
}

fn bi_vector_length(interp: &mut Interp, args: &[Value]) -> R {
    let len = match args[0] {
        Value::Vector(id) => interp.heap.vector(id).len(),
        Value::IntVector(id) => match interp.heap.obj(id) {
            Obj::IntVector(v) => v.len(),
            _ => unreachable!(),
        },
        Value::FloatVector(id) => match interp.heap.obj(id) {
            Obj::FloatVector(v) => v.len(),
            _ => unreachable!(),
        },
        v => return Err(interp.type_error("vector-length", v, "a vector")),
    };
    Ok(Value::Int(len as i64))
}

fn bi_vector_to_list(interp: &mut Interp, args: &[Value]) -> R {
    match args[0] {
        Value::Vector(id) => {
            let items = interp.heap.vector(id).clone();
            Ok(interp.heap.list(&items))
        }
        v => Err(interp.type_error("vector->list", v, "a vector")),
    }
}

fn bi_list_to_vector(interp: &mut Interp, args: &[Value]) -> R {
    let items = list_arg(interp, "list->vector", args[0])?;
    Ok(interp.heap.make_vector(items))
}

fn bi_make_int_vector(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "make-int-vector", args[0])?;
    let init = if args.len() > 1 { as_int(interp, "make-int-vector", args[1])? } else { 0 };
    Ok(interp.heap.make_int_vector(vec![init; k]))
}

fn bi_make_float_vector(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "make-float-vector", args[0])?;
    let init = if args.len() > 1 {
        match args[1] {
            Value::Real(r) => r,
            Value::Int(n) => n as f64,
            v => return Err(interp.type_error("make-float-vector", v, "a real")),
        }
    } else {
        0.0
    };
    Ok(interp.heap.make_float_vector(vec![init; k]))
}

// === hash tables ===

fn bi_make_hash_table(interp: &mut Interp, _args: &[Value]) -> R {
    // The optional size argument is accepted and ignored; storage grows.
    Ok(interp.heap.make_hash_table())
}

fn bi_hash_table_ref(interp: &mut Interp, args: &[Value]) -> R {
    match args[0] {
        Value::HashTable(id) => Ok(interp.hash_lookup(id, args[1])),
        v => Err(interp.type_error("hash-table-ref", v, "a hash-table")),
    }
}

fn bi_hash_table_set(interp: &mut Interp, args: &[Value]) -> R {
    let Value::HashTable(id) = args[0] else {
        return Err(interp.type_error("hash-table-set!", args[0], "a hash-table"));
    };
    let keys: Vec<Value> = match interp.heap.obj(id) {
        Obj::HashTable(entries) => entries.iter().map(|&(k, _)| k).collect(),
        _ => unreachable!(),
    };
    let existing = keys
        .iter()
        .position(|&k| interp.heap.structural_equal(k, args[1]));
    if let Obj::HashTable(entries) = interp.heap.obj_mut(id) {
        match existing {
            Some(i) => entries[i].1 = args[2],
            None => entries.push((args[1], args[2])),
        }
    }
    Ok(args[2])
}

// === lets ===

fn bi_rootlet(interp: &mut Interp, _args: &[Value]) -> R {
    Ok(interp.rootlet())
}

fn bi_curlet(interp: &mut Interp, _args: &[Value]) -> R {
    Ok(interp.curlet())
}

fn bi_outlet(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_let(interp, "outlet", args[0])?;
    Ok(crate::env::outlet(&interp.heap, id))
}

fn bi_let_to_list(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_let(interp, "let->list", args[0])?;
    Ok(crate::env::frame_alist(&mut interp.heap, id))
}

fn binding_args(
    interp: &mut Interp,
    who: &str,
    args: &[Value],
) -> std::result::Result<Vec<(crate::value::SymbolId, Value)>, Condition> {
    if args.len() % 2 != 0 {
        return Err(interp.arg_count_error(who, args.len()));
    }
    let mut out = Vec::with_capacity(args.len() / 2);
    for chunk in args.chunks(2) {
        let s = as_symbolish(interp, who, chunk[0])?;
        out.push((s, chunk[1]));
    }
    Ok(out)
}

fn bi_sublet(interp: &mut Interp, args: &[Value]) -> R {
    as_let(interp, "sublet", args[0])?;
    let bindings = binding_args(interp, "sublet", &args[1..])?;
    Ok(interp.sublet(args[0], &bindings))
}

fn bi_inlet(interp: &mut Interp, args: &[Value]) -> R {
    let bindings = binding_args(interp, "inlet", args)?;
    Ok(interp.inlet(&bindings))
}

fn bi_varlet(interp: &mut Interp, args: &[Value]) -> R {
    as_let(interp, "varlet", args[0])?;
    let bindings = binding_args(interp, "varlet", &args[1..])?;
    for (s, v) in bindings {
        interp.varlet(args[0], s, v);
    }
    Ok(args[0])
}

fn bi_let_ref(interp: &mut Interp, args: &[Value]) -> R {
    as_let(interp, "let-ref", args[0])?;
    let s = as_symbolish(interp, "let-ref", args[1])?;
    match interp.let_ref(args[0], s) {
        Some(v) => Ok(v),
        None => {
            let name = interp.symbols.name(s).to_string();
            Err(interp.make_condition(
                sym::UNBOUND_VARIABLE,
                &format!("let-ref: {} is unbound", name),
                &[args[1]],
            ))
        }
    }
}

fn bi_let_set(interp: &mut Interp, args: &[Value]) -> R {
    as_let(interp, "let-set!", args[0])?;
    let s = as_symbolish(interp, "let-set!", args[1])?;
    if interp.let_set(args[0], s, args[2]) {
        Ok(args[2])
    } else {
        let name = interp.symbols.name(s).to_string();
        Err(interp.make_condition(
            sym::UNBOUND_VARIABLE,
            &format!("let-set!: {} is unbound", name),
            &[args[1]],
        ))
    }
}

fn bi_openlet(interp: &mut Interp, args: &[Value]) -> R {
    as_let(interp, "openlet", args[0])?;
    interp.openlet(args[0]);
    Ok(args[0])
}

fn bi_coverlet(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_let(interp, "coverlet", args[0])?;
    crate::env::coverlet(&mut interp.heap, id);
    Ok(args[0])
}

fn bi_openlet_p(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_let(interp, "openlet?", args[0])?;
    Ok(bool_val(crate::env::is_openlet(&interp.heap, id)))
}

// === control ===

fn bi_throw(interp: &mut Interp, args: &[Value]) -> R {
    let info = interp.heap.list(&args[1..]);
    Err(Condition::new(args[0], info))
}

fn bi_gc(interp: &mut Interp, args: &[Value]) -> R {
    match args.first() {
        Some(v) => interp.gc_on(v.is_true()),
        None => interp.gc_now(),
    }
    Ok(Value::Unspecified)
}

// === I/O ===

fn port_write(interp: &mut Interp, port: Option<Value>, text: &str) -> std::result::Result<(), Condition> {
    match port {
        None => {
            print!("{}", text);
            Ok(())
        }
        Some(Value::Port(id)) => match interp.heap.obj_mut(id) {
            Obj::Port(PortObj::OutputString(s)) => {
                s.push_str(text);
                Ok(())
            }
            Obj::Port(PortObj::Stdout) => {
                print!("{}", text);
                Ok(())
            }
            _ => Err(interp.type_error("write", Value::Port(id), "an output port")),
        },
        Some(v) => Err(interp.type_error("write", v, "an output port")),
    }
}

fn bi_display(interp: &mut Interp, args: &[Value]) -> R {
    let text = printer::display_value(&interp.heap, &interp.symbols, args[0]);
    port_write(interp, args.get(1).copied(), &text)?;
    Ok(args[0])
}

fn bi_write(interp: &mut Interp, args: &[Value]) -> R {
    let text = printer::write_value(&interp.heap, &interp.symbols, args[0]);
    port_write(interp, args.get(1).copied(), &text)?;
    Ok(args[0])
}

fn bi_newline(interp: &mut Interp, args: &[Value]) -> R {
    port_write(interp, args.first().copied(), "\n")?;
    Ok(Value::Unspecified)
}

fn bi_open_input_string(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "open-input-string", args[0])?;
    let text = interp.heap.string(id).to_string();
    Ok(interp.make_input_string_port(text))
}

fn bi_open_output_string(interp: &mut Interp, _args: &[Value]) -> R {
    Ok(interp.make_output_string_port())
}

fn bi_get_output_string(interp: &mut Interp, args: &[Value]) -> R {
    match args[0] {
        Value::Port(id) => {
            let text = match interp.heap.obj(id) {
                Obj::Port(PortObj::OutputString(s)) => s.clone(),
                _ => return Err(interp.type_error("get-output-string", args[0], "an output string port")),
            };
            Ok(interp.heap.make_string(text))
        }
        v => Err(interp.type_error("get-output-string", v, "an output string port")),
    }
}

fn bi_current_output_port(interp: &mut Interp, _args: &[Value]) -> R {
    Ok(interp.heap.make_port(PortObj::Stdout))
}

fn bi_close_port(interp: &mut Interp, args: &[Value]) -> R {
    let Value::Port(id) = args[0] else {
        return Err(interp.type_error("close-port", args[0], "a port"));
    };
    *interp.heap.obj_mut(id) = Obj::Port(PortObj::Closed);
    Ok(Value::Unspecified)
}

fn bi_read_char(interp: &mut Interp, args: &[Value]) -> R {
    let Value::Port(id) = args[0] else {
        return Err(interp.type_error("read-char", args[0], "an input port"));
    };
    match interp.heap.obj_mut(id) {
        Obj::Port(PortObj::InputString { text, pos }) => match text[*pos..].chars().next() {
            Some(c) => {
                *pos += c.len_utf8();
                Ok(Value::Char(c))
            }
            None => Ok(Value::Eof),
        },
        _ => Err(interp.type_error("read-char", args[0], "an input port")),
    }
}

fn bi_read_string(interp: &mut Interp, args: &[Value]) -> R {
    let k = as_index(interp, "read-string", args[0])?;
    let Value::Port(id) = args[1] else {
        return Err(interp.type_error("read-string", args[1], "an input port"));
    };
    let taken = match interp.heap.obj_mut(id) {
        Obj::Port(PortObj::InputString { text, pos }) => {
            let s: String = text[*pos..].chars().take(k).collect();
            *pos += s.len();
            s
        }
        _ => return Err(interp.type_error("read-string", args[1], "an input port")),
    };
    if taken.is_empty() && k > 0 {
        return Ok(Value::Eof);
    }
    Ok(interp.heap.make_string(taken))
}

fn bi_load(interp: &mut Interp, args: &[Value]) -> R {
    let id = as_str(interp, "load", args[0])?;
    let path = interp.heap.string(id).to_string();
    match interp.load(&path) {
        Ok(v) => Ok(v),
        Err(crate::error::Error::Read(m)) => {
            Err(interp.make_condition(sym::READ_ERROR, &m, &[]))
        }
        Err(e) => Err(interp.make_condition(sym::IO_ERROR, &format!("load: {}", e), &[])),
    }
}

fn bi_gensym(interp: &mut Interp, args: &[Value]) -> R {
    let prefix = match args.first() {
        Some(Value::Str(id)) => interp.heap.string(*id).to_string(),
        Some(Value::Symbol(s)) => interp.symbols.name(*s).to_string(),
        Some(v) => return Err(interp.type_error("gensym", *v, "a string or symbol")),
        None => "g".to_string(),
    };
    Ok(Value::Symbol(interp.symbols.gensym(&prefix)))
}

fn bi_object_to_string(interp: &mut Interp, args: &[Value]) -> R {
    let s = printer::write_value(&interp.heap, &interp.symbols, args[0]);
    Ok(interp.heap.make_string(s))
}
