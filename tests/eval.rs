use shed::{Interp, Value};

fn eval(interp: &mut Interp, src: &str) -> Value {
    interp
        .eval_str(src)
        .unwrap_or_else(|err| panic!("failed to eval `{}`: {}", src, err))
}

fn shown(interp: &mut Interp, src: &str) -> String {
    let v = eval(interp, src);
    interp.object_to_string(v)
}

#[test]
fn arithmetic_folds_left_to_right() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(+ 1 2 3)"), Value::Int(6));
    assert_eq!(eval(&mut it, "(- 10 3 2)"), Value::Int(5));
    assert_eq!(eval(&mut it, "(* 2 3 4)"), Value::Int(24));
    assert_eq!(eval(&mut it, "(- 5)"), Value::Int(-5));
}

#[test]
fn division_produces_exact_ratios() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(/ 1 3)"), Value::Ratio(1, 3));
    assert_eq!(eval(&mut it, "(/ 6 3)"), Value::Int(2));
    assert_eq!(eval(&mut it, "(+ 1/3 2/3)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(* 1/2 4)"), Value::Int(2));
}

#[test]
fn mixed_arithmetic_contagion() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(+ 1 2.5)"), Value::Real(3.5));
    assert_eq!(eval(&mut it, "(+ 1/2 0.5)"), Value::Real(1.0));
    assert_eq!(eval(&mut it, "(* 2 1+1i)"), Value::Complex(2.0, 2.0));
}

#[test]
fn comparisons_are_exact_across_kinds() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(< 1 2 3)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(< 1 3 2)"), Value::Bool(false));
    assert_eq!(eval(&mut it, "(= 1/2 0.5)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(<= 1 1 2)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(> 3 2 1)"), Value::Bool(true));
}

#[test]
fn if_and_booleans() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(if #t 1 2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(if #f 1 2)"), Value::Int(2));
    // only #f is false
    assert_eq!(eval(&mut it, "(if 0 1 2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(if '() 1 2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(if #f 1)"), Value::Unspecified);
}

#[test]
fn define_and_set() {
    let mut it = Interp::new();
    eval(&mut it, "(define x 10)");
    assert_eq!(eval(&mut it, "x"), Value::Int(10));
    eval(&mut it, "(set! x 20)");
    assert_eq!(eval(&mut it, "x"), Value::Int(20));
}

#[test]
fn set_of_unbound_variable_is_an_error() {
    let mut it = Interp::new();
    let err = it.eval_str("(set! nowhere 1)").unwrap_err();
    assert!(err.to_string().contains("unbound-variable"), "{}", err);
}

#[test]
fn closures_capture_their_environment() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define (make-counter)
           (let ((n 0))
             (lambda () (set! n (+ n 1)) n)))",
    );
    eval(&mut it, "(define c (make-counter))");
    assert_eq!(eval(&mut it, "(c)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(c)"), Value::Int(2));
    eval(&mut it, "(define d (make-counter))");
    assert_eq!(eval(&mut it, "(d)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(c)"), Value::Int(3));
}

#[test]
fn inner_bindings_shadow_outer() {
    let mut it = Interp::new();
    eval(&mut it, "(define x 1)");
    eval(&mut it, "(define (f) x)");
    assert_eq!(shown(&mut it, "(let ((x 2)) (list x (f)))"), "(2 1)");
    assert_eq!(eval(&mut it, "x"), Value::Int(1));
}

#[test]
fn let_star_sees_earlier_bindings() {
    let mut it = Interp::new();
    assert_eq!(
        eval(&mut it, "(let* ((a 1) (b (+ a 1)) (c (* b 2))) c)"),
        Value::Int(4)
    );
}

#[test]
fn letrec_allows_mutual_recursion() {
    let mut it = Interp::new();
    let v = eval(
        &mut it,
        "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
                  (odd?  (lambda (n) (if (= n 0) #f (even? (- n 1))))))
           (even? 10))",
    );
    assert_eq!(v, Value::Bool(true));
}

#[test]
fn named_let_loops_in_constant_space() {
    let mut it = Interp::new();
    let v = eval(
        &mut it,
        "(let loop ((i 0) (acc 0))
           (if (= i 100000) acc (loop (+ i 1) (+ acc 1))))",
    );
    assert_eq!(v, Value::Int(100000));
}

#[test]
fn deep_tail_recursion_does_not_grow_the_stack() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define (count-down n) (if (= n 0) 'done (count-down (- n 1))))",
    );
    let v = shown(&mut it, "(count-down 200000)");
    assert_eq!(v, "done");
}

#[test]
fn begin_returns_the_last_value() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(begin 1 2 3)"), Value::Int(3));
    assert_eq!(eval(&mut it, "(begin)"), Value::Unspecified);
}

#[test]
fn and_or_short_circuit() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(and 1 2 3)"), Value::Int(3));
    assert_eq!(eval(&mut it, "(and 1 #f 3)"), Value::Bool(false));
    assert_eq!(eval(&mut it, "(and)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(or #f 2 3)"), Value::Int(2));
    assert_eq!(eval(&mut it, "(or)"), Value::Bool(false));
    // the short-circuited branch must never run
    eval(&mut it, "(define hit #f)");
    eval(&mut it, "(or 1 (set! hit #t))");
    assert_eq!(eval(&mut it, "hit"), Value::Bool(false));
}

#[test]
fn cond_with_else_and_arrow() {
    let mut it = Interp::new();
    assert_eq!(
        eval(&mut it, "(cond (#f 1) (#t 2) (else 3))"),
        Value::Int(2)
    );
    assert_eq!(eval(&mut it, "(cond (#f 1) (else 3))"), Value::Int(3));
    assert_eq!(
        eval(&mut it, "(cond ((assq 'b '((a 1) (b 2))) => cadr) (else 'no))"),
        Value::Int(2)
    );
    // a test with no body yields the test value
    assert_eq!(eval(&mut it, "(cond (#f) (42))"), Value::Int(42));
}

#[test]
fn when_and_unless() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(when (> 2 1) 'a 'b)"), eval(&mut it, "'b"));
    assert_eq!(eval(&mut it, "(when (< 2 1) 'a)"), Value::Unspecified);
    assert_eq!(eval(&mut it, "(unless (< 2 1) 'c)"), eval(&mut it, "'c"));
}

#[test]
fn quasiquote_splices_and_nests() {
    let mut it = Interp::new();
    eval(&mut it, "(define xs '(2 3))");
    assert_eq!(shown(&mut it, "`(1 ,@xs 4)"), "(1 2 3 4)");
    assert_eq!(shown(&mut it, "`(1 ,(+ 1 1) 3)"), "(1 2 3)");
    assert_eq!(shown(&mut it, "`(a . ,(car xs))"), "(a . 2)");
    assert_eq!(shown(&mut it, "``(a ,b)"), "`(a ,b)");
}

#[test]
fn macros_expand_before_evaluation() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define-macro (swap! a b)
           `(let ((tmp ,a)) (set! ,a ,b) (set! ,b tmp)))",
    );
    eval(&mut it, "(define p 1) (define q 2)");
    eval(&mut it, "(swap! p q)");
    assert_eq!(shown(&mut it, "(list p q)"), "(2 1)");
}

#[test]
fn macro_star_accepts_keywords() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define-macro* (incr! var (by 1)) `(set! ,var (+ ,var ,by)))",
    );
    eval(&mut it, "(define n 10)");
    eval(&mut it, "(incr! n)");
    assert_eq!(eval(&mut it, "n"), Value::Int(11));
    eval(&mut it, "(incr! n :by 5)");
    assert_eq!(eval(&mut it, "n"), Value::Int(16));
}

#[test]
fn list_operations() {
    let mut it = Interp::new();
    assert_eq!(shown(&mut it, "(append '(1 2) '(3) '())"), "(1 2 3)");
    assert_eq!(shown(&mut it, "(reverse '(1 2 3))"), "(3 2 1)");
    assert_eq!(eval(&mut it, "(length '(a b c))"), Value::Int(3));
    assert_eq!(eval(&mut it, "(list-ref '(a b c) 1)"), eval(&mut it, "'b"));
    assert_eq!(shown(&mut it, "(memq 'b '(a b c))"), "(b c)");
    assert_eq!(eval(&mut it, "(memq 'z '(a b c))"), Value::Bool(false));
    assert_eq!(shown(&mut it, "(assq 'b '((a 1) (b 2)))"), "(b 2)");
    assert_eq!(shown(&mut it, "(cons 1 2)"), "(1 . 2)");
}

#[test]
fn equality_predicates() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(eq? 'a 'a)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(eq? '(1) '(1))"), Value::Bool(false));
    assert_eq!(eval(&mut it, "(equal? '(1 (2)) '(1 (2)))"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(equal? \"ab\" \"ab\")"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(eqv? 1.5 1.5)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(not #f)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(not 0)"), Value::Bool(false));
}

#[test]
fn string_operations() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(string-length \"hello\")"), Value::Int(5));
    assert_eq!(shown(&mut it, "(substring \"hello\" 1 3)"), "\"el\"");
    assert_eq!(shown(&mut it, "(string-append \"foo\" \"bar\")"), "\"foobar\"");
    assert_eq!(eval(&mut it, "(string=? \"a\" \"a\")"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(string-ref \"abc\" 1)"), Value::Char('b'));
    assert_eq!(shown(&mut it, "(string->symbol \"abc\")"), "abc");
    assert_eq!(shown(&mut it, "(symbol->string 'abc)"), "\"abc\"");
    assert_eq!(shown(&mut it, "(list->string '(#\\a #\\b))"), "\"ab\"");
}

#[test]
fn vectors_index_and_convert() {
    let mut it = Interp::new();
    eval(&mut it, "(define v (make-vector 3 0))");
    eval(&mut it, "(vector-set! v 1 'x)");
    assert_eq!(shown(&mut it, "v"), "#(0 x 0)");
    assert_eq!(shown(&mut it, "(vector-ref v 1)"), "x");
    assert_eq!(eval(&mut it, "(vector-length v)"), Value::Int(3));
    assert_eq!(shown(&mut it, "(vector->list #(1 2))"), "(1 2)");
    assert_eq!(shown(&mut it, "(list->vector '(1 2))"), "#(1 2)");
    // vectors are applicable to an index
    assert_eq!(eval(&mut it, "(#(5 6 7) 2)"), Value::Int(7));
}

#[test]
fn typed_vectors_hold_their_kind() {
    let mut it = Interp::new();
    eval(&mut it, "(define iv (make-int-vector 3 7))");
    assert_eq!(eval(&mut it, "(vector-ref iv 0)"), Value::Int(7));
    eval(&mut it, "(vector-set! iv 0 9)");
    assert_eq!(eval(&mut it, "(vector-ref iv 0)"), Value::Int(9));
    eval(&mut it, "(define fv (make-float-vector 2 0.5))");
    assert_eq!(eval(&mut it, "(vector-ref fv 1)"), Value::Real(0.5));
}

#[test]
fn hash_tables_store_and_apply() {
    let mut it = Interp::new();
    eval(&mut it, "(define h (make-hash-table))");
    eval(&mut it, "(hash-table-set! h 'a 1)");
    eval(&mut it, "(hash-table-set! h \"key\" 2)");
    assert_eq!(eval(&mut it, "(hash-table-ref h 'a)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(hash-table-ref h \"key\")"), Value::Int(2));
    assert_eq!(eval(&mut it, "(hash-table-ref h 'zzz)"), Value::Bool(false));
    // hash tables are applicable to a key
    assert_eq!(eval(&mut it, "(h 'a)"), Value::Int(1));
}

#[test]
fn string_ports_collect_output() {
    let mut it = Interp::new();
    eval(&mut it, "(define p (open-output-string))");
    eval(&mut it, "(display \"x=\" p) (display 42 p) (newline p)");
    assert_eq!(shown(&mut it, "(get-output-string p)"), "\"x=42\\n\"");
    eval(&mut it, "(define in (open-input-string \"abc\"))");
    assert_eq!(eval(&mut it, "(read-char in)"), Value::Char('a'));
    assert_eq!(shown(&mut it, "(read-string 2 in)"), "\"bc\"");
}

#[test]
fn closed_ports_reject_io() {
    let mut it = Interp::new();
    eval(&mut it, "(define p (open-output-string))");
    eval(&mut it, "(display \"x\" p)");
    eval(&mut it, "(close-output-port p)");
    let err = it.eval_str("(display \"y\" p)").unwrap_err();
    assert!(err.to_string().contains("wrong-type-arg"), "{}", err);
    eval(&mut it, "(define in (open-input-string \"abc\"))");
    eval(&mut it, "(close-input-port in)");
    let err = it.eval_str("(read-char in)").unwrap_err();
    assert!(err.to_string().contains("wrong-type-arg"), "{}", err);
}

#[test]
fn current_output_port_is_a_port_value() {
    let mut it = Interp::new();
    eval(&mut it, "(define p (current-output-port))");
    // writing an empty string exercises the port without producing output
    eval(&mut it, "(display \"\" p)");
    assert_eq!(shown(&mut it, "p"), "#<stdout-port>");
}

#[test]
fn display_and_write_differ_on_strings() {
    let mut it = Interp::new();
    eval(&mut it, "(define p (open-output-string))");
    eval(&mut it, "(display \"hi\" p) (write \"hi\" p)");
    assert_eq!(shown(&mut it, "(get-output-string p)"), "\"hi\\\"hi\\\"\"");
}

#[test]
fn predicates_classify_values() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(pair? '(1))"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(pair? '())"), Value::Bool(false));
    assert_eq!(eval(&mut it, "(null? '())"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(symbol? 'a)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(keyword? :a)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(procedure? car)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(procedure? (lambda (x) x))"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(integer? 3)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(rational? 1/2)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(real? 1.5)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(number? 1+2i)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(defined? 'car)"), Value::Bool(true));
    assert_eq!(eval(&mut it, "(defined? 'no-such-thing)"), Value::Bool(false));
}

#[test]
fn numeric_accessors() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(numerator 3/4)"), Value::Int(3));
    assert_eq!(eval(&mut it, "(denominator 3/4)"), Value::Int(4));
    assert_eq!(eval(&mut it, "(real-part 1+2i)"), Value::Real(1.0));
    assert_eq!(eval(&mut it, "(imag-part 1+2i)"), Value::Real(2.0));
    assert_eq!(eval(&mut it, "(floor 3/2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(ceiling 3/2)"), Value::Int(2));
    assert_eq!(eval(&mut it, "(abs -5)"), Value::Int(5));
    assert_eq!(eval(&mut it, "(min 3 1 2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(max 3 1 2)"), Value::Int(3));
    assert_eq!(eval(&mut it, "(quotient 7 2)"), Value::Int(3));
    assert_eq!(eval(&mut it, "(remainder 7 2)"), Value::Int(1));
    assert_eq!(eval(&mut it, "(modulo -7 2)"), Value::Int(1));
}

#[test]
fn number_string_conversions() {
    let mut it = Interp::new();
    assert_eq!(shown(&mut it, "(number->string 42)"), "\"42\"");
    assert_eq!(eval(&mut it, "(string->number \"42\")"), Value::Int(42));
    assert_eq!(eval(&mut it, "(string->number \"1/2\")"), Value::Ratio(1, 2));
    assert_eq!(eval(&mut it, "(string->number \"nope\")"), Value::Bool(false));
}

#[test]
fn gensym_makes_fresh_symbols() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(eq? (gensym) (gensym))"), Value::Bool(false));
    assert_eq!(eval(&mut it, "(symbol? (gensym \"tmp\"))"), Value::Bool(true));
}

#[test]
fn eval_runs_data_as_code() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(eval '(+ 1 2))"), Value::Int(3));
    assert_eq!(
        eval(&mut it, "(eval 'x (inlet 'x 99))"),
        Value::Int(99)
    );
}

#[test]
fn apply_spreads_the_final_list() {
    let mut it = Interp::new();
    assert_eq!(eval(&mut it, "(apply + '(1 2 3))"), Value::Int(6));
    assert_eq!(eval(&mut it, "(apply + 1 2 '(3 4))"), Value::Int(10));
    assert_eq!(shown(&mut it, "(apply list '())"), "()");
}

#[test]
fn delay_and_force_memoize() {
    let mut it = Interp::new();
    eval(&mut it, "(define hits 0)");
    eval(&mut it, "(define p (delay (begin (set! hits (+ hits 1)) 42)))");
    assert_eq!(eval(&mut it, "hits"), Value::Int(0));
    assert_eq!(eval(&mut it, "(force p)"), Value::Int(42));
    assert_eq!(eval(&mut it, "(force p)"), Value::Int(42));
    assert_eq!(eval(&mut it, "hits"), Value::Int(1));
}

#[test]
fn definitions_persist_across_eval_calls() {
    let mut it = Interp::new();
    eval(&mut it, "(define (sq x) (* x x))");
    assert_eq!(eval(&mut it, "(sq 7)"), Value::Int(49));
}
