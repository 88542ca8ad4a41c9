use shed::{Interp, Value};

fn eval(interp: &mut Interp, src: &str) -> Value {
    interp
        .eval_str(src)
        .unwrap_or_else(|err| panic!("failed to eval `{}`: {}", src, err))
}

#[test]
fn cyclic_garbage_is_collected() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define (churn n)
           (if (= n 0)
               'done
               (let ((c (cons 1 2)))
                 (set-cdr! c c)
                 (churn (- n 1)))))",
    );
    eval(&mut it, "(churn 5000)");
    let before = it.heap.live_count();
    it.gc_now();
    let after = it.heap.live_count();
    assert!(
        after < before,
        "expected collection to reclaim cells ({} -> {})",
        before,
        after
    );
}

#[test]
fn protected_values_survive_collection() {
    let mut it = Interp::new();
    let v = eval(&mut it, "(list 1 2 3)");
    let slot = it.gc_protect(v);
    eval(
        &mut it,
        "(let loop ((n 2000)) (if (= n 0) 'done (begin (cons n n) (loop (- n 1)))))",
    );
    it.gc_now();
    assert!(v.is_eq(it.gc_protected_at(slot)));
    assert_eq!(it.object_to_string(v), "(1 2 3)");
    it.gc_unprotect_at(slot);
    assert_eq!(it.gc_protected_at(slot), Value::Undefined);
}

#[test]
fn protection_slots_are_reused() {
    let mut it = Interp::new();
    let a = eval(&mut it, "(cons 1 2)");
    let b = eval(&mut it, "(cons 3 4)");
    let s1 = it.gc_protect(a);
    let s2 = it.gc_protect(b);
    assert_ne!(s1, s2);
    it.gc_unprotect_at(s1);
    let s3 = it.gc_protect(b);
    assert_eq!(s1, s3);
    it.gc_unprotect_at(s2);
    it.gc_unprotect_at(s3);
}

#[test]
fn globals_survive_repeated_collections() {
    let mut it = Interp::new();
    eval(&mut it, "(define keep (list 'a 'b (vector 1 2) \"s\"))");
    for _ in 0..3 {
        eval(
            &mut it,
            "(let loop ((n 1000)) (if (= n 0) #t (begin (list n n n) (loop (- n 1)))))",
        );
        it.gc_now();
    }
    let kept = eval(&mut it, "keep");
    assert_eq!(it.object_to_string(kept), "(a b #(1 2) \"s\")");
}

#[test]
fn disabling_gc_defers_collection() {
    let mut it = Interp::new();
    it.gc_on(false);
    eval(
        &mut it,
        "(let loop ((n 500)) (if (= n 0) 'done (begin (cons n n) (loop (- n 1)))))",
    );
    let piled = it.heap.live_count();
    it.gc_on(true);
    // an explicit request reclaims the pile
    it.gc_now();
    assert!(it.heap.live_count() < piled);
}

#[test]
fn closure_environments_are_retained() {
    let mut it = Interp::new();
    eval(
        &mut it,
        "(define f (let ((secret 1234)) (lambda () secret)))",
    );
    eval(
        &mut it,
        "(let loop ((n 3000)) (if (= n 0) 'done (begin (cons n n) (loop (- n 1)))))",
    );
    it.gc_now();
    assert_eq!(eval(&mut it, "(f)"), Value::Int(1234));
}

#[test]
fn heap_grows_rather_than_failing() {
    let mut it = Interp::new();
    let start = it.heap.total_cells();
    it.gc_on(false);
    eval(
        &mut it,
        "(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc))))",
    );
    eval(&mut it, "(define big (build 100000 '()))");
    assert!(it.heap.total_cells() >= start);
    assert_eq!(eval(&mut it, "(length big)"), Value::Int(100000));
    it.gc_on(true);
}

#[test]
fn scheme_level_gc_builtin() {
    let mut it = Interp::new();
    eval(&mut it, "(define keep '(1 2 3))");
    eval(&mut it, "(gc)");
    let kept = eval(&mut it, "keep");
    assert_eq!(it.object_to_string(kept), "(1 2 3)");
    // (gc #f) turns collection off, (gc #t) back on
    eval(&mut it, "(gc #f)");
    assert!(!it.heap.gc_enabled());
    eval(&mut it, "(gc #t)");
    assert!(it.heap.gc_enabled());
}
