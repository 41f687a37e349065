use holmes::edsl::*;
use holmes::engine::EngineSettings;
use holmes::types::Value;
use holmes::{Error, Holmes, DB};

fn sorted(holmes: &mut Holmes, q: Query) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = holmes
        .query(&q)
        .unwrap()
        .into_iter()
        .map(|b| b.into_values())
        .collect();
    rows.sort();
    rows
}

fn plus_two() -> holmes::engine::Func {
    func("plus_two", vec![uint64()], uint64(), |args| match &args[0] {
        Value::UInt64(n) => Value::UInt64(n + 2),
        other => other.clone(),
    })
}

fn test_pred(holmes: &mut Holmes) {
    holmes
        .new_predicate(&predicate("test_pred", vec![string(), blob(), uint64()]))
        .unwrap();
}

#[test]
fn register_where_rule() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    test_pred(&mut holmes);
    holmes
        .new_rule(
            rule("bar_from_foo")
                .head(atom("test_pred", vec![val("bar"), val(vec![2u8, 2]), var("x")]))
                .when(atom("test_pred", vec![val("foo"), any(), var("x")]))
                .bind(eq(42u64), lit(42u64)),
        )
        .unwrap();
}

#[test]
fn where_const() {
    for db in [DB::Memory, DB::SqliteMemory] {
        let mut holmes = Holmes::new(db).unwrap();
        test_pred(&mut holmes);
        holmes
            .new_rule(
                rule("bar_is_42")
                    .head(atom("test_pred", vec![val("bar"), val(vec![2u8, 2]), var("x")]))
                    .when(atom("test_pred", vec![val("foo"), any(), any()]))
                    .bind(bind("x"), lit(42u64)),
            )
            .unwrap();
        holmes
            .new_fact(&fact("test_pred", vec!["foo".into(), vec![0u8].into(), 16u64.into()]))
            .unwrap();
        let rows = sorted(&mut holmes, query(vec![atom("test_pred", vec![val("bar"), var("x"), var("y")])]));
        assert_eq!(rows, vec![vec![Value::Blob(vec![2, 2]), Value::UInt64(42)]]);
    }
}

#[test]
fn where_plus_two() {
    for db in [DB::Memory, DB::SqliteMemory] {
        let mut holmes = Holmes::new(db).unwrap();
        test_pred(&mut holmes);
        holmes.new_func(plus_two()).unwrap();
        holmes
            .new_rule(
                rule("bar_plus_two")
                    .head(atom("test_pred", vec![val("bar"), val(vec![2u8, 2]), var("y")]))
                    .when(atom("test_pred", vec![val("foo"), any(), var("x")]))
                    .bind(bind("y"), call("plus_two", vec![var_expr("x")])),
            )
            .unwrap();
        holmes
            .new_fact(&fact("test_pred", vec!["foo".into(), vec![0u8].into(), 16u64.into()]))
            .unwrap();
        let rows = sorted(&mut holmes, query(vec![atom("test_pred", vec![val("bar"), var("x"), var("y")])]));
        assert_eq!(rows, vec![vec![Value::Blob(vec![2, 2]), Value::UInt64(18)]]);
    }
}

#[test]
fn where_filter_drops_solutions() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_predicate(&predicate("num", vec![uint64()])).unwrap();
    holmes.new_predicate(&predicate("five_less_two", vec![uint64()])).unwrap();
    holmes.new_func(plus_two()).unwrap();
    holmes
        .new_rule(
            rule("only_five")
                .head(atom("five_less_two", vec![var("n")]))
                .when(atom("num", vec![var("n")]))
                .bind(eq(5u64), call("plus_two", vec![var_expr("n")])),
        )
        .unwrap();
    for n in [1u64, 3, 5] {
        holmes.new_fact(&fact("num", vec![n.into()])).unwrap();
    }
    let rows = sorted(&mut holmes, query(vec![atom("five_less_two", vec![var("n")])]));
    assert_eq!(rows, vec![vec![Value::UInt64(3)]]);
}

#[test]
fn iterate_binds_each_element() {
    let mut holmes = Holmes::new(DB::SqliteMemory).unwrap();
    holmes.new_predicate(&predicate("words", vec![string(), list(string())])).unwrap();
    holmes.new_predicate(&predicate("word", vec![string(), string()])).unwrap();
    holmes
        .new_rule(
            rule("split_words")
                .head(atom("word", vec![var("doc"), var("w")]))
                .when(atom("words", vec![var("doc"), var("ws")]))
                .bind(each(bind("w")), var_expr("ws")),
        )
        .unwrap();
    holmes
        .new_fact(&fact("words", vec!["d1".into(), list_val(vec!["a".into(), "b".into(), "a".into()])]))
        .unwrap();
    holmes
        .new_fact(&fact("words", vec!["d2".into(), list_val(vec![])]))
        .unwrap();
    let rows = sorted(&mut holmes, query(vec![atom("word", vec![var("d"), var("w")])]));
    assert_eq!(
        rows,
        vec![
            vec![Value::from("d1"), Value::from("a")],
            vec![Value::from("d1"), Value::from("b")],
        ]
    );
}

#[test]
fn destructure_splits_tuples() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes
        .new_predicate(&predicate("scored", vec![string(), tuple(vec![string(), uint64()])]))
        .unwrap();
    holmes
        .new_predicate(&predicate("flat", vec![string(), string(), uint64()]))
        .unwrap();
    holmes
        .new_rule(
            rule("flatten")
                .head(atom("flat", vec![var("n"), var("s"), var("v")]))
                .when(atom("scored", vec![var("n"), var("p")]))
                .bind(destructure(vec![bind("s"), bind("v")]), var_expr("p")),
        )
        .unwrap();
    holmes
        .new_fact(&fact("scored", vec!["ann".into(), tuple_val(vec!["math".into(), 9u64.into()])]))
        .unwrap();
    let rows = sorted(&mut holmes, query(vec![atom("flat", vec![var("n"), var("s"), var("v")])]));
    assert_eq!(rows, vec![vec![Value::from("ann"), Value::from("math"), Value::UInt64(9)]]);
}

#[test]
fn transitive_closure_reaches_fixpoint() {
    for db in [DB::Memory, DB::SqliteMemory] {
        let mut holmes = Holmes::new(db).unwrap();
        holmes.new_predicate(&predicate("edge", vec![string(), string()])).unwrap();
        holmes.new_predicate(&predicate("path", vec![string(), string()])).unwrap();
        holmes
            .new_rule(
                rule("path_base")
                    .head(atom("path", vec![var("x"), var("y")]))
                    .when(atom("edge", vec![var("x"), var("y")])),
            )
            .unwrap();
        holmes
            .new_rule(
                rule("path_step")
                    .head(atom("path", vec![var("x"), var("z")]))
                    .when(atom("path", vec![var("x"), var("y")]))
                    .when(atom("edge", vec![var("y"), var("z")])),
            )
            .unwrap();
        // a cycle keeps the rules productive until every pair is known
        for (a, b) in [("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")] {
            holmes.new_fact(&fact("edge", vec![a.into(), b.into()])).unwrap();
        }
        let from_a = sorted(&mut holmes, query(vec![atom("path", vec![val("a"), var("x")])]));
        assert_eq!(from_a.len(), 4);
        let all = sorted(&mut holmes, query(vec![atom("path", vec![var("x"), var("y")])]));
        assert_eq!(all.len(), 12);

        // facts added later extend the closure on the next query
        holmes.new_fact(&fact("edge", vec!["d".into(), "e".into()])).unwrap();
        let from_a = sorted(&mut holmes, query(vec![atom("path", vec![val("a"), var("x")])]));
        assert_eq!(from_a.len(), 5);
    }
}

#[test]
fn repeated_query_is_stable() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_predicate(&predicate("parent", vec![string(), string()])).unwrap();
    holmes.new_predicate(&predicate("grandparent", vec![string(), string()])).unwrap();
    holmes
        .new_rule(
            rule("grandparent_by_parent")
                .head(atom("grandparent", vec![var("x"), var("z")]))
                .when(atom("parent", vec![var("x"), var("y")]))
                .when(atom("parent", vec![var("y"), var("z")])),
        )
        .unwrap();
    holmes.new_fact(&fact("parent", vec!["ann".into(), "bob".into()])).unwrap();
    holmes.new_fact(&fact("parent", vec!["bob".into(), "cid".into()])).unwrap();
    let q = query(vec![atom("grandparent", vec![var("g"), var("c")])]);
    let first = sorted(&mut holmes, q.clone());
    let second = sorted(&mut holmes, q);
    assert_eq!(first, vec![vec![Value::from("ann"), Value::from("cid")]]);
    assert_eq!(first, second);
}

#[test]
fn runaway_rules_hit_the_iteration_limit() {
    let settings = EngineSettings { max_iterations: 5 };
    let mut holmes = Holmes::with_settings(DB::Memory, settings).unwrap();
    holmes.new_predicate(&predicate("count", vec![uint64()])).unwrap();
    holmes.new_func(plus_two()).unwrap();
    holmes
        .new_rule(
            rule("count_up")
                .head(atom("count", vec![var("n")]))
                .when(atom("count", vec![var("m")]))
                .bind(bind("n"), call("plus_two", vec![var_expr("m")])),
        )
        .unwrap();
    holmes.new_fact(&fact("count", vec![0u64.into()])).unwrap();
    let err = holmes
        .query(&query(vec![atom("count", vec![var("n")])]))
        .unwrap_err();
    assert!(matches!(err, Error::FixpointLimit(5)));
}

#[test]
fn invalid_rules_are_rejected() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_predicate(&predicate("edge", vec![string(), string()])).unwrap();
    holmes.new_predicate(&predicate("weight", vec![uint64()])).unwrap();

    let unknown_body = rule("uses_missing")
        .head(atom("edge", vec![var("x"), var("y")]))
        .when(atom("missing", vec![var("x"), var("y")]));
    assert!(matches!(holmes.new_rule(unknown_body), Err(Error::UnknownPredicate(_))));

    let unbound_head = rule("unbound")
        .head(atom("edge", vec![var("x"), var("z")]))
        .when(atom("edge", vec![var("x"), var("y")]));
    assert!(matches!(holmes.new_rule(unbound_head), Err(Error::Query(_))));

    let ill_typed_head = rule("ill_typed")
        .head(atom("weight", vec![var("x")]))
        .when(atom("edge", vec![var("x"), any()]));
    assert!(matches!(holmes.new_rule(ill_typed_head), Err(Error::Type(_))));

    let unknown_func = rule("no_func")
        .head(atom("edge", vec![var("x"), var("y")]))
        .when(atom("edge", vec![var("x"), any()]))
        .bind(bind("y"), call("nope", vec![var_expr("x")]));
    assert!(matches!(holmes.new_rule(unknown_func), Err(Error::UnknownFunction(_))));

    assert!(holmes.engine().rules().is_empty());
}

#[test]
fn mixed_list_literal_is_rejected_up_front() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_predicate(&predicate("src", vec![uint64()])).unwrap();
    holmes.new_predicate(&predicate("dst", vec![uint64(), list(uint64())])).unwrap();
    holmes.new_predicate(&predicate("other", vec![uint64()])).unwrap();
    let mixed = rule("mixed")
        .head(atom("dst", vec![var("n"), var("l")]))
        .when(atom("src", vec![var("n")]))
        .bind(bind("l"), lit(list_val(vec![1u64.into(), "a".into()])));
    assert!(matches!(holmes.new_rule(mixed), Err(Error::Type(_))));
    assert!(holmes.engine().rules().is_empty());

    holmes.new_fact(&fact("src", vec![1u64.into()])).unwrap();
    holmes.new_fact(&fact("other", vec![7u64.into()])).unwrap();
    let rows = sorted(&mut holmes, query(vec![atom("other", vec![var("n")])]));
    assert_eq!(rows, vec![vec![Value::UInt64(7)]]);
}

#[test]
fn rule_names_are_unique() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_predicate(&predicate("edge", vec![string(), string()])).unwrap();
    let flip = rule("flip")
        .head(atom("edge", vec![var("y"), var("x")]))
        .when(atom("edge", vec![var("x"), var("y")]));
    holmes.new_rule(flip.clone()).unwrap();
    holmes.new_rule(flip).unwrap();
    let other = rule("flip")
        .head(atom("edge", vec![var("x"), var("x")]))
        .when(atom("edge", vec![var("x"), any()]));
    assert!(matches!(holmes.new_rule(other), Err(Error::RuleConflict(_))));
    assert_eq!(holmes.engine().rules().len(), 1);
}

#[test]
fn unknown_predicate_query_fails() {
    let mut holmes = Holmes::new(DB::SqliteMemory).unwrap();
    holmes.new_predicate(&predicate("edge", vec![string(), string()])).unwrap();
    let err = holmes
        .query(&query(vec![
            atom("edge", vec![var("x"), var("y")]),
            atom("missing", vec![var("y")]),
        ]))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownPredicate(_)));
}

#[test]
fn functions_register_once() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes.new_func(plus_two()).unwrap();
    assert!(matches!(holmes.new_func(plus_two()), Err(Error::FunctionExists(_))));
}
