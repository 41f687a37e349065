use holmes::edsl::*;
use holmes::types::Value;
use holmes::{Error, Holmes, DB};

#[test]
fn script_builds_and_queries_a_program() {
    for db in [DB::Memory, DB::SqliteMemory] {
        let mut holmes = Holmes::new(db).unwrap();
        let out = holmes
            .execute(
                r#"
                # a tiny road network
                predicate road(string, string, uint64);
                predicate reach(string, string);
                fact road("oslo", "bergen", 463);
                fact road("bergen", "stavanger", 209);
                fact road("stavanger", "kristiansand", 232);
                rule reach_base: reach(A, B) <= road(A, B, _);
                rule reach_step: reach(A, C) <= reach(A, B), road(B, C, _);
                query reach("oslo", Town);
                query road(From, To, 209)
                "#,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].columns, vec!["Town".to_string()]);
        let mut towns = out[0].rows.clone();
        towns.sort();
        assert_eq!(
            towns,
            vec![
                vec![Value::from("bergen")],
                vec![Value::from("kristiansand")],
                vec![Value::from("stavanger")],
            ]
        );
        assert_eq!(out[1].columns, vec!["From".to_string(), "To".to_string()]);
        assert_eq!(out[1].rows, vec![vec![Value::from("bergen"), Value::from("stavanger")]]);
    }
}

#[test]
fn script_uses_named_types_and_composite_literals() {
    let mut holmes = Holmes::new(DB::SqliteMemory).unwrap();
    let out = holmes
        .execute(
            r#"
            type reading = (date, int64);
            predicate sensor(string, [reading], blob);
            fact sensor("s1", [(d"2024-01-31", -4), (d"2024-02-01", 3)], x"00ff");
            predicate sample(string, date, int64);
            rule samples: sample(S, D, T) <= sensor(S, L, _) where [(D, T)] = L;
            query sample("s1", D, -4)
            "#,
        )
        .unwrap();
    assert_eq!(out[0].rows.len(), 1);
    assert_eq!(out[0].rows[0][0].to_string(), "d\"2024-01-31\"");
    assert_eq!(
        holmes.get_type("reading"),
        Some(tuple(vec![date(), int64()]))
    );
}

#[test]
fn script_calls_registered_functions() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    holmes
        .new_func(func("plus_two", vec![uint64()], uint64(), |args| match &args[0] {
            Value::UInt64(n) => Value::UInt64(n + 2),
            other => other.clone(),
        }))
        .unwrap();
    let out = holmes
        .execute(
            "predicate raw(string, uint64);
             predicate score(string, uint64);
             fact raw(\"a\", 16);
             rule bump: score(N, M) <= raw(N, V) where M = plus_two(V);
             query score(N, M)",
        )
        .unwrap();
    assert_eq!(out[0].rows, vec![vec![Value::from("a"), Value::UInt64(18)]]);
}

#[test]
fn script_errors_surface() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    assert!(matches!(holmes.execute("predicate edge(string"), Err(Error::Parse { .. })));
    assert!(matches!(holmes.execute("fact edge(\"a\")"), Err(Error::UnknownPredicate(_))));
    assert!(matches!(holmes.execute("predicate edge(strin)"), Err(Error::UnknownType(_))));
    assert!(matches!(
        holmes.execute("predicate stamp(date); fact stamp(d\"2024-13-01\")"),
        Err(Error::Parse { .. })
    ));
    // statements before the failing one have run
    assert!(holmes.engine().get_predicate("stamp").is_some());
}

#[test]
fn empty_script_returns_nothing() {
    let mut holmes = Holmes::new(DB::Memory).unwrap();
    assert!(holmes.execute("").unwrap().is_empty());
    assert!(holmes.execute("# only a comment\n;;").unwrap().is_empty());
}
