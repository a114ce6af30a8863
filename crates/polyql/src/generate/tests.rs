use super::*;
use crate::condition::Membership;
use crate::dialect::{MySql, Postgres};
use crate::state::{ColumnValues, Direction, JoinCondition};
use crate::weighted::WeightedCondition;

fn pg_numbers(sql: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                out.push(sql[start..end].parse().unwrap());
            }
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

fn composed_state() -> QueryState {
    let mut inner = QueryState::from_table("inner_t");
    inner.where_("x", Comparator::Eq, 1);

    let mut state = QueryState::new();
    state
        .from_subquery(&inner, "u")
        .weighted_where("name", Comparator::Eq, "bob", 10.0, 0)
        .join(
            "profiles p",
            JoinCondition::custom(|c| {
                c.on("p.user_id", Comparator::Eq, "u.id")
                    .where_("p.kind", Comparator::Eq, "main");
            }),
        )
        .where_("u.age", Comparator::Gt, 18)
        .group_by(["u.id"])
        .order_by("u.name", Direction::Asc)
        .limit(10)
        .offset(20);
    state.having().where_("COUNT(*)", Comparator::Gt, 2);
    state
}

#[test]
fn select_basic() {
    let state = QueryState::from_table("users");
    let fragment = Generator::new(&MySql::new()).select(&state).unwrap();
    assert_eq!(fragment.sql, "SELECT * FROM users");
    assert!(fragment.params.is_empty());
}

#[test]
fn select_without_target_fails() {
    let state = QueryState::new();
    let err = Generator::new(&MySql::new()).select(&state).unwrap_err();
    assert!(err.is_no_target());
    assert!(Generator::new(&MySql::new()).update(&state).unwrap_err().is_no_target());
    assert!(Generator::new(&MySql::new()).delete(&state).unwrap_err().is_no_target());
    assert!(Generator::new(&MySql::new()).count(&state).unwrap_err().is_no_target());
}

#[test]
fn composed_select_numbers_without_gaps() {
    let state = composed_state();
    let fragment = Generator::new(&Postgres::new()).select(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "SELECT *, CASE WHEN name = $1 THEN 10 ELSE 0 END __condition_weight__ \
         FROM (SELECT * FROM inner_t WHERE x = $2) u \
         JOIN profiles p ON p.user_id = u.id AND p.kind = $3 \
         WHERE u.age > $4 GROUP BY u.id HAVING COUNT(*) > $5 \
         ORDER BY __condition_weight__ DESC, u.name ASC LIMIT 10 OFFSET 20"
    );
    assert_eq!(
        fragment.params,
        vec![
            Value::from("bob"),
            Value::Int(1),
            Value::from("main"),
            Value::Int(18),
            Value::Int(2),
        ]
    );
    assert_eq!(pg_numbers(&fragment.sql), vec![1, 2, 3, 4, 5]);
    assert_eq!(fragment.param_names, vec!["1", "2", "3", "4", "5"]);
}

#[test]
fn composed_select_unlabeled_keeps_value_order() {
    let state = composed_state();
    let fragment = Generator::new(&MySql::new()).select(&state).unwrap();
    assert_eq!(fragment.sql.matches('?').count(), 5);
    assert!(fragment.sql.starts_with("SELECT *, IF(name = ?, 10, 0) __condition_weight__ FROM"));
    assert_eq!(fragment.params[0], Value::from("bob"));
    assert_eq!(fragment.params[4], Value::Int(2));
}

#[test]
fn nested_subqueries_and_weights_share_one_counter() {
    let mut deepest = QueryState::from_table("c");
    deepest.columns(["id"]).where_("flag", Comparator::Eq, true);

    let mut middle = QueryState::from_table("b");
    middle
        .columns(["id"])
        .where_("kind", Comparator::Eq, "k")
        .where_in("c_id", &deepest);

    let nested = WeightedCondition::new("score", Comparator::Gt, 50, 5.0, 0);
    let mut state = QueryState::from_table("a");
    state
        .add_weighted(WeightedCondition::new("title", Comparator::Like, "%x%", 10.0, nested))
        .where_in("b_id", &middle)
        .left_join(Target::subquery(&middle, "bb"), JoinCondition::keys("bb.id", "a.b_id"))
        .where_("active", Comparator::Eq, true);

    let fragment = Generator::new(&Postgres::new()).select(&state).unwrap();
    let numbers = pg_numbers(&fragment.sql);
    assert_eq!(numbers, (1..=fragment.params.len()).collect::<Vec<_>>());
    assert_eq!(fragment.params.len(), 7);
    assert_eq!(fragment.params[0], Value::from("%x%"));
    assert_eq!(fragment.params[1], Value::Int(50));
    assert!(fragment.sql.contains("LEFT JOIN (SELECT id FROM b WHERE kind = $3"));
    assert!(fragment.sql.contains(") bb ON bb.id = a.b_id"));
}

#[test]
fn literal_weight_leaves_parameters_to_where() {
    let mut state = QueryState::from_table("posts");
    state
        .weighted_where_literal("status", Comparator::Eq, 1, 10.0, 0)
        .where_("author", Comparator::Eq, "bob");
    let fragment = Generator::new(&MySql::new()).select(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "SELECT *, IF(status = 1, 10, 0) __condition_weight__ FROM posts WHERE author = ? \
         ORDER BY __condition_weight__ DESC"
    );
    assert_eq!(fragment.params, vec![Value::from("bob")]);
}

#[test]
fn join_by_keys_is_literal() {
    let mut state = QueryState::from_table("users");
    state.join("orders", JoinCondition::keys("users.id", "orders.user_id"));
    let fragment = Generator::new(&MySql::new()).select(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "SELECT * FROM users JOIN orders ON users.id = orders.user_id"
    );
    assert!(fragment.params.is_empty());
}

#[test]
fn identifiers_are_escaped_per_dialect() {
    let mut state = QueryState::from_table("order");
    state
        .columns(["id", "order.check"])
        .order_by("select", Direction::Desc);
    assert_eq!(
        Generator::new(&MySql::new()).select(&state).unwrap().sql,
        "SELECT id, `order`.`check` FROM `order` ORDER BY `select` DESC"
    );
    assert_eq!(
        Generator::new(&Postgres::new()).select(&state).unwrap().sql,
        "SELECT id, \"order\".\"check\" FROM \"order\" ORDER BY \"select\" DESC"
    );
}

#[test]
fn select_is_idempotent() {
    let state = composed_state();
    let pg = Postgres::new();
    let generator = Generator::new(&pg);
    let first = generator.select(&state).unwrap();
    let second = generator.select(&state).unwrap();
    assert_eq!(first, second);
    assert_eq!(state, composed_state());
}

#[test]
fn insert_single_row() {
    let mut state = QueryState::from_table("users");
    state.insert([ColumnValues::new().set("name", "alice").set("age", 30)]);

    let fragment = Generator::new(&MySql::new()).insert(&state).unwrap();
    assert_eq!(fragment.sql, "INSERT INTO users (name, age) VALUES (?, ?)");
    assert_eq!(fragment.params, vec![Value::from("alice"), Value::Int(30)]);
}

#[test]
fn insert_batch_with_returning() {
    let mut state = QueryState::from_table("users");
    state
        .insert(vec![
            vec![("name", Value::from("a")), ("age", Value::from(1))],
            vec![("name", Value::from("b")), ("age", Value::from(2))],
        ])
        .set_incrementing_field("id");

    let fragment = Generator::new(&Postgres::new()).insert(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "INSERT INTO users (name, age) VALUES ($1, $2), ($3, $4) RETURNING id"
    );
    assert_eq!(fragment.params.len(), 4);

    let fragment = Generator::new(&MySql::new()).insert(&state).unwrap();
    assert_eq!(fragment.sql, "INSERT INTO users (name, age) VALUES (?, ?), (?, ?)");
}

#[test]
fn insert_literal_inlines_values() {
    let mut state = QueryState::from_table("logs");
    state.insert_literal([ColumnValues::new().set("at", "NOW()")]);
    let fragment = Generator::new(&Postgres::new()).insert(&state).unwrap();
    assert_eq!(fragment.sql, "INSERT INTO logs (at) VALUES (NOW())");
    assert!(fragment.params.is_empty());
}

#[test]
fn insert_rejects_malformed_rows() {
    let mysql = MySql::new();
    let generator = Generator::new(&mysql);

    let mut state = QueryState::from_table("users");
    state.insert(Vec::<ColumnValues>::new());
    assert!(generator.insert(&state).unwrap_err().is_invalid_argument());

    state.insert([ColumnValues::new()]);
    assert!(generator.insert(&state).unwrap_err().is_invalid_argument());

    state.insert([
        ColumnValues::new().set("a", 1).set("b", 2),
        ColumnValues::new().set("b", 2).set("a", 1),
    ]);
    assert!(generator.insert(&state).unwrap_err().is_invalid_argument());

    let mut no_target = QueryState::new();
    no_target.insert([ColumnValues::new().set("a", 1)]);
    assert!(generator.insert(&no_target).unwrap_err().is_no_target());
}

#[test]
fn update_where_continues_after_set() {
    let mut state = QueryState::from_table("users");
    state
        .update(ColumnValues::new().set("name", "bob").set("age", 31))
        .where_("id", Comparator::Eq, 7)
        .where_in("role", vec!["a", "b"]);

    let fragment = Generator::new(&Postgres::new()).update(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "UPDATE users SET name = $1, age = $2 WHERE id = $3 AND role IN ($4, $5)"
    );
    assert_eq!(
        fragment.params,
        vec![
            Value::from("bob"),
            Value::Int(31),
            Value::Int(7),
            Value::from("a"),
            Value::from("b"),
        ]
    );
}

#[test]
fn update_requires_values() {
    let mut state = QueryState::from_table("users");
    let mysql = MySql::new();
    let generator = Generator::new(&mysql);
    assert!(generator.update(&state).unwrap_err().is_invalid_argument());
    state.update(ColumnValues::new());
    assert!(generator.update(&state).unwrap_err().is_invalid_argument());
}

#[test]
fn update_literal_and_subquery_target() {
    let mut state = QueryState::from_table("counters");
    state
        .update_literal(ColumnValues::new().set("hits", "hits + 1"))
        .where_("id", Comparator::Eq, 1);
    let fragment = Generator::new(&MySql::new()).update(&state).unwrap();
    assert_eq!(fragment.sql, "UPDATE counters SET hits = hits + 1 WHERE id = ?");

    let inner = QueryState::from_table("x");
    let mut derived = QueryState::new();
    derived
        .from_subquery(&inner, "d")
        .update(ColumnValues::new().set("a", 1));
    assert!(
        Generator::new(&MySql::new())
            .update(&derived)
            .unwrap_err()
            .is_invalid_argument()
    );
}

#[test]
fn delete_uses_fresh_counter() {
    let mut state = QueryState::from_table("sessions");
    state
        .where_("expires_at", Comparator::Lt, 100)
        .or()
        .where_null("user_id");
    let fragment = Generator::new(&Postgres::new()).delete(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "DELETE FROM sessions WHERE expires_at < $1 OR user_id IS NULL"
    );
    assert_eq!(fragment.params, vec![Value::Int(100)]);
}

#[test]
fn count_wraps_query() {
    let mut state = QueryState::from_table("users");
    state.where_("active", Comparator::Eq, true);

    let fragment = Generator::new(&Postgres::new()).count(&state).unwrap();
    assert_eq!(
        fragment.sql,
        "SELECT COUNT(*) num FROM (SELECT * FROM users WHERE active = $1) count_sql"
    );
    assert_eq!(fragment.params, vec![Value::Bool(true)]);
}

#[test]
fn statement_dispatches_on_operation() {
    let mut state = QueryState::from_table("t");
    state.where_in("id", Membership::values([1, 2]));
    let mysql = MySql::new();
    let generator = Generator::new(&mysql);
    assert_eq!(
        generator.statement(&state, Operation::Delete).unwrap().sql,
        "DELETE FROM t WHERE id IN (?, ?)"
    );
    assert_eq!(
        generator.statement(&state, Operation::Select).unwrap().sql,
        "SELECT * FROM t WHERE id IN (?, ?)"
    );
}
