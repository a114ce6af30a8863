//! Execution path through a mock connector: rendering, result mapping, hooks.

mod support;

use polyql::hooks::{after_fn, before_fn};
use polyql::{
    ColumnValues, Comparator, DialectKind, Direction, HookAction, NativeResult, Operation,
    Pagination, Record, ResultSet, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use support::{MockState, registry};

#[tokio::test]
async fn fetch_runs_rendered_select() {
    let (registry, state) = registry(DialectKind::MySql).await;
    state.respond(NativeResult::Rows(support::rows(2)));

    let mut q = registry.start_query("main").unwrap();
    q.table("users")
        .where_("age", Comparator::Gt, 30)
        .order_by("name", Direction::Asc)
        .limit(5);
    let result = q.fetch().await.unwrap();

    assert_eq!(result.rows.len(), 2);
    let statements = state.statements();
    assert_eq!(
        statements[0].sql,
        "SELECT * FROM users WHERE age > ? ORDER BY name ASC LIMIT 5"
    );
    assert_eq!(statements[0].params, vec![Value::Int(30)]);
    assert_eq!(MockState::count(&state.acquired), 1);
    assert_eq!(MockState::count(&state.released), 1);
}

#[tokio::test]
async fn fetch_as_decodes_rows() {
    #[derive(Debug, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    impl polyql::FromRecord for User {
        fn from_record(record: &Record) -> polyql::DbResult<Self> {
            Ok(User {
                id: record.try_get("id")?,
                name: record.try_get("name")?,
            })
        }
    }

    let (registry, state) = registry(DialectKind::Postgres).await;
    state.respond(NativeResult::Rows(vec![
        Record::new().with("id", 1_i64).with("name", "alice"),
    ]));

    let mut q = registry.start_query("main").unwrap();
    let users: Vec<User> = q.table("users").fetch_as().await.unwrap();
    assert_eq!(
        users,
        vec![User {
            id: 1,
            name: "alice".into()
        }]
    );
}

#[tokio::test]
async fn postgres_insert_reads_returning_id() {
    let (registry, state) = registry(DialectKind::Postgres).await;
    state.respond(NativeResult::Command {
        command: "INSERT".into(),
        row_count: 1,
        rows: vec![Record::new().with("id", 7_i64)],
    });

    let mut q = registry.start_query("main").unwrap();
    q.table("users")
        .set_incrementing_field("id")
        .insert([ColumnValues::new().set("name", "alice")]);
    let result = q.save().await.unwrap();

    assert_eq!(result.insert_id, 7);
    assert_eq!(result.rows_affected, 1);
    assert_eq!(
        state.sqls(),
        vec!["INSERT INTO users (name) VALUES ($1) RETURNING id"]
    );
    assert_eq!(q.state().operation(), Operation::Insert);
}

#[tokio::test]
async fn mysql_update_reads_ok_packet() {
    let (registry, state) = registry(DialectKind::MySql).await;
    state.respond(NativeResult::Ok {
        affected_rows: 3,
        changed_rows: 2,
        insert_id: 0,
    });

    let mut q = registry.start_query("main").unwrap();
    q.table("users")
        .where_("team", Comparator::Eq, "red")
        .update(ColumnValues::new().set("active", false));
    let result = q.save().await.unwrap();

    assert_eq!(result.rows_affected, 3);
    assert_eq!(result.rows_changed, 2);
    let statements = state.statements();
    assert_eq!(statements[0].sql, "UPDATE users SET active = ? WHERE team = ?");
    assert_eq!(
        statements[0].params,
        vec![Value::Bool(false), Value::from("red")]
    );
}

#[tokio::test]
async fn save_without_payload_is_rejected() {
    let (registry, state) = registry(DialectKind::MySql).await;
    let mut q = registry.start_query("main").unwrap();
    q.table("users");

    let err = q.save().await.unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(state.statements().is_empty());
}

#[tokio::test]
async fn statements_need_a_table() {
    let (registry, state) = registry(DialectKind::MySql).await;
    let mut q = registry.start_query("main").unwrap();

    assert!(q.fetch().await.unwrap_err().is_no_target());
    assert!(q.delete().await.unwrap_err().is_no_target());
    assert!(state.statements().is_empty());
    assert_eq!(MockState::count(&state.acquired), 0);
}

#[tokio::test]
async fn paginate_counts_then_limits() {
    let (registry, state) = registry(DialectKind::Postgres).await;
    state.respond(NativeResult::Rows(vec![Record::new().with("num", 45_i64)]));

    let mut q = registry.start_query("main").unwrap();
    q.table("users").where_("active", Comparator::Eq, true);
    let page = q.paginate(10, 3).await.unwrap();

    assert_eq!(
        page,
        Pagination {
            total_rows: 45,
            per_page: 10,
            page: 3
        }
    );
    assert_eq!(page.total_pages(), 5);
    assert_eq!(
        state.sqls(),
        vec!["SELECT COUNT(*) num FROM (SELECT * FROM users WHERE active = $1) count_sql"]
    );
    assert_eq!(
        q.to_select().unwrap().sql,
        "SELECT * FROM users WHERE active = $1 LIMIT 10 OFFSET 20"
    );
}

#[tokio::test]
async fn paginate_rejects_page_zero() {
    let (registry, state) = registry(DialectKind::Postgres).await;
    let mut q = registry.start_query("main").unwrap();
    q.table("users");

    assert!(q.paginate(10, 0).await.unwrap_err().is_invalid_argument());
    assert!(q.paginate(0, 1).await.unwrap_err().is_invalid_argument());
    assert!(state.statements().is_empty());
    assert_eq!(q.state().limit_value(), None);
}

#[tokio::test]
async fn count_of_empty_result_is_zero() {
    let (registry, _state) = registry(DialectKind::MySql).await;
    let mut q = registry.start_query("main").unwrap();
    q.table("users");
    assert_eq!(q.count().await.unwrap(), 0);
}

#[tokio::test]
async fn raw_sql_passes_through() {
    let (registry, state) = registry(DialectKind::MySql).await;
    let q = registry.start_query("main").unwrap();

    q.raw("UPDATE users SET hits = hits + ? WHERE id = ?", vec![1.into(), 9.into()])
        .await
        .unwrap();

    let statements = state.statements();
    assert_eq!(statements[0].sql, "UPDATE users SET hits = hits + ? WHERE id = ?");
    assert_eq!(statements[0].params, vec![Value::Int(1), Value::Int(9)]);
}

#[tokio::test]
async fn before_hook_can_halt() {
    let (registry, state) = registry(DialectKind::MySql).await;
    registry
        .add_before_hook(
            "main",
            Operation::Delete,
            before_fn(|event| {
                if event.table() == "audit_log" {
                    HookAction::Halt
                } else {
                    HookAction::Continue
                }
            }),
        )
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.table("audit_log").where_("id", Comparator::Eq, 1);
    let result = q.delete().await.unwrap();
    assert_eq!(result, ResultSet::default());
    assert!(state.statements().is_empty());

    let mut q = registry.start_query("main").unwrap();
    q.table("sessions").where_("id", Comparator::Eq, 1);
    q.delete().await.unwrap();
    assert_eq!(state.sqls(), vec!["DELETE FROM sessions WHERE id = ?"]);
}

#[tokio::test]
async fn every_before_hook_runs_even_after_a_halt() {
    let (registry, state) = registry(DialectKind::MySql).await;
    let calls = Arc::new(AtomicUsize::new(0));

    registry
        .add_before_hook("main", Operation::Select, before_fn(|_| HookAction::Halt))
        .unwrap();
    let seen = Arc::clone(&calls);
    registry
        .add_before_hook(
            "main",
            Operation::Select,
            before_fn(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                HookAction::Continue
            }),
        )
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.table("users").fetch().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(state.statements().is_empty());
}

#[tokio::test]
async fn hooks_only_fire_for_their_operation() {
    let (registry, state) = registry(DialectKind::MySql).await;
    registry
        .add_before_hook("main", Operation::Insert, before_fn(|_| HookAction::Halt))
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.table("users").fetch().await.unwrap();
    assert_eq!(state.statements().len(), 1);
}

#[tokio::test]
async fn suppressed_queries_skip_hooks() {
    let (registry, state) = registry(DialectKind::MySql).await;
    registry
        .add_before_hook("main", Operation::Select, before_fn(|_| HookAction::Halt))
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.suppress_events(true).table("users");
    q.fetch().await.unwrap();
    assert_eq!(state.statements().len(), 1);

    let mut derived = q.new_query();
    assert!(derived.events_suppressed());
    derived.table("teams").fetch().await.unwrap();
    assert_eq!(state.statements().len(), 2);
}

#[tokio::test]
async fn hook_event_carries_a_suppressed_connection() {
    let (registry, _state) = registry(DialectKind::Postgres).await;
    let suppressed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&suppressed);
    registry
        .add_before_hook(
            "main",
            Operation::Select,
            before_fn(move |event| {
                assert_eq!(event.sql(), "SELECT * FROM users WHERE id = $1");
                assert_eq!(event.params(), &[Value::Int(4)]);
                assert_eq!(event.state().limit_value(), None);
                flag.store(event.connection().events_suppressed(), Ordering::SeqCst);
                HookAction::Continue
            }),
        )
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.table("users").where_("id", Comparator::Eq, 4);
    q.fetch().await.unwrap();
    assert!(suppressed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn after_hook_receives_result() {
    let (registry, state) = registry(DialectKind::MySql).await;
    state.respond(NativeResult::Ok {
        affected_rows: 1,
        changed_rows: 1,
        insert_id: 42,
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    registry
        .add_after_hook(
            "main",
            Operation::Insert,
            after_fn(move |event, result| {
                let _ = tx.send((event.table().to_string(), result.insert_id));
            }),
        )
        .unwrap();

    let mut q = registry.start_query("main").unwrap();
    q.table("users")
        .insert([ColumnValues::new().set("name", "bob")]);
    let result = q.save().await.unwrap();
    assert_eq!(result.insert_id, 42);

    let (table, insert_id) = rx.recv().await.unwrap();
    assert_eq!(table, "users");
    assert_eq!(insert_id, 42);
}

#[tokio::test]
async fn invalid_statements_never_acquire() {
    let (registry, state) = registry(DialectKind::MySql).await;
    let mut q = registry.start_query("main").unwrap();
    // `save` validates before acquiring.
    q.table("users").insert(Vec::<ColumnValues>::new());
    assert!(q.save().await.unwrap_err().is_invalid_argument());
    assert_eq!(MockState::count(&state.acquired), 0);

    let mut q = registry.start_query("main").unwrap();
    q.table("users").fetch().await.unwrap();
    q.fetch().await.unwrap();
    assert_eq!(MockState::count(&state.acquired), 2);
    assert_eq!(MockState::count(&state.released), 2);
}

#[tokio::test]
async fn subquery_from_another_query() {
    let (registry, state) = registry(DialectKind::Postgres).await;
    let mut inner = registry.start_query("main").unwrap();
    inner
        .table("orders")
        .columns(["user_id"])
        .where_("total", Comparator::Gt, 100);

    let mut q = registry.start_query("main").unwrap();
    q.table("users")
        .where_("active", Comparator::Eq, true)
        .where_in("id", &inner);
    q.fetch().await.unwrap();

    let statements = state.statements();
    assert_eq!(
        statements[0].sql,
        "SELECT * FROM users WHERE active = $1 AND id IN (SELECT user_id FROM orders WHERE total > $2)"
    );
    assert_eq!(statements[0].params, vec![Value::Bool(true), Value::Int(100)]);
}

#[test]
fn after_hooks_run_inline_without_a_runtime() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let (registry, state) = runtime.block_on(registry(DialectKind::MySql));
    drop(runtime);

    let fired = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&fired);
    registry
        .add_after_hook(
            "main",
            Operation::Select,
            after_fn(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    state.respond(NativeResult::Rows(support::rows(1)));

    let mut q = registry.start_query("main").unwrap();
    q.table("users");
    let mut fetch = std::pin::pin!(q.fetch());
    let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
    match fetch.as_mut().poll(&mut cx) {
        std::task::Poll::Ready(result) => assert_eq!(result.unwrap().rows.len(), 1),
        std::task::Poll::Pending => panic!("mock statements complete without waiting"),
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
