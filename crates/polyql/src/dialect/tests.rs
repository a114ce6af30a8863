use super::*;
use crate::record::Record;

#[test]
fn mysql_quotes_reserved_segments() {
    let d = MySql::new();
    assert_eq!(d.escape_identifier("users.name"), "users.name");
    assert_eq!(d.escape_identifier("order"), "`order`");
    assert_eq!(d.escape_identifier("t.order"), "t.`order`");
    assert_eq!(d.escape_identifier("ORDER"), "`ORDER`");
}

#[test]
fn alias_is_escaped_separately() {
    let d = Postgres::new();
    assert_eq!(d.escape_identifier("users u"), "users u");
    assert_eq!(d.escape_identifier("COUNT(*) num"), "COUNT(*) num");
    assert_eq!(d.escape_identifier("orders table"), "orders \"table\"");
    assert_eq!(d.escape_identifier("o.total AS order"), "o.total AS \"order\"");
    assert_eq!(d.escape_identifier("user.id"), "\"user\".id");
}

#[test]
fn extra_reserved_words() {
    let d = MySql::new().with_reserved(["status"]);
    assert_eq!(d.escape_identifier("status"), "`status`");
}

#[test]
fn conditional_templates() {
    assert_eq!(MySql::new().conditional("a = ?", "10", "0"), "IF(a = ?, 10, 0)");
    assert_eq!(
        Postgres::new().conditional("a = $1", "10", "0"),
        "CASE WHEN a = $1 THEN 10 ELSE 0 END"
    );
}

#[test]
fn placeholder_styles() {
    assert!(!MySql::new().param_counter().is_labeled());
    let counter = Postgres::new().param_counter();
    assert!(counter.is_labeled());
    assert_eq!(counter.position(), 1);
}

#[test]
fn ok_packet_maps_counters() {
    let result = MySql::new().map_result(
        NativeResult::Ok {
            affected_rows: 3,
            changed_rows: 2,
            insert_id: 41,
        },
        None,
    );
    assert_eq!(result.insert_id, 41);
    assert_eq!(result.rows_affected, 3);
    assert_eq!(result.rows_changed, 2);
    assert!(result.rows.is_empty());
}

#[test]
fn command_insert_reads_returning_field() {
    let row = Record::new().with("id", 7_i64);
    let result = Postgres::new().map_result(
        NativeResult::Command {
            command: "INSERT".into(),
            row_count: 1,
            rows: vec![row],
        },
        Some("id"),
    );
    assert_eq!(result.insert_id, 7);
    assert_eq!(result.rows_affected, 1);

    let result = Postgres::new().map_result(
        NativeResult::Command {
            command: "UPDATE".into(),
            row_count: 4,
            rows: Vec::new(),
        },
        None,
    );
    assert_eq!(result.rows_changed, 4);
}

#[test]
fn dialect_kind_deserializes() {
    #[derive(serde::Deserialize)]
    struct Wrap {
        dialect: DialectKind,
    }
    let w: Wrap = toml::from_str("dialect = \"postgresql\"").unwrap();
    assert_eq!(w.dialect, DialectKind::Postgres);
    let w: Wrap = toml::from_str("dialect = \"mysql\"").unwrap();
    assert_eq!(w.dialect, DialectKind::MySql);
}
