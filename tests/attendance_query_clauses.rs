#[path = "../src/calc.rs"]
mod calc;
#[path = "../src/query.rs"]
mod query;

use chrono::NaiveDate;
use query::{
    build_attendance_clauses, parse_attendance_filter, parse_limit, parse_page, total_pages,
    where_sql, AttendanceFilter, FilterClause,
};
use serde_json::json;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
}

#[test]
fn class_and_session_accept_integers_or_all() {
    let f = parse_attendance_filter(&json!({ "class": 7, "session": "2024" })).expect("filter");
    assert_eq!(f.class, Some(7));
    assert_eq!(f.session, Some(2024));

    let f = parse_attendance_filter(&json!({ "class": "all", "session": "ALL" })).expect("filter");
    assert_eq!(f.class, None);
    assert_eq!(f.session, None);

    let e = parse_attendance_filter(&json!({ "class": "seven" })).expect_err("non-numeric class");
    assert!(e.contains("class"));
}

#[test]
fn invalid_status_and_month_are_rejected() {
    assert!(parse_attendance_filter(&json!({ "status": "tardy" })).is_err());
    assert!(parse_attendance_filter(&json!({ "month": 13 })).is_err());
    assert!(parse_attendance_filter(&json!({ "month": 0 })).is_err());
    assert!(parse_attendance_filter(&json!({ "startDate": "01/02/2025" })).is_err());
}

#[test]
fn years_outside_i32_are_rejected_not_truncated() {
    assert!(parse_attendance_filter(&json!({ "year": 10_000_000_000i64 })).is_err());
    assert!(parse_attendance_filter(&json!({ "year": -10_000_000_000i64 })).is_err());
    assert_eq!(
        parse_attendance_filter(&json!({ "year": 2025 }))
            .expect("filter")
            .year,
        Some(2025)
    );
}

#[test]
fn tenant_clause_always_leads() {
    let filter = parse_attendance_filter(&json!({ "status": "present" })).expect("filter");
    let clauses =
        build_attendance_clauses("org-a", &filter, date("2025-06-15")).expect("clauses");
    assert_eq!(clauses[0], FilterClause::Tenant("org-a".to_string()));
    assert_eq!(clauses[1], FilterClause::Status("present".to_string()));
}

#[test]
fn year_alone_bounds_the_calendar_year() {
    let filter = parse_attendance_filter(&json!({ "year": 2024 })).expect("filter");
    let clauses =
        build_attendance_clauses("org-a", &filter, date("2025-06-15")).expect("clauses");
    assert!(clauses.contains(&FilterClause::DateFrom(date("2024-01-01"))));
    assert!(clauses.contains(&FilterClause::DateTo(date("2024-12-31"))));
}

#[test]
fn month_with_year_bounds_that_month() {
    let filter = parse_attendance_filter(&json!({ "month": 2, "year": 2024 })).expect("filter");
    let clauses =
        build_attendance_clauses("org-a", &filter, date("2025-06-15")).expect("clauses");
    // 2024 is a leap year.
    assert!(clauses.contains(&FilterClause::DateFrom(date("2024-02-01"))));
    assert!(clauses.contains(&FilterClause::DateTo(date("2024-02-29"))));
}

#[test]
fn month_without_year_defaults_to_the_current_year() {
    let filter = parse_attendance_filter(&json!({ "month": 12 })).expect("filter");
    let clauses =
        build_attendance_clauses("org-a", &filter, date("2023-03-01")).expect("clauses");
    assert!(clauses.contains(&FilterClause::DateFrom(date("2023-12-01"))));
    assert!(clauses.contains(&FilterClause::DateTo(date("2023-12-31"))));
}

#[test]
fn explicit_range_and_month_layer_into_an_intersection() {
    let filter = parse_attendance_filter(&json!({
        "startDate": "2024-02-10",
        "endDate": "2024-03-05",
        "month": 2,
        "year": 2024
    }))
    .expect("filter");
    let clauses =
        build_attendance_clauses("org-a", &filter, date("2025-06-15")).expect("clauses");
    // Both pairs survive; the store evaluates their conjunction, so the
    // effective window is Feb 10 ..= Feb 29.
    assert!(clauses.contains(&FilterClause::DateFrom(date("2024-02-10"))));
    assert!(clauses.contains(&FilterClause::DateTo(date("2024-03-05"))));
    assert!(clauses.contains(&FilterClause::DateFrom(date("2024-02-01"))));
    assert!(clauses.contains(&FilterClause::DateTo(date("2024-02-29"))));
}

#[test]
fn where_sql_composes_conjunction_in_clause_order() {
    let clauses = vec![
        FilterClause::Tenant("org-a".to_string()),
        FilterClause::Class(7),
        FilterClause::DateFrom(date("2024-01-01")),
    ];
    let (sql, params) = where_sql(&clauses);
    assert_eq!(
        sql,
        "WHERE s.organization_id = ? AND s.class = ? AND a.date >= ?"
    );
    assert_eq!(params.len(), 3);

    let (sql, params) = where_sql(&[]);
    assert!(sql.is_empty());
    assert!(params.is_empty());
}

#[test]
fn search_clause_binds_one_pattern_per_column() {
    let clause = FilterClause::Search("Rahim".to_string());
    assert_eq!(clause.params().len(), 5);
    match &clause.params()[0] {
        rusqlite::types::Value::Text(p) => assert_eq!(p, "%rahim%"),
        other => panic!("unexpected param: {:?}", other),
    }
}

#[test]
fn class_and_session_clauses_target_the_joined_student() {
    assert_eq!(FilterClause::Class(7).sql(), "s.class = ?");
    assert_eq!(FilterClause::Session(2024).sql(), "s.session = ?");
    assert_eq!(
        FilterClause::Tenant(String::new()).sql(),
        "s.organization_id = ?"
    );
}

#[test]
fn pagination_parsing_and_total_pages() {
    assert_eq!(parse_page(None).expect("default"), 1);
    assert_eq!(parse_limit(None).expect("default"), 10);
    assert!(parse_page(Some(&json!(0))).is_err());
    assert!(parse_limit(Some(&json!(0))).is_err());
    assert!(parse_limit(Some(&json!(-5))).is_err());

    assert_eq!(total_pages(0, 10), 0);
    assert_eq!(total_pages(25, 10), 3);
    assert_eq!(total_pages(20, 10), 2);
    assert_eq!(total_pages(1, 10), 1);
}

#[test]
fn default_filter_is_unconstrained() {
    let f = parse_attendance_filter(&json!({})).expect("filter");
    assert_eq!(f, AttendanceFilter::default());
    let clauses = build_attendance_clauses("org-a", &f, date("2025-06-15")).expect("clauses");
    assert_eq!(clauses.len(), 1);
}
