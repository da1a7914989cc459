use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, get_optional_str, get_required_str, require_staff, require_student, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::query::{
    build_attendance_clauses, parse_attendance_filter, parse_limit, parse_page, total_pages,
    where_sql, FilterClause,
};
use crate::scope;
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const JOINED_SET: &str = "FROM attendance a
     JOIN students s ON s.id = a.student_id
     JOIN departments d ON d.id = a.department_id";

const ROW_PROJECTION: &str = "SELECT a.id, a.status, a.date, a.group_name, a.remark,
            s.id, s.name, s.email, s.roll, s.class, s.session, s.group_name,
            d.id, d.name";

fn parse_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let parsed = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD string", key)))?;
    // Store the zero-padded form: the date column is TEXT and every range
    // comparison and ORDER BY depends on the lexicographic order matching
    // the calendar order.
    Ok(parsed.format("%Y-%m-%d").to_string())
}

fn create(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let status = get_required_str(params, "status")?;
    if !calc::is_attendance_status(&status) {
        return Err(HandlerErr::bad_params(
            "status must be one of: present, absent, late, leave",
        ));
    }
    let date = parse_date(params, "date")?;
    let remark = get_optional_str(params, "remark");

    let student = scope::student_in_org(conn, &student_id, organization)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    // Department and group are snapshots of the student at creation time;
    // they are never re-derived on later reads.
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, student_id, department_id, status, date, group_name, remark)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student.id,
            &student.department_id,
            &status,
            &date,
            &student.group_name,
            &remark,
        ),
    )
    .map_err(HandlerErr::update)?;

    Ok(json!({
        "id": id,
        "status": status,
        "date": date,
        "group": student.group_name,
        "remark": remark,
        "studentId": student.id,
        "departmentId": student.department_id,
    }))
}

/// Organization of the student owning an attendance row; None when the row
/// itself is missing.
fn owning_org(conn: &Connection, attendance_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT s.organization_id
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE a.id = ?",
        [attendance_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn require_owned(
    conn: &Connection,
    organization: &str,
    attendance_id: &str,
) -> Result<(), HandlerErr> {
    match owning_org(conn, attendance_id)? {
        None => Err(HandlerErr::not_found("attendance record not found")),
        Some(org) if org != organization => Err(HandlerErr::forbidden(
            "attendance record belongs to another organization",
        )),
        Some(_) => Ok(()),
    }
}

fn update(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    require_owned(conn, organization, &attendance_id)?;

    // Validate every supplied field before the first write, so a bad field
    // leaves the record exactly as it was.
    let status = get_optional_str(params, "status");
    if let Some(status) = &status {
        if !calc::is_attendance_status(status) {
            return Err(HandlerErr::bad_params(
                "status must be one of: present, absent, late, leave",
            ));
        }
    }
    let date = match params.get("date") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(_) => Some(parse_date(params, "date")?),
    };
    let remark: Option<Option<String>> = params
        .get("remark")
        .map(|v| v.as_str().map(|s| s.to_string()));

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if let Some(status) = &status {
        tx.execute(
            "UPDATE attendance SET status = ? WHERE id = ?",
            (status, &attendance_id),
        )
        .map_err(HandlerErr::update)?;
    }
    if let Some(date) = &date {
        tx.execute(
            "UPDATE attendance SET date = ? WHERE id = ?",
            (date, &attendance_id),
        )
        .map_err(HandlerErr::update)?;
    }
    if let Some(remark) = &remark {
        tx.execute(
            "UPDATE attendance SET remark = ? WHERE id = ?",
            (remark, &attendance_id),
        )
        .map_err(HandlerErr::update)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    get_one(conn, organization, &attendance_id)
}

fn delete(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    require_owned(conn, organization, &attendance_id)?;
    conn.execute("DELETE FROM attendance WHERE id = ?", [&attendance_id])
        .map_err(HandlerErr::update)?;
    Ok(json!({ "deleted": true }))
}

fn row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "status": r.get::<_, String>(1)?,
        "date": r.get::<_, String>(2)?,
        "group": r.get::<_, Option<String>>(3)?,
        "remark": r.get::<_, Option<String>>(4)?,
        "student": {
            "id": r.get::<_, String>(5)?,
            "name": r.get::<_, String>(6)?,
            "email": r.get::<_, String>(7)?,
            "roll": r.get::<_, String>(8)?,
            "class": r.get::<_, i64>(9)?,
            "session": r.get::<_, i64>(10)?,
            "group": r.get::<_, Option<String>>(11)?,
        },
        "department": {
            "id": r.get::<_, String>(12)?,
            "name": r.get::<_, String>(13)?,
        },
    }))
}

fn get_one(
    conn: &Connection,
    organization: &str,
    attendance_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    // A record outside the caller's tenant reads as missing.
    let sql = format!(
        "{} {} WHERE a.id = ? AND s.organization_id = ?",
        ROW_PROJECTION, JOINED_SET
    );
    conn.query_row(&sql, (attendance_id, organization), |r| row_json(r))
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("attendance record not found"))
}

fn get(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    get_one(conn, organization, &attendance_id)
}

/// The faceted list: one composed match stage feeds both the row page and
/// the total count, so the two can never disagree.
fn run_list(
    conn: &Connection,
    clauses: &[FilterClause],
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params.get("page")).map_err(HandlerErr::bad_params)?;
    let limit = parse_limit(params.get("limit")).map_err(HandlerErr::bad_params)?;
    let (where_frag, where_params) = where_sql(clauses);

    let count_sql = format!("SELECT COUNT(*) {} {}", JOINED_SET, where_frag);
    let total: i64 = conn
        .query_row(&count_sql, params_from_iter(where_params.clone()), |r| {
            r.get(0)
        })
        .map_err(HandlerErr::query)?;

    let page_sql = format!(
        "{} {} {} ORDER BY a.date DESC, a.id LIMIT ? OFFSET ?",
        ROW_PROJECTION, JOINED_SET, where_frag
    );
    let mut page_params = where_params;
    page_params.push(Value::Integer(limit as i64));
    page_params.push(Value::Integer(((page - 1) * limit) as i64));

    let mut stmt = conn.prepare(&page_sql).map_err(HandlerErr::query)?;
    let data = stmt
        .query_map(params_from_iter(page_params), |r| row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "data": data,
        "meta": {
            "page": page,
            "limit": limit,
            "total": total,
            "totalPages": total_pages(total as usize, limit),
        }
    }))
}

fn list(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_attendance_filter(params).map_err(HandlerErr::bad_params)?;
    let clauses =
        build_attendance_clauses(organization, &filter, chrono::Local::now().date_naive())
            .map_err(HandlerErr::bad_params)?;
    run_list(conn, &clauses, params)
}

/// Student-facing variant: the student id comes from the identity's linked
/// student row, never from the request body.
fn list_mine(
    conn: &Connection,
    organization: &str,
    user_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student = scope::student_for_user(conn, user_id, organization)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("no student record linked to this account"))?;
    let filter = parse_attendance_filter(params).map_err(HandlerErr::bad_params)?;
    let mut clauses =
        build_attendance_clauses(organization, &filter, chrono::Local::now().date_naive())
            .map_err(HandlerErr::bad_params)?;
    clauses.insert(1, FilterClause::Student(student.id));
    run_list(conn, &clauses, params)
}

fn stats(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_attendance_filter(params).map_err(HandlerErr::bad_params)?;
    let clauses =
        build_attendance_clauses(organization, &filter, chrono::Local::now().date_naive())
            .map_err(HandlerErr::bad_params)?;
    let (where_frag, where_params) = where_sql(&clauses);

    let sql = format!(
        "SELECT a.status, COUNT(*) {} {} GROUP BY a.status",
        JOINED_SET, where_frag
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(params_from_iter(where_params), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let counts: HashMap<String, i64> = rows.into_iter().collect();
    let total: i64 = counts.values().sum();

    let mut out = json!({ "total": total });
    for status in calc::ATTENDANCE_STATUSES {
        let count = counts.get(status).copied().unwrap_or(0);
        out[status] = json!({
            "count": count,
            "percentage": calc::percentage_string(count, total),
        });
    }
    Ok(out)
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    match req.method.as_str() {
        "attendance.create" => {
            let organization = require_staff(req)?.organization.clone();
            create(db_conn(state)?, &organization, &req.params)
        }
        "attendance.update" => {
            let organization = require_staff(req)?.organization.clone();
            update(db_conn(state)?, &organization, &req.params)
        }
        "attendance.delete" => {
            let organization = require_staff(req)?.organization.clone();
            delete(db_conn(state)?, &organization, &req.params)
        }
        "attendance.get" => {
            let organization = require_staff(req)?.organization.clone();
            get(db_conn(state)?, &organization, &req.params)
        }
        "attendance.list" => {
            let organization = require_staff(req)?.organization.clone();
            list(db_conn(state)?, &organization, &req.params)
        }
        "attendance.listMine" => {
            let identity = require_student(req)?;
            let (organization, user_id) = (identity.organization.clone(), identity.id.clone());
            list_mine(db_conn(state)?, &organization, &user_id, &req.params)
        }
        "attendance.stats" => {
            let organization = require_staff(req)?.organization.clone();
            stats(db_conn(state)?, &organization, &req.params)
        }
        other => Err(HandlerErr::new(
            "not_implemented",
            format!("unknown method: {}", other),
        )),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("attendance.") {
        return None;
    }
    Some(match dispatch(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
