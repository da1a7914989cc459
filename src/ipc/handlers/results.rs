use crate::calc::{self, SubjectResult};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_conn, get_optional_str, get_required_i64, get_required_str, require_staff, require_student,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::query::{parse_int_or_all, parse_limit, parse_page, total_pages};
use crate::scope;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_subjects(params: &serde_json::Value) -> Result<Vec<SubjectResult>, HandlerErr> {
    let Some(raw) = params.get("results") else {
        return Err(HandlerErr::bad_params("missing results"));
    };
    serde_json::from_value::<Vec<SubjectResult>>(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("results is malformed: {}", e)))
}

/// Stored key fields of a result, used for tenant checks and for the
/// uniqueness re-check on update.
#[derive(Debug, Clone)]
struct ResultKey {
    organization_id: String,
    student_id: String,
    exam_id: String,
    year: i64,
    class: i64,
    session: i64,
}

fn load_key(conn: &Connection, result_id: &str) -> Result<Option<ResultKey>, HandlerErr> {
    // Ownership is judged by the joined student's organization, the same way
    // the attendance handlers do it; the denormalized copy on the result row
    // only backs the uniqueness index.
    conn.query_row(
        "SELECT s.organization_id, r.student_id, r.exam_id, r.year, r.class, r.session
         FROM results r
         JOIN students s ON s.id = r.student_id
         WHERE r.id = ?",
        [result_id],
        |r| {
            Ok(ResultKey {
                organization_id: r.get(0)?,
                student_id: r.get(1)?,
                exam_id: r.get(2)?,
                year: r.get(3)?,
                class: r.get(4)?,
                session: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn duplicate_exists(
    conn: &Connection,
    key: &ResultKey,
    exclude_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let found: Option<String> = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT id FROM results
                 WHERE student_id = ? AND exam_id = ? AND year = ? AND class = ?
                   AND session = ? AND organization_id = ? AND id != ?",
                (
                    &key.student_id,
                    &key.exam_id,
                    key.year,
                    key.class,
                    key.session,
                    &key.organization_id,
                    id,
                ),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query)?,
        None => conn
            .query_row(
                "SELECT id FROM results
                 WHERE student_id = ? AND exam_id = ? AND year = ? AND class = ?
                   AND session = ? AND organization_id = ?",
                (
                    &key.student_id,
                    &key.exam_id,
                    key.year,
                    key.class,
                    key.session,
                    &key.organization_id,
                ),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::query)?,
    };
    Ok(found.is_some())
}

fn insert_subjects(
    tx: &rusqlite::Transaction<'_>,
    result_id: &str,
    subjects: &[SubjectResult],
) -> Result<(), HandlerErr> {
    for (i, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO result_subjects(id, result_id, sort_order, subject, marks, grade, gpa)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                result_id,
                i as i64,
                &s.subject,
                s.marks,
                &s.grade,
                s.gpa,
            ),
        )
        .map_err(HandlerErr::update)?;
    }
    Ok(())
}

fn create(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exam_id = get_required_str(params, "examId")?;
    let year = get_required_i64(params, "year")?;
    let class = get_required_i64(params, "class")?;
    let session = get_required_i64(params, "session")?;
    let group = get_optional_str(params, "group");
    let subjects = parse_subjects(params)?;

    let exam = scope::exam_in_org(conn, &exam_id, organization)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("exam not found"))?;
    let student = scope::student_in_org(conn, &student_id, organization)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let key = ResultKey {
        organization_id: organization.to_string(),
        student_id: student.id.clone(),
        exam_id: exam.id.clone(),
        year,
        class,
        session,
    };
    // Pre-flight for a friendly error; the unique index is the guarantee.
    if duplicate_exists(conn, &key, None)? {
        return Err(HandlerErr::conflict(
            "a result for this student, exam, year, class and session already exists",
        ));
    }

    // Aggregates are always derived here; any totalMarks/gpa/grade/isPassed
    // in the request body are ignored.
    let aggregates = calc::compute_result_aggregates(&subjects)?;

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(|e| {
        HandlerErr::new("db_tx_failed", e.to_string())
    })?;
    tx.execute(
        "INSERT INTO results(id, organization_id, student_id, exam_id, year, class, session,
                             group_name, total_marks, gpa, grade, is_passed)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            organization,
            &key.student_id,
            &key.exam_id,
            year,
            class,
            session,
            &group,
            aggregates.total_marks,
            aggregates.gpa,
            aggregates.grade,
            aggregates.is_passed as i64,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict(
                "a result for this student, exam, year, class and session already exists",
            )
        } else {
            HandlerErr::update(e)
        }
    })?;
    insert_subjects(&tx, &id, &subjects)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "id": id,
        "studentId": key.student_id,
        "examId": key.exam_id,
        "year": year,
        "class": class,
        "session": session,
        "group": group,
        "totalMarks": aggregates.total_marks,
        "gpa": aggregates.gpa,
        "grade": aggregates.grade,
        "isPassed": aggregates.is_passed,
    }))
}

fn require_owned(
    conn: &Connection,
    organization: &str,
    result_id: &str,
) -> Result<ResultKey, HandlerErr> {
    match load_key(conn, result_id)? {
        None => Err(HandlerErr::not_found("result not found")),
        Some(key) if key.organization_id != organization => Err(HandlerErr::forbidden(
            "result belongs to another organization",
        )),
        Some(key) => Ok(key),
    }
}

fn update(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let old = require_owned(conn, organization, &result_id)?;

    let mut key = old.clone();
    let mut key_changed = false;

    if let Some(student_id) = get_optional_str(params, "studentId") {
        if student_id != old.student_id {
            let student = scope::student_in_org(conn, &student_id, organization)
                .map_err(HandlerErr::query)?
                .ok_or_else(|| HandlerErr::not_found("student not found"))?;
            key.student_id = student.id;
            key_changed = true;
        }
    }
    if let Some(exam_id) = get_optional_str(params, "examId") {
        if exam_id != old.exam_id {
            let exam = scope::exam_in_org(conn, &exam_id, organization)
                .map_err(HandlerErr::query)?
                .ok_or_else(|| HandlerErr::not_found("exam not found"))?;
            key.exam_id = exam.id;
            key_changed = true;
        }
    }
    for (field, slot) in [("year", 0usize), ("class", 1), ("session", 2)] {
        let Some(v) = params.get(field) else { continue };
        if v.is_null() {
            continue;
        }
        let n = v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", field)))?;
        let target = match slot {
            0 => &mut key.year,
            1 => &mut key.class,
            _ => &mut key.session,
        };
        if *target != n {
            *target = n;
            key_changed = true;
        }
    }

    if key_changed && duplicate_exists(conn, &key, Some(&result_id))? {
        return Err(HandlerErr::conflict(
            "a result for this student, exam, year, class and session already exists",
        ));
    }

    // Recompute only when a new subject list is supplied; otherwise the
    // stored aggregates stand.
    let recompute = match params.get("results") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(_) => {
            let subjects = parse_subjects(params)?;
            let aggregates = calc::compute_result_aggregates(&subjects)?;
            Some((subjects, aggregates))
        }
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE results SET student_id = ?, exam_id = ?, year = ?, class = ?, session = ?
         WHERE id = ?",
        (
            &key.student_id,
            &key.exam_id,
            key.year,
            key.class,
            key.session,
            &result_id,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict(
                "a result for this student, exam, year, class and session already exists",
            )
        } else {
            HandlerErr::update(e)
        }
    })?;
    if let Some(group) = params.get("group") {
        let group: Option<String> = group.as_str().map(|s| s.to_string());
        tx.execute(
            "UPDATE results SET group_name = ? WHERE id = ?",
            (&group, &result_id),
        )
        .map_err(HandlerErr::update)?;
    }
    if let Some((subjects, aggregates)) = &recompute {
        tx.execute(
            "UPDATE results SET total_marks = ?, gpa = ?, grade = ?, is_passed = ?
             WHERE id = ?",
            (
                aggregates.total_marks,
                aggregates.gpa,
                aggregates.grade,
                aggregates.is_passed as i64,
                &result_id,
            ),
        )
        .map_err(HandlerErr::update)?;
        tx.execute(
            "DELETE FROM result_subjects WHERE result_id = ?",
            [&result_id],
        )
        .map_err(HandlerErr::update)?;
        insert_subjects(&tx, &result_id, subjects)?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    get_one(conn, organization, &result_id)
}

fn delete(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    require_owned(conn, organization, &result_id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM result_subjects WHERE result_id = ?",
        [&result_id],
    )
    .map_err(HandlerErr::update)?;
    tx.execute("DELETE FROM results WHERE id = ?", [&result_id])
        .map_err(HandlerErr::update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "deleted": true }))
}

fn subjects_json(conn: &Connection, result_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT subject, marks, grade, gpa FROM result_subjects
             WHERE result_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([result_id], |r| {
        Ok(json!({
            "subject": r.get::<_, String>(0)?,
            "marks": r.get::<_, f64>(1)?,
            "grade": r.get::<_, String>(2)?,
            "gpa": r.get::<_, f64>(3)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

const RESULT_PROJECTION: &str = "SELECT r.id, r.year, r.class, r.session, r.group_name,
            r.total_marks, r.gpa, r.grade, r.is_passed,
            s.id, s.name, s.roll, e.id, e.name";

const RESULT_JOIN: &str = "FROM results r
     JOIN students s ON s.id = r.student_id
     JOIN exams e ON e.id = r.exam_id";

fn result_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "year": r.get::<_, i64>(1)?,
        "class": r.get::<_, i64>(2)?,
        "session": r.get::<_, i64>(3)?,
        "group": r.get::<_, Option<String>>(4)?,
        "totalMarks": r.get::<_, f64>(5)?,
        "gpa": r.get::<_, f64>(6)?,
        "grade": r.get::<_, String>(7)?,
        "isPassed": r.get::<_, i64>(8)? != 0,
        "student": {
            "id": r.get::<_, String>(9)?,
            "name": r.get::<_, String>(10)?,
            "roll": r.get::<_, String>(11)?,
        },
        "exam": {
            "id": r.get::<_, String>(12)?,
            "name": r.get::<_, String>(13)?,
        },
    }))
}

fn get_one(
    conn: &Connection,
    organization: &str,
    result_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "{} {} WHERE r.id = ? AND s.organization_id = ?",
        RESULT_PROJECTION, RESULT_JOIN
    );
    let mut row = conn
        .query_row(&sql, (result_id, organization), |r| result_json(r))
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("result not found"))?;
    row["results"] = json!(subjects_json(conn, result_id)?);
    Ok(row)
}

fn get(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    get_one(conn, organization, &result_id)
}

fn get_mine(
    conn: &Connection,
    organization: &str,
    user_id: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let student = scope::student_for_user(conn, user_id, organization)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("no student record linked to this account"))?;
    let sql = format!(
        "{} {} WHERE r.student_id = ? AND s.organization_id = ? ORDER BY r.year DESC, r.id",
        RESULT_PROJECTION, RESULT_JOIN
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&student.id, organization), |r| {
            Ok((r.get::<_, String>(0)?, result_json(r)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, mut row) in rows {
        row["results"] = json!(subjects_json(conn, &id)?);
        out.push(row);
    }
    Ok(json!(out))
}

fn list(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params.get("page")).map_err(HandlerErr::bad_params)?;
    let limit = parse_limit(params.get("limit")).map_err(HandlerErr::bad_params)?;

    let mut frags: Vec<&str> = vec!["s.organization_id = ?"];
    let mut values: Vec<Value> = vec![Value::Text(organization.to_string())];
    if let Some(exam_id) = get_optional_str(params, "examId") {
        frags.push("r.exam_id = ?");
        values.push(Value::Text(exam_id));
    }
    if let Some(student_id) = get_optional_str(params, "studentId") {
        frags.push("r.student_id = ?");
        values.push(Value::Text(student_id));
    }
    for (field, frag) in [
        ("year", "r.year = ?"),
        ("class", "r.class = ?"),
        ("session", "r.session = ?"),
    ] {
        if let Some(n) = parse_int_or_all(params, field).map_err(HandlerErr::bad_params)? {
            frags.push(frag);
            values.push(Value::Integer(n));
        }
    }
    let where_frag = format!("WHERE {}", frags.join(" AND "));

    let count_sql = format!("SELECT COUNT(*) {} {}", RESULT_JOIN, where_frag);
    let total: i64 = conn
        .query_row(&count_sql, params_from_iter(values.clone()), |r| r.get(0))
        .map_err(HandlerErr::query)?;

    let page_sql = format!(
        "{} {} {} ORDER BY r.year DESC, r.id LIMIT ? OFFSET ?",
        RESULT_PROJECTION, RESULT_JOIN, where_frag
    );
    values.push(Value::Integer(limit as i64));
    values.push(Value::Integer(((page - 1) * limit) as i64));
    let mut stmt = conn.prepare(&page_sql).map_err(HandlerErr::query)?;
    let data = stmt
        .query_map(params_from_iter(values), |r| result_json(r))
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

fn stats(conn: &Connection, organization: &str) -> Result<serde_json::Value, HandlerErr> {
    let (count, avg_gpa, passed): (i64, Option<f64>, i64) = conn
        .query_row(
            "SELECT COUNT(*), AVG(r.gpa), COALESCE(SUM(r.is_passed), 0)
             FROM results r
             JOIN students s ON s.id = r.student_id
             WHERE s.organization_id = ?",
            [organization],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "averageGPA": calc::round2(avg_gpa.unwrap_or(0.0)),
        "passedCount": passed,
        "failedCount": count - passed,
    }))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    match req.method.as_str() {
        "results.create" => {
            let organization = require_staff(req)?.organization.clone();
            create(db_conn(state)?, &organization, &req.params)
        }
        "results.update" => {
            let organization = require_staff(req)?.organization.clone();
            update(db_conn(state)?, &organization, &req.params)
        }
        "results.delete" => {
            let organization = require_staff(req)?.organization.clone();
            delete(db_conn(state)?, &organization, &req.params)
        }
        "results.get" => {
            let organization = require_staff(req)?.organization.clone();
            get(db_conn(state)?, &organization, &req.params)
        }
        "results.getMine" => {
            let identity = require_student(req)?;
            let (organization, user_id) = (identity.organization.clone(), identity.id.clone());
            get_mine(db_conn(state)?, &organization, &user_id)
        }
        "results.list" => {
            let organization = require_staff(req)?.organization.clone();
            list(db_conn(state)?, &organization, &req.params)
        }
        "results.stats" => {
            let organization = require_staff(req)?.organization.clone();
            stats(db_conn(state)?, &organization)
        }
        other => Err(HandlerErr::new(
            "not_implemented",
            format!("unknown method: {}", other),
        )),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("results.") {
        return None;
    }
    Some(match dispatch(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
