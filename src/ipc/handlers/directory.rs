use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, get_optional_str, get_required_i64, get_required_str, require_staff, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn add_department(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, organization_id, name) VALUES(?, ?, ?)",
        (&id, organization, &name),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "id": id, "name": name }))
}

fn add_student(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    let roll = get_required_str(params, "roll")?;
    let registration_no = get_required_str(params, "registrationNo")?;
    let class = get_required_i64(params, "class")?;
    let session = get_required_i64(params, "session")?;
    let group = get_optional_str(params, "group");
    let department_id = get_required_str(params, "departmentId")?;
    let user_id = get_optional_str(params, "userId");

    let department_exists: bool = conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ? AND organization_id = ?",
            (&department_id, organization),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !department_exists {
        return Err(HandlerErr::not_found("department not found"));
    }

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT roll FROM students
             WHERE organization_id = ? AND (roll = ? OR registration_no = ?)",
            (organization, &roll, &registration_no),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if duplicate.is_some() {
        return Err(HandlerErr::conflict(
            "a student with this roll or registration number already exists",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, organization_id, department_id, user_id, name, email,
                              roll, registration_no, class, session, group_name)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            organization,
            &department_id,
            &user_id,
            &name,
            &email,
            &roll,
            &registration_no,
            class,
            session,
            &group,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("a student with this roll or registration number already exists")
        } else {
            HandlerErr::update(e)
        }
    })?;
    Ok(json!({ "id": id, "name": name, "roll": roll }))
}

fn add_exam(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let duplicate: bool = conn
        .query_row(
            "SELECT 1 FROM exams
             WHERE organization_id = ? AND name = ? AND deleted_at IS NULL",
            (organization, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if duplicate {
        return Err(HandlerErr::conflict("an exam with this name already exists"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, organization_id, name) VALUES(?, ?, ?)",
        (&id, organization, &name),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("an exam with this name already exists")
        } else {
            HandlerErr::update(e)
        }
    })?;
    Ok(json!({ "id": id, "name": name }))
}

fn delete_exam(
    conn: &Connection,
    organization: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let updated = conn
        .execute(
            "UPDATE exams SET deleted_at = ?
             WHERE id = ? AND organization_id = ? AND deleted_at IS NULL",
            (chrono::Utc::now().to_rfc3339(), &exam_id, organization),
        )
        .map_err(HandlerErr::update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("exam not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn list_exams(conn: &Connection, organization: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name FROM exams
             WHERE organization_id = ? AND deleted_at IS NULL
             ORDER BY name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([organization], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!(rows))
}

fn list_students(conn: &Connection, organization: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, email, roll, class, session, group_name
             FROM students
             WHERE organization_id = ?
             ORDER BY roll",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([organization], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "roll": r.get::<_, String>(3)?,
                "class": r.get::<_, i64>(4)?,
                "session": r.get::<_, i64>(5)?,
                "group": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!(rows))
}

fn dispatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let identity = require_staff(req)?;
    let organization = identity.organization.clone();
    let conn = db_conn(state)?;
    match req.method.as_str() {
        "directory.addDepartment" => add_department(conn, &organization, &req.params),
        "directory.addStudent" => add_student(conn, &organization, &req.params),
        "directory.addExam" => add_exam(conn, &organization, &req.params),
        "directory.deleteExam" => delete_exam(conn, &organization, &req.params),
        "directory.listExams" => list_exams(conn, &organization),
        "directory.listStudents" => list_students(conn, &organization),
        other => Err(HandlerErr::new(
            "not_implemented",
            format!("unknown method: {}", other),
        )),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("directory.") {
        return None;
    }
    Some(match dispatch(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
