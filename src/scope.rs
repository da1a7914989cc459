use rusqlite::{Connection, OptionalExtension};

/// Tenant-scoped lookups against the consumed stores. Every engine operation
/// resolves its student/exam through these, so a record outside the caller's
/// organization is indistinguishable from a missing one.
#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub roll: String,
    pub class: i64,
    pub session: i64,
    pub group_name: Option<String>,
    pub department_id: String,
}

#[derive(Debug, Clone)]
pub struct ExamRow {
    pub id: String,
    pub name: String,
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        roll: r.get(3)?,
        class: r.get(4)?,
        session: r.get(5)?,
        group_name: r.get(6)?,
        department_id: r.get(7)?,
    })
}

pub fn student_in_org(
    conn: &Connection,
    student_id: &str,
    organization: &str,
) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        "SELECT id, name, email, roll, class, session, group_name, department_id
         FROM students
         WHERE id = ? AND organization_id = ?",
        (student_id, organization),
        |r| student_from_row(r),
    )
    .optional()
}

/// Resolves the student row linked to an authenticated student identity.
/// Client-supplied student ids are never accepted on the student-facing
/// paths; this lookup is the only way in.
pub fn student_for_user(
    conn: &Connection,
    user_id: &str,
    organization: &str,
) -> rusqlite::Result<Option<StudentRow>> {
    conn.query_row(
        "SELECT id, name, email, roll, class, session, group_name, department_id
         FROM students
         WHERE user_id = ? AND organization_id = ?",
        (user_id, organization),
        |r| student_from_row(r),
    )
    .optional()
}

/// Live (non-soft-deleted) exams only; a result may never reference a
/// deleted exam.
pub fn exam_in_org(
    conn: &Connection,
    exam_id: &str,
    organization: &str,
) -> rusqlite::Result<Option<ExamRow>> {
    conn.query_row(
        "SELECT id, name
         FROM exams
         WHERE id = ? AND organization_id = ? AND deleted_at IS NULL",
        (exam_id, organization),
        |r| {
            Ok(ExamRow {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        },
    )
    .optional()
}
