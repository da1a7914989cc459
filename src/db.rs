use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("registrar.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_departments_org ON departments(organization_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            department_id TEXT NOT NULL,
            user_id TEXT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            roll TEXT NOT NULL,
            registration_no TEXT NOT NULL,
            class INTEGER NOT NULL,
            session INTEGER NOT NULL,
            group_name TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(organization_id, roll),
            UNIQUE(organization_id, registration_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_org ON students(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_user ON students(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;
    // Exam names are unique per tenant among live exams; soft-deleted rows
    // keep their name without blocking reuse.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_exams_org_name
         ON exams(organization_id, name) WHERE deleted_at IS NULL",
        [],
    )?;

    // Attendance carries no organization column: tenancy is resolved through
    // the owning student on every read and write.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            department_id TEXT NOT NULL,
            status TEXT NOT NULL,
            date TEXT NOT NULL,
            group_name TEXT,
            remark TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_department ON attendance(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;

    // The compound unique index is the real duplicate-result guarantee; the
    // application-level check before insert only exists for a friendlier
    // error message.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            class INTEGER NOT NULL,
            session INTEGER NOT NULL,
            group_name TEXT,
            total_marks REAL NOT NULL,
            gpa REAL NOT NULL,
            grade TEXT NOT NULL,
            is_passed INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(student_id, exam_id, year, class, session, organization_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_org ON results(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_exam ON results(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_subjects(
            id TEXT PRIMARY KEY,
            result_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            subject TEXT NOT NULL,
            marks REAL NOT NULL,
            grade TEXT NOT NULL,
            gpa REAL NOT NULL,
            FOREIGN KEY(result_id) REFERENCES results(id),
            UNIQUE(result_id, sort_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_subjects_result ON result_subjects(result_id)",
        [],
    )?;

    Ok(conn)
}
