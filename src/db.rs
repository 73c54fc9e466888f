use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolhub.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sclasses(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sclasses_school ON sclasses(school_id)",
        [],
    )?;

    // subjects.teacher_id is a plain column, not a foreign key: the
    // delete-teacher-then-clear-back-reference sequence runs as two
    // separate statements and must tolerate the window between them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            sclass_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT,
            sessions INTEGER NOT NULL,
            teacher_id TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(sclass_id) REFERENCES sclasses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_sclass ON subjects(sclass_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_teacher ON subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            sclass_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_num INTEGER NOT NULL,
            email TEXT,
            phone TEXT,
            gender TEXT,
            dob TEXT,
            address TEXT,
            password TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(sclass_id) REFERENCES sclasses(id),
            UNIQUE(school_id, roll_num)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sclass ON students(sclass_id)",
        [],
    )?;

    // Existing workspaces may predate the contact columns. Add if needed.
    ensure_students_contact_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            sclass_id TEXT,
            subject_id TEXT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            gender TEXT,
            dob TEXT,
            address TEXT,
            password TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_sclass ON teachers(sclass_id)",
        [],
    )?;

    // One mark per (student, subject); re-recording overwrites in place.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            marks REAL NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_subject ON exam_results(subject_id)",
        [],
    )?;

    // One row per (student, subject, calendar day). The per-subject session
    // cap is enforced at insert time by the attendance handler, not here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(student_id, subject_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_subject ON student_attendance(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_attendance(
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(teacher_id, date),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_contact_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "phone")? {
        conn.execute("ALTER TABLE students ADD COLUMN phone TEXT", [])?;
    }
    if !table_has_column(conn, "students", "address")? {
        conn.execute("ALTER TABLE students ADD COLUMN address TEXT", [])?;
    }
    if !table_has_column(conn, "students", "updated_at")? {
        conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
