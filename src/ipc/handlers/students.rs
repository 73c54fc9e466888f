use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{
    get_optional_str, get_required_f64, get_required_i64, get_required_str, normalize_date,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

/// Exam results with the subject's display name inlined, oldest first.
fn exam_results_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT er.subject_id, sub.name, er.marks
             FROM exam_results er
             LEFT JOIN subjects sub ON sub.id = er.subject_id
             WHERE er.student_id = ?
             ORDER BY er.rowid",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], |r| {
        Ok(json!({
            "subject": { "id": r.get::<_, String>(0)?, "name": r.get::<_, Option<String>>(1)? },
            "marksObtained": r.get::<_, f64>(2)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Attendance with subject name and session cap inlined, oldest first.
fn attendance_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sa.subject_id, sub.name, sub.sessions, sa.date, sa.status
             FROM student_attendance sa
             LEFT JOIN subjects sub ON sub.id = sa.subject_id
             WHERE sa.student_id = ?
             ORDER BY sa.rowid",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], |r| {
        Ok(json!({
            "subject": {
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, Option<String>>(1)?,
                "sessions": r.get::<_, Option<i64>>(2)?,
            },
            "date": r.get::<_, String>(3)?,
            "status": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let roll_num = get_required_i64(params, "rollNum")?;
    let password = get_required_str(params, "password")?;
    let school_id = get_required_str(params, "schoolId")?;
    let class_id = get_required_str(params, "classId")?;
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");
    let gender = get_optional_str(params, "gender");
    let dob = get_optional_str(params, "dob");
    let address = get_optional_str(params, "address");

    let class_ok = conn
        .query_row(
            "SELECT 1 FROM sclasses WHERE id = ? AND school_id = ?",
            (&class_id, &school_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !class_ok {
        return Err(HandlerErr::not_found("class not found in this school"));
    }

    // Roll numbers are unique per school, not globally.
    let taken = conn
        .query_row(
            "SELECT 1 FROM students WHERE school_id = ? AND roll_num = ?",
            (&school_id, roll_num),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(HandlerErr::conflict(
            "roll number already exists in this school",
        ));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
           id, school_id, sclass_id, name, roll_num,
           email, phone, gender, dob, address, password, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &student_id,
            &school_id,
            &class_id,
            &name,
            roll_num,
            email.as_deref(),
            phone.as_deref(),
            gender.as_deref(),
            dob.as_deref(),
            address.as_deref(),
            auth::hash_password(&password),
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "students"))?;

    Ok(json!({
        "id": student_id,
        "schoolId": school_id,
        "classId": class_id,
        "name": name,
        "rollNum": roll_num,
        "email": email,
    }))
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let password = get_required_str(params, "password")?;
    let roll_num = params.get("rollNum").and_then(|v| v.as_i64());
    let name = get_optional_str(params, "name");
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");

    // Identifier fallback chain: roll number + name, then email, then phone.
    let mut found: Option<(String, String)> = None;
    if let (Some(roll), Some(name)) = (roll_num, name.as_deref()) {
        found = conn
            .query_row(
                "SELECT id, password FROM students WHERE roll_num = ? AND name = ?",
                (roll, name),
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(HandlerErr::query)?;
    }
    if found.is_none() {
        if let Some(email) = email.as_deref() {
            found = conn
                .query_row(
                    "SELECT id, password FROM students WHERE email = ?",
                    [email],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(HandlerErr::query)?;
        }
    }
    if found.is_none() {
        if let Some(phone) = phone.as_deref() {
            found = conn
                .query_row(
                    "SELECT id, password FROM students WHERE phone = ?",
                    [phone],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(HandlerErr::query)?;
        }
    }

    let Some((student_id, stored)) = found else {
        return Err(HandlerErr::not_found("student not found"));
    };
    if !auth::verify_password(&password, &stored) {
        return Err(HandlerErr::new("invalid_credentials", "invalid password"));
    }

    // Login responses carry identity plus display names only; exam results
    // and attendance are fetched through students.detail.
    conn.query_row(
        "SELECT s.id, s.name, s.roll_num, sc.id, sc.name, c.id, c.name
         FROM students s
         JOIN schools sc ON sc.id = s.school_id
         JOIN sclasses c ON c.id = s.sclass_id
         WHERE s.id = ?",
        [&student_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNum": r.get::<_, i64>(2)?,
                "school": { "id": r.get::<_, String>(3)?, "name": r.get::<_, String>(4)? },
                "sclass": { "id": r.get::<_, String>(5)?, "name": r.get::<_, String>(6)? },
            }))
        },
    )
    .map_err(HandlerErr::query)
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.roll_num, c.id, c.name
             FROM students s
             JOIN sclasses c ON c.id = s.sclass_id
             WHERE s.school_id = ?
             ORDER BY c.name, s.roll_num",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNum": r.get::<_, i64>(2)?,
                "sclass": { "id": r.get::<_, String>(3)?, "name": r.get::<_, String>(4)? },
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "students": students }))
}

fn detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let base = conn
        .query_row(
            "SELECT s.id, s.name, s.roll_num, s.email, s.phone, s.gender, s.dob, s.address,
                    sc.id, sc.name, c.id, c.name
             FROM students s
             JOIN schools sc ON sc.id = s.school_id
             JOIN sclasses c ON c.id = s.sclass_id
             WHERE s.id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "rollNum": r.get::<_, i64>(2)?,
                    "email": r.get::<_, Option<String>>(3)?,
                    "phone": r.get::<_, Option<String>>(4)?,
                    "gender": r.get::<_, Option<String>>(5)?,
                    "dob": r.get::<_, Option<String>>(6)?,
                    "address": r.get::<_, Option<String>>(7)?,
                    "school": { "id": r.get::<_, String>(8)?, "name": r.get::<_, String>(9)? },
                    "sclass": { "id": r.get::<_, String>(10)?, "name": r.get::<_, String>(11)? },
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(mut student) = base else {
        return Err(HandlerErr::not_found("student not found"));
    };

    student["examResult"] = json!(exam_results_json(conn, &student_id)?);
    student["attendance"] = json!(attendance_json(conn, &student_id)?);
    Ok(student)
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    for key in ["name", "email", "phone", "gender", "dob", "address"] {
        if let Some(v) = get_optional_str(params, key) {
            sets.push(format!("{} = ?", key));
            values.push(Box::new(v));
        }
    }
    if let Some(roll) = params.get("rollNum").and_then(|v| v.as_i64()) {
        sets.push("roll_num = ?".to_string());
        values.push(Box::new(roll));
    }
    // A supplied password is re-hashed; the stored hash is never patched raw.
    if let Some(password) = get_optional_str(params, "password") {
        sets.push("password = ?".to_string());
        values.push(Box::new(auth::hash_password(&password)));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("no updatable fields supplied"));
    }

    sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".to_string());
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    values.push(Box::new(student_id.clone()));
    conn.execute(&sql, rusqlite::params_from_iter(values.iter()))
        .map_err(|e| HandlerErr::update(e, "students"))?;

    detail(conn, &json!({ "studentId": student_id }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Exam results and attendance are owned rows; they go with the student.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM exam_results WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::delete(e, "exam_results"))?;
    tx.execute(
        "DELETE FROM student_attendance WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::delete(e, "students"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    Ok(json!({ "ok": true }))
}

fn delete_matching(conn: &Connection, filter_col: &str, key: &str) -> Result<serde_json::Value, HandlerErr> {
    let count_sql = format!("SELECT COUNT(*) FROM students WHERE {} = ?", filter_col);
    let count: i64 = conn
        .query_row(&count_sql, [key], |r| r.get(0))
        .map_err(HandlerErr::query)?;
    if count == 0 {
        return Ok(json!({ "deleted": 0, "message": "no students found to delete" }));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        &format!(
            "DELETE FROM exam_results
             WHERE student_id IN (SELECT id FROM students WHERE {} = ?)",
            filter_col
        ),
        [key],
    )
    .map_err(|e| HandlerErr::delete(e, "exam_results"))?;
    tx.execute(
        &format!(
            "DELETE FROM student_attendance
             WHERE student_id IN (SELECT id FROM students WHERE {} = ?)",
            filter_col
        ),
        [key],
    )
    .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    let deleted = tx
        .execute(
            &format!("DELETE FROM students WHERE {} = ?", filter_col),
            [key],
        )
        .map_err(|e| HandlerErr::delete(e, "students"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    Ok(json!({ "deleted": deleted }))
}

fn delete_by_school(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    delete_matching(conn, "school_id", &school_id)
}

fn delete_by_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    delete_matching(conn, "sclass_id", &class_id)
}

/// Record or overwrite the mark for one (student, subject) pair.
/// Re-submitting the same pair updates in place; the sequence never
/// grows a second entry for a subject.
fn exam_result(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let marks = get_required_f64(params, "marks")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO exam_results(student_id, subject_id, marks, updated_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
           marks = excluded.marks,
           updated_at = excluded.updated_at",
        (&student_id, &subject_id, marks),
    )
    .map_err(|e| HandlerErr::update(e, "exam_results"))?;

    Ok(json!({
        "studentId": student_id,
        "examResult": exam_results_json(conn, &student_id)?,
    }))
}

/// Attendance reconciler: upsert by (subject, calendar day), with the
/// subject's session count as a hard cap on distinct days.
fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let status = get_required_str(params, "status")?;
    let date = normalize_date(&get_required_str(params, "date")?)?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let sessions: Option<i64> = conn
        .query_row(
            "SELECT sessions FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(sessions) = sessions else {
        return Err(HandlerErr::not_found("subject not found"));
    };

    let existing = conn
        .query_row(
            "SELECT 1 FROM student_attendance
             WHERE student_id = ? AND subject_id = ? AND date = ?",
            (&student_id, &subject_id, &date),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();

    if existing {
        conn.execute(
            "UPDATE student_attendance SET status = ?
             WHERE student_id = ? AND subject_id = ? AND date = ?",
            (&status, &student_id, &subject_id, &date),
        )
        .map_err(|e| HandlerErr::update(e, "student_attendance"))?;
    } else {
        let attended: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM student_attendance
                 WHERE student_id = ? AND subject_id = ?",
                (&student_id, &subject_id),
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?;
        if attended >= sessions {
            // Cap reached: refuse without touching the sequence.
            return Err(HandlerErr::new(
                "capacity_exceeded",
                "maximum attendance limit reached",
            ));
        }
        conn.execute(
            "INSERT INTO student_attendance(student_id, subject_id, date, status)
             VALUES(?, ?, ?, ?)",
            (&student_id, &subject_id, &date, &status),
        )
        .map_err(|e| HandlerErr::insert(e, "student_attendance"))?;
    }

    Ok(json!({
        "studentId": student_id,
        "attendance": attendance_json(conn, &student_id)?,
    }))
}

fn attendance_clear_subject_all(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let removed = conn
        .execute(
            "DELETE FROM student_attendance WHERE subject_id = ?",
            [&subject_id],
        )
        .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    Ok(json!({ "removed": removed }))
}

fn attendance_clear_school(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let removed = conn
        .execute(
            "DELETE FROM student_attendance
             WHERE student_id IN (SELECT id FROM students WHERE school_id = ?)",
            [&school_id],
        )
        .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    Ok(json!({ "removed": removed }))
}

fn attendance_clear_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let removed = conn
        .execute(
            "DELETE FROM student_attendance WHERE student_id = ? AND subject_id = ?",
            (&student_id, &subject_id),
        )
        .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    Ok(json!({ "removed": removed }))
}

fn attendance_clear(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let removed = conn
        .execute(
            "DELETE FROM student_attendance WHERE student_id = ?",
            [&student_id],
        )
        .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: Handler = match req.method.as_str() {
        "students.register" => register,
        "students.login" => login,
        "students.list" => list,
        "students.detail" => detail,
        "students.update" => update,
        "students.delete" => delete,
        "students.deleteBySchool" => delete_by_school,
        "students.deleteByClass" => delete_by_class,
        "students.examResult" => exam_result,
        "students.attendance.record" => attendance_record,
        "students.attendance.clearSubjectAll" => attendance_clear_subject_all,
        "students.attendance.clearSchool" => attendance_clear_school,
        "students.attendance.clearSubject" => attendance_clear_subject,
        "students.attendance.clear" => attendance_clear,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
