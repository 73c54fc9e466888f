use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{
    get_optional_str, get_required_str, normalize_date, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn teacher_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let subject_id: Option<String> = r.get(3)?;
    let subject_name: Option<String> = r.get(4)?;
    let subject_sessions: Option<i64> = r.get(5)?;
    let class_id: Option<String> = r.get(6)?;
    let class_name: Option<String> = r.get(7)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "teachSubject": subject_id.map(|id| json!({
            "id": id,
            "name": subject_name,
            "sessions": subject_sessions,
        })),
        "teachSclass": class_id.map(|id| json!({ "id": id, "name": class_name })),
    }))
}

const TEACHER_SELECT: &str = "SELECT
   t.id, t.name, t.email,
   sub.id, sub.name, sub.sessions,
   c.id, c.name
 FROM teachers t
 LEFT JOIN subjects sub ON sub.id = t.subject_id
 LEFT JOIN sclasses c ON c.id = t.sclass_id";

fn register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let school_id = get_required_str(params, "schoolId")?;
    let class_id = get_optional_str(params, "classId");
    let subject_id = get_optional_str(params, "subjectId");
    let phone = get_optional_str(params, "phone");
    let gender = get_optional_str(params, "gender");
    let dob = get_optional_str(params, "dob");
    let address = get_optional_str(params, "address");

    let school_ok = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !school_ok {
        return Err(HandlerErr::not_found("school not found"));
    }

    // Emails are unique across the whole teacher collection.
    let taken = conn
        .query_row("SELECT 1 FROM teachers WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(HandlerErr::conflict("email already exists"));
    }

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(
           id, school_id, sclass_id, subject_id, name, email,
           phone, gender, dob, address, password, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &teacher_id,
            &school_id,
            class_id.as_deref(),
            subject_id.as_deref(),
            &name,
            &email,
            phone.as_deref(),
            gender.as_deref(),
            dob.as_deref(),
            address.as_deref(),
            auth::hash_password(&password),
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "teachers"))?;

    // Point the subject back at its new teacher. Last writer wins; a
    // previous assignment is overwritten without complaint.
    if let Some(subject_id) = subject_id.as_deref() {
        conn.execute(
            "UPDATE subjects SET teacher_id = ? WHERE id = ?",
            (&teacher_id, subject_id),
        )
        .map_err(|e| HandlerErr::update(e, "subjects"))?;
    }

    Ok(json!({
        "id": teacher_id,
        "schoolId": school_id,
        "classId": class_id,
        "subjectId": subject_id,
        "name": name,
        "email": email,
    }))
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, password FROM teachers WHERE email = ?",
            [&email],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((teacher_id, stored)) = row else {
        return Err(HandlerErr::not_found("teacher not found"));
    };
    if !auth::verify_password(&password, &stored) {
        return Err(HandlerErr::new("invalid_credentials", "invalid password"));
    }

    let sql = format!("{} WHERE t.id = ?", TEACHER_SELECT);
    conn.query_row(&sql, [&teacher_id], teacher_row_json)
        .map_err(HandlerErr::query)
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    let sql = format!("{} WHERE t.school_id = ? ORDER BY t.name", TEACHER_SELECT);
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let teachers = stmt
        .query_map([&school_id], teacher_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "teachers": teachers }))
}

fn detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;

    let sql = format!("{} WHERE t.id = ?", TEACHER_SELECT);
    let mut teacher = conn
        .query_row(&sql, [&teacher_id], teacher_row_json)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("teacher not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT date, status FROM teacher_attendance
             WHERE teacher_id = ? ORDER BY date",
        )
        .map_err(HandlerErr::query)?;
    let attendance = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    teacher["attendance"] = json!(attendance);

    Ok(teacher)
}

fn update_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let subject_id = get_required_str(params, "subjectId")?;

    let updated = conn
        .execute(
            "UPDATE teachers SET subject_id = ? WHERE id = ?",
            (&subject_id, &teacher_id),
        )
        .map_err(|e| HandlerErr::update(e, "teachers"))?;
    if updated == 0 {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    conn.execute(
        "UPDATE subjects SET teacher_id = ? WHERE id = ?",
        (&teacher_id, &subject_id),
    )
    .map_err(|e| HandlerErr::update(e, "subjects"))?;

    let sql = format!("{} WHERE t.id = ?", TEACHER_SELECT);
    conn.query_row(&sql, [&teacher_id], teacher_row_json)
        .map_err(HandlerErr::query)
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;

    let exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "DELETE FROM teacher_attendance WHERE teacher_id = ?",
        [&teacher_id],
    )
    .map_err(|e| HandlerErr::delete(e, "teacher_attendance"))?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr::delete(e, "teachers"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    // Back-reference cleanup runs after the delete commits; a crash in
    // between leaves a dangling teacher_id until the next cleanup.
    conn.execute(
        "UPDATE subjects SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    )
    .map_err(|e| HandlerErr::update(e, "subjects"))?;

    Ok(json!({ "ok": true }))
}

fn delete_matching(conn: &Connection, filter_col: &str, key: &str) -> Result<serde_json::Value, HandlerErr> {
    let ids_sql = format!("SELECT id FROM teachers WHERE {} = ?", filter_col);
    let mut stmt = conn.prepare(&ids_sql).map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([key], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    // Zero matches short-circuits: no deletes, no back-reference writes.
    if ids.is_empty() {
        return Ok(json!({ "deleted": 0, "message": "no teachers found to delete" }));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        &format!(
            "DELETE FROM teacher_attendance
             WHERE teacher_id IN (SELECT id FROM teachers WHERE {} = ?)",
            filter_col
        ),
        [key],
    )
    .map_err(|e| HandlerErr::delete(e, "teacher_attendance"))?;
    let deleted = tx
        .execute(
            &format!("DELETE FROM teachers WHERE {} = ?", filter_col),
            [key],
        )
        .map_err(|e| HandlerErr::delete(e, "teachers"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    let placeholders = vec!["?"; ids.len()].join(", ");
    conn.execute(
        &format!(
            "UPDATE subjects SET teacher_id = NULL WHERE teacher_id IN ({})",
            placeholders
        ),
        rusqlite::params_from_iter(ids.iter()),
    )
    .map_err(|e| HandlerErr::update(e, "subjects"))?;

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

/// Teacher attendance is keyed by calendar day alone; re-recording a day
/// overwrites its status.
fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let status = get_required_str(params, "status")?;
    let date = normalize_date(&get_required_str(params, "date")?)?;

    let exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    conn.execute(
        "INSERT INTO teacher_attendance(teacher_id, date, status)
         VALUES(?, ?, ?)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           status = excluded.status",
        (&teacher_id, &date, &status),
    )
    .map_err(|e| HandlerErr::update(e, "teacher_attendance"))?;

    let mut stmt = conn
        .prepare(
            "SELECT date, status FROM teacher_attendance
             WHERE teacher_id = ? ORDER BY date",
        )
        .map_err(HandlerErr::query)?;
    let attendance = stmt
        .query_map([&teacher_id], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "teacherId": teacher_id, "attendance": attendance }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: Handler = match req.method.as_str() {
        "teachers.register" => register,
        "teachers.login" => login,
        "teachers.list" => list,
        "teachers.detail" => detail,
        "teachers.updateSubject" => update_subject,
        "teachers.delete" => delete,
        "teachers.deleteBySchool" => delete_by_school,
        "teachers.deleteByClass" => delete_by_class,
        "teachers.attendance.record" => attendance_record,
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
