use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{
    get_optional_str, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let sessions = get_required_i64(params, "sessions")?;
    let code = get_optional_str(params, "code");

    if sessions < 1 {
        return Err(HandlerErr::bad_params("sessions must be at least 1"));
    }

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

    let taken = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE sclass_id = ? AND name = ?",
            (&class_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(HandlerErr::conflict("subject already exists in this class"));
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, school_id, sclass_id, name, code, sessions)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &school_id,
            &class_id,
            &name,
            code.as_deref(),
            sessions,
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "subjects"))?;

    Ok(json!({
        "id": subject_id,
        "schoolId": school_id,
        "classId": class_id,
        "name": name,
        "code": code,
        "sessions": sessions,
    }))
}

fn subject_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let teacher_id: Option<String> = r.get(5)?;
    let teacher_name: Option<String> = r.get(6)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "code": r.get::<_, Option<String>>(2)?,
        "sessions": r.get::<_, i64>(3)?,
        "sclass": { "id": r.get::<_, String>(4)?, "name": r.get::<_, String>(7)? },
        "teacher": teacher_id.map(|id| json!({ "id": id, "name": teacher_name })),
    }))
}

const SUBJECT_SELECT: &str = "SELECT
   sub.id, sub.name, sub.code, sub.sessions, sub.sclass_id,
   t.id, t.name, c.name
 FROM subjects sub
 JOIN sclasses c ON c.id = sub.sclass_id
 LEFT JOIN teachers t ON t.id = sub.teacher_id";

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    let sql = format!("{} WHERE sub.school_id = ? ORDER BY c.name, sub.name", SUBJECT_SELECT);
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([&school_id], subject_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "subjects": subjects }))
}

fn free(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    let sql = format!(
        "{} WHERE sub.school_id = ? AND sub.teacher_id IS NULL ORDER BY c.name, sub.name",
        SUBJECT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([&school_id], subject_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "subjects": subjects }))
}

fn detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let sql = format!("{} WHERE sub.id = ?", SUBJECT_SELECT);
    conn.query_row(&sql, [&subject_id], subject_row_json)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("subject not found"))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let exists = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;

    tx.execute(
        "DELETE FROM exam_results WHERE subject_id = ?",
        [&subject_id],
    )
    .map_err(|e| HandlerErr::delete(e, "exam_results"))?;
    tx.execute(
        "DELETE FROM student_attendance WHERE subject_id = ?",
        [&subject_id],
    )
    .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    tx.execute(
        "UPDATE teachers SET subject_id = NULL WHERE subject_id = ?",
        [&subject_id],
    )
    .map_err(|e| HandlerErr::update(e, "teachers"))?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::delete(e, "subjects"))?;

    tx.commit().map_err(HandlerErr::commit)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: Handler = match req.method.as_str() {
        "subjects.create" => create,
        "subjects.list" => list,
        "subjects.free" => free,
        "subjects.detail" => detail,
        "subjects.delete" => delete,
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
