use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn school_exists(conn: &Connection, school_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let name = get_required_str(params, "name")?;

    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::not_found("school not found"));
    }
    let taken = conn
        .query_row(
            "SELECT 1 FROM sclasses WHERE school_id = ? AND name = ?",
            (&school_id, &name),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(HandlerErr::conflict("class name already exists in this school"));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sclasses(id, school_id, name) VALUES(?, ?, ?)",
        (&class_id, &school_id, &name),
    )
    .map_err(|e| HandlerErr::insert(e, "sclasses"))?;

    Ok(json!({ "id": class_id, "schoolId": school_id, "name": name }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM students s WHERE s.sclass_id = c.id) AS student_count,
               (SELECT COUNT(*) FROM subjects sub WHERE sub.sclass_id = c.id) AS subject_count
             FROM sclasses c
             WHERE c.school_id = ?
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "studentCount": r.get::<_, i64>(2)?,
                "subjectCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "classes": classes }))
}

fn detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;

    conn.query_row(
        "SELECT c.id, c.name, c.school_id, sc.name
         FROM sclasses c
         JOIN schools sc ON sc.id = c.school_id
         WHERE c.id = ?",
        [&class_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "school": {
                    "id": r.get::<_, String>(2)?,
                    "name": r.get::<_, String>(3)?,
                },
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("class not found"))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;

    let exists = conn
        .query_row("SELECT 1 FROM sclasses WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("class not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;

    // Delete in dependency order (no ON DELETE CASCADE). Student-owned
    // rows go first, then students, then teachers and their attendance,
    // then the class-scoped subjects, then the class itself.
    tx.execute(
        "DELETE FROM exam_results
         WHERE student_id IN (SELECT id FROM students WHERE sclass_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::delete(e, "exam_results"))?;
    tx.execute(
        "DELETE FROM student_attendance
         WHERE student_id IN (SELECT id FROM students WHERE sclass_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::delete(e, "student_attendance"))?;
    tx.execute("DELETE FROM students WHERE sclass_id = ?", [&class_id])
        .map_err(|e| HandlerErr::delete(e, "students"))?;

    tx.execute(
        "DELETE FROM teacher_attendance
         WHERE teacher_id IN (SELECT id FROM teachers WHERE sclass_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::delete(e, "teacher_attendance"))?;
    // A deleted teacher may still be referenced by a subject outside this
    // class; clear those back-references before the teachers go away.
    tx.execute(
        "UPDATE subjects SET teacher_id = NULL
         WHERE teacher_id IN (SELECT id FROM teachers WHERE sclass_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::update(e, "subjects"))?;
    tx.execute("DELETE FROM teachers WHERE sclass_id = ?", [&class_id])
        .map_err(|e| HandlerErr::delete(e, "teachers"))?;

    tx.execute("DELETE FROM subjects WHERE sclass_id = ?", [&class_id])
        .map_err(|e| HandlerErr::delete(e, "subjects"))?;
    tx.execute("DELETE FROM sclasses WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::delete(e, "sclasses"))?;

    tx.commit().map_err(HandlerErr::commit)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: Handler = match req.method.as_str() {
        "classes.create" => create,
        "classes.list" => list,
        "classes.detail" => detail,
        "classes.delete" => delete,
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
