use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;

    let taken = conn
        .query_row("SELECT 1 FROM schools WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(HandlerErr::conflict("email already exists"));
    }

    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, email, password, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&school_id, &name, &email, auth::hash_password(&password)),
    )
    .map_err(|e| HandlerErr::insert(e, "schools"))?;

    Ok(json!({ "id": school_id, "name": name, "email": email }))
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, name, password FROM schools WHERE email = ?",
            [&email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((id, name, stored)) = row else {
        return Err(HandlerErr::not_found("school not found"));
    };
    if !auth::verify_password(&password, &stored) {
        return Err(HandlerErr::new("invalid_credentials", "invalid password"));
    }

    Ok(json!({ "id": id, "name": name, "email": email }))
}

fn detail(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;

    // Correlated subqueries keep the dashboard counts join-free.
    conn.query_row(
        "SELECT
           s.id,
           s.name,
           s.email,
           (SELECT COUNT(*) FROM students st WHERE st.school_id = s.id) AS student_count,
           (SELECT COUNT(*) FROM teachers t WHERE t.school_id = s.id) AS teacher_count,
           (SELECT COUNT(*) FROM sclasses c WHERE c.school_id = s.id) AS class_count,
           (SELECT COUNT(*) FROM subjects sub WHERE sub.school_id = s.id) AS subject_count
         FROM schools s
         WHERE s.id = ?",
        [&school_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "studentCount": r.get::<_, i64>(3)?,
                "teacherCount": r.get::<_, i64>(4)?,
                "classCount": r.get::<_, i64>(5)?,
                "subjectCount": r.get::<_, i64>(6)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("school not found"))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: Handler = match req.method.as_str() {
        "school.register" => register,
        "school.login" => login,
        "school.detail" => detail,
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
