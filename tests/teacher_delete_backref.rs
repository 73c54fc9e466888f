use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolhubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolhubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn subject_teacher_id(subjects: &serde_json::Value, subject_id: &str) -> Option<String> {
    subjects["subjects"]
        .as_array()
        .expect("subjects array")
        .iter()
        .find(|s| s["id"].as_str() == Some(subject_id))
        .expect("subject present")["teacher"]
        .as_object()
        .and_then(|t| t["id"].as_str().map(|s| s.to_string()))
}

#[test]
fn deleting_a_teacher_clears_only_its_subject_back_reference() {
    let workspace = temp_dir("schoolhub-teacher-backref");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "school",
        "school.register",
        json!({
            "name": "Backref School",
            "email": "backref-admin@example.test",
            "password": "admin-pass"
        }),
    );
    let school_id = school["id"].as_str().expect("school id").to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "schoolId": school_id, "name": "10C" }),
    );
    let class_id = class["id"].as_str().expect("class id").to_string();

    let mut subject_ids = Vec::new();
    let mut teacher_ids = Vec::new();
    for (i, name) in ["Math", "History"].iter().enumerate() {
        let subject = request_ok(
            &mut stdin,
            &mut reader,
            &format!("sub{}", i),
            "subjects.create",
            json!({ "schoolId": school_id, "classId": class_id, "name": name, "sessions": 10 }),
        );
        let subject_id = subject["id"].as_str().expect("subject id").to_string();
        let teacher = request_ok(
            &mut stdin,
            &mut reader,
            &format!("teach{}", i),
            "teachers.register",
            json!({
                "name": format!("Teacher {}", name),
                "email": format!("{}@example.test", name.to_lowercase()),
                "password": "pw",
                "schoolId": school_id,
                "classId": class_id,
                "subjectId": subject_id
            }),
        );
        subject_ids.push(subject_id);
        teacher_ids.push(teacher["id"].as_str().expect("teacher id").to_string());
    }

    // Registration set both back-references.
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "before",
        "subjects.list",
        json!({ "schoolId": school_id }),
    );
    assert_eq!(
        subject_teacher_id(&before, &subject_ids[0]),
        Some(teacher_ids[0].clone())
    );
    assert_eq!(
        subject_teacher_id(&before, &subject_ids[1]),
        Some(teacher_ids[1].clone())
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "teachers.delete",
        json!({ "teacherId": teacher_ids[0] }),
    );

    // Exactly the deleted teacher's subject is cleared; the other keeps its
    // assignment.
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "after",
        "subjects.list",
        json!({ "schoolId": school_id }),
    );
    assert_eq!(subject_teacher_id(&after, &subject_ids[0]), None);
    assert_eq!(
        subject_teacher_id(&after, &subject_ids[1]),
        Some(teacher_ids[1].clone())
    );

    let free = request_ok(
        &mut stdin,
        &mut reader,
        "free",
        "subjects.free",
        json!({ "schoolId": school_id }),
    );
    let free_ids: Vec<&str> = free["subjects"]
        .as_array()
        .expect("subjects array")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(free_ids, vec![subject_ids[0].as_str()]);
}

#[test]
fn subject_reassignment_is_last_writer_wins() {
    let workspace = temp_dir("schoolhub-teacher-reassign");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "school",
        "school.register",
        json!({
            "name": "Reassign School",
            "email": "reassign-admin@example.test",
            "password": "admin-pass"
        }),
    );
    let school_id = school["id"].as_str().expect("school id").to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "schoolId": school_id, "name": "11A" }),
    );
    let class_id = class["id"].as_str().expect("class id").to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subjects.create",
        json!({ "schoolId": school_id, "classId": class_id, "name": "Chemistry", "sessions": 12 }),
    );
    let subject_id = subject["id"].as_str().expect("subject id").to_string();

    let t1 = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "teachers.register",
        json!({
            "name": "First Teacher",
            "email": "first@example.test",
            "password": "pw",
            "schoolId": school_id,
            "classId": class_id,
            "subjectId": subject_id
        }),
    );
    let t1_id = t1["id"].as_str().expect("teacher id").to_string();
    let t2 = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "teachers.register",
        json!({
            "name": "Second Teacher",
            "email": "second@example.test",
            "password": "pw",
            "schoolId": school_id,
            "classId": class_id
        }),
    );
    let t2_id = t2["id"].as_str().expect("teacher id").to_string();

    // Reassigning the subject to the second teacher overwrites the first
    // assignment without any unassigned check.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "up",
        "teachers.updateSubject",
        json!({ "teacherId": t2_id, "subjectId": subject_id }),
    );
    assert_eq!(
        updated["teachSubject"]["id"].as_str(),
        Some(subject_id.as_str())
    );

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "subs",
        "subjects.list",
        json!({ "schoolId": school_id }),
    );
    assert_eq!(
        subject_teacher_id(&subjects, &subject_id),
        Some(t2_id.clone())
    );
    assert_ne!(subject_teacher_id(&subjects, &subject_id), Some(t1_id));
}
