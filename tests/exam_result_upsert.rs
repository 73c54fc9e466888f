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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn marks_update_in_place_and_new_subjects_append() {
    let workspace = temp_dir("schoolhub-exam-upsert");
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
            "name": "Exam School",
            "email": "exam-admin@example.test",
            "password": "admin-pass"
        }),
    );
    let school_id = school["id"].as_str().expect("school id").to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "schoolId": school_id, "name": "9B" }),
    );
    let class_id = class["id"].as_str().expect("class id").to_string();
    let math = request_ok(
        &mut stdin,
        &mut reader,
        "math",
        "subjects.create",
        json!({ "schoolId": school_id, "classId": class_id, "name": "Math", "sessions": 20 }),
    );
    let math_id = math["id"].as_str().expect("subject id").to_string();
    let physics = request_ok(
        &mut stdin,
        &mut reader,
        "physics",
        "subjects.create",
        json!({ "schoolId": school_id, "classId": class_id, "name": "Physics", "sessions": 20 }),
    );
    let physics_id = physics["id"].as_str().expect("subject id").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.register",
        json!({
            "name": "An Nguyen",
            "rollNum": 1,
            "password": "pw",
            "schoolId": school_id,
            "classId": class_id
        }),
    );
    let student_id = student["id"].as_str().expect("student id").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "students.examResult",
        json!({ "studentId": student_id, "subjectId": math_id, "marks": 72.0 }),
    );
    let results = first["examResult"].as_array().expect("examResult array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["marksObtained"].as_f64(), Some(72.0));
    assert_eq!(results[0]["subject"]["name"].as_str(), Some("Math"));

    // Same subject again: overwrite, no second entry.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "students.examResult",
        json!({ "studentId": student_id, "subjectId": math_id, "marks": 85.0 }),
    );
    let results = second["examResult"].as_array().expect("examResult array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["marksObtained"].as_f64(), Some(85.0));

    // Identical re-submission leaves the sequence unchanged in content.
    let replay = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "students.examResult",
        json!({ "studentId": student_id, "subjectId": math_id, "marks": 85.0 }),
    );
    assert_eq!(replay["examResult"], second["examResult"]);

    // A different subject appends exactly one entry.
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "r4",
        "students.examResult",
        json!({ "studentId": student_id, "subjectId": physics_id, "marks": 64.5 }),
    );
    let results = third["examResult"].as_array().expect("examResult array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[1]["subject"]["name"].as_str(), Some("Physics"));
    assert_eq!(results[1]["marksObtained"].as_f64(), Some(64.5));

    let missing = request(
        &mut stdin,
        &mut reader,
        "r5",
        "students.examResult",
        json!({ "studentId": "missing", "subjectId": math_id, "marks": 50.0 }),
    );
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));
}
