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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classroomd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classroomd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_of(value: &serde_json::Value, method: &str) -> serde_json::Value {
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("classroom-router-smoke");
    let bundle_out = workspace.join("smoke-backup.classroombackup.zip");
    let csv_out = workspace.join("smoke-attendance.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let seeded = request(&mut stdin, &mut reader, "3", "workspace.seedDemo", json!({}));
    let seeded = result_of(&seeded, "workspace.seedDemo");
    assert_eq!(seeded.get("seeded").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(seeded.get("classes").and_then(|v| v.as_i64()), Some(6));
    assert_eq!(seeded.get("students").and_then(|v| v.as_i64()), Some(15));

    let listed = request(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let listed = result_of(&listed, "classes.list");
    let classes = listed
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes array");
    assert_eq!(classes.len(), 6);
    let flagship = classes
        .iter()
        .find(|c| c.get("studentCount").and_then(|v| v.as_i64()) == Some(15))
        .expect("demo roster class");
    let class_id = flagship
        .get("id")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let students = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = result_of(&students, "students.list");
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(15)
    );

    let created_student = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({
            "classId": class_id,
            "name": "Smoke Student",
            "rollNumber": "016"
        }),
    );
    let created_student = result_of(&created_student, "students.create");
    let student_id = created_student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "patch": { "name": "Smoke Student Updated" }
        }),
    );

    let opened = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.sessionOpen",
        json!({ "classId": class_id, "date": "2025-09-15" }),
    );
    let opened = result_of(&opened, "attendance.sessionOpen");
    let session_id = opened
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    assert_eq!(
        opened
            .get("counts")
            .and_then(|c| c.get("unmarked"))
            .and_then(|v| v.as_i64()),
        Some(16)
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_id, "status": "late" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.counts",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.markAllPresent",
        json!({ "sessionId": session_id }),
    );
    let submitted = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.requestSubmit",
        json!({ "sessionId": session_id }),
    );
    let submitted = result_of(&submitted, "attendance.requestSubmit");
    assert_eq!(
        submitted.get("outcome").and_then(|v| v.as_str()),
        Some("submitted")
    );

    let detail = request(
        &mut stdin,
        &mut reader,
        "13",
        "students.detailOpen",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    let detail = result_of(&detail, "students.detailOpen");
    assert_eq!(
        detail
            .get("attendance")
            .and_then(|a| a.get("presentCount"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    let assignment = request(
        &mut stdin,
        &mut reader,
        "14",
        "assignments.create",
        json!({
            "classId": class_id,
            "title": "Algebra worksheet",
            "subject": "Mathematics",
            "description": "Chapter 4 exercises 1-10",
            "dueDate": "2025-09-22",
            "totalMarks": 20
        }),
    );
    let _ = result_of(&assignment, "assignments.create");
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "assignments.list",
        json!({ "classId": class_id }),
    );

    let dash = request(
        &mut stdin,
        &mut reader,
        "16",
        "dashboard.open",
        json!({ "today": "2025-09-15" }),
    );
    let dash = result_of(&dash, "dashboard.open");
    assert_eq!(
        dash.get("totalClasses").and_then(|v| v.as_i64()),
        Some(6)
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "exchange.exportAttendanceCsv",
        json!({ "classId": class_id, "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );

    let reopened = request(
        &mut stdin,
        &mut reader,
        "20",
        "attendance.sessionOpen",
        json!({ "classId": class_id, "date": "2025-09-16" }),
    );
    let reopened = result_of(&reopened, "attendance.sessionOpen");
    let reopened_id = reopened
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "attendance.sessionClose",
        json!({ "sessionId": reopened_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
