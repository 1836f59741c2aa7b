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

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected an error response, got: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn counts_of(result: &serde_json::Value) -> (i64, i64, i64, i64) {
    let counts = result.get("counts").expect("counts object");
    (
        counts.get("present").and_then(|v| v.as_i64()).expect("present"),
        counts.get("absent").and_then(|v| v.as_i64()).expect("absent"),
        counts.get("late").and_then(|v| v.as_i64()).expect("late"),
        counts.get("unmarked").and_then(|v| v.as_i64()).expect("unmarked"),
    )
}

#[test]
fn session_marking_gating_and_terminal_state() {
    let workspace = temp_dir("classroom-session-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({
            "name": "Grade 10 - Section A",
            "grade": "10",
            "section": "A",
            "subject": "Mathematics"
        }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Ahmed Ali Khan", "Fatima Hassan", "Hassan Ahmed", "Ayesha Malik"]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "name": name,
                "rollNumber": format!("{:03}", i + 1)
            }),
        );
        student_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    // Inactive students stay off the session roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "classId": class_id,
            "name": "Transferred Out",
            "rollNumber": "005",
            "active": false
        }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.sessionOpen",
        json!({ "classId": class_id, "date": "2025-09-12" }),
    );
    let session_id = opened
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    assert_eq!(counts_of(&opened), (0, 0, 0, 4));
    let roster = opened
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array");
    assert_eq!(roster.len(), 4);
    assert!(roster
        .iter()
        .all(|s| s.get("status").and_then(|v| v.as_str()) == Some("unmarked")));

    // Overwrite semantics: re-marking replaces, never accumulates.
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_ids[0], "status": "present" }),
    );
    assert_eq!(counts_of(&marked), (1, 0, 0, 3));
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_ids[0], "status": "present" }),
    );
    assert_eq!(counts_of(&marked), (1, 0, 0, 3));
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_ids[0], "status": "absent" }),
    );
    assert_eq!(counts_of(&marked), (0, 1, 0, 3));

    // Stale id from a dropped roster must not corrupt the session.
    let stale = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": "999", "status": "present" }),
    );
    assert_eq!(error_code(&stale), "unknown_student");
    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.counts",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(counts_of(&unchanged), (0, 1, 0, 3));

    // Unmarked is the initial state only, never a settable mark.
    let bad_status = request(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_ids[1], "status": "unmarked" }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    // Incomplete submit needs an explicit confirmation.
    let gated = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.requestSubmit",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(
        gated.get("outcome").and_then(|v| v.as_str()),
        Some("needsConfirmation")
    );
    assert_eq!(gated.get("unmarked").and_then(|v| v.as_i64()), Some(3));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.cancelSubmit",
        json!({ "sessionId": session_id }),
    );
    let after_cancel = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.counts",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(counts_of(&after_cancel), (0, 1, 0, 3));

    let confirmed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.confirmSubmit",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(
        confirmed.get("outcome").and_then(|v| v.as_str()),
        Some("submitted")
    );
    assert!(confirmed
        .get("recordId")
        .and_then(|v| v.as_str())
        .is_some());

    // Terminal state: every mutation is refused, counts stay frozen.
    let closed = request(
        &mut stdin,
        &mut reader,
        "16",
        "attendance.setStatus",
        json!({ "sessionId": session_id, "studentId": student_ids[1], "status": "present" }),
    );
    assert_eq!(error_code(&closed), "session_closed");
    let closed = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.markAllPresent",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(error_code(&closed), "session_closed");
    let frozen = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "attendance.counts",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(counts_of(&frozen), (0, 1, 0, 3));
    assert_eq!(frozen.get("submitted").and_then(|v| v.as_bool()), Some(true));

    // The durable record keeps unmarked entries for the incomplete submit.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "students.detailOpen",
        json!({ "classId": class_id, "studentId": student_ids[0] }),
    );
    let attendance = detail.get("attendance").expect("attendance block");
    assert_eq!(
        attendance.get("absentCount").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        attendance.get("attendanceRate").and_then(|v| v.as_i64()),
        Some(0)
    );
    let history = attendance
        .get("history")
        .and_then(|v| v.as_array())
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].get("date").and_then(|v| v.as_str()),
        Some("2025-09-12")
    );
    assert_eq!(
        history[0].get("status").and_then(|v| v.as_str()),
        Some("absent")
    );

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "students.detailOpen",
        json!({ "classId": class_id, "studentId": student_ids[1] }),
    );
    assert_eq!(
        detail
            .get("attendance")
            .and_then(|a| a.get("unmarkedCount"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    // A submitted session can still be dropped; afterwards it is gone.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "attendance.sessionClose",
        json!({ "sessionId": session_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "22",
        "attendance.counts",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
