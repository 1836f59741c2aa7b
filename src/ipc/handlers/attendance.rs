use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{
    AttendanceSession, AttendanceStatus, SessionError, Student, SubmissionPayload, SubmitOutcome,
};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn from_session(e: SessionError) -> HandlerErr {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: None,
        }
    }
}

type Sessions = HashMap<String, AttendanceSession>;

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn check_iso_date(date: &str) -> Result<(), HandlerErr> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| HandlerErr {
            code: "bad_params",
            message: "date must be YYYY-MM-DD".to_string(),
            details: None,
        })
}

fn class_name(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT name FROM classes WHERE id = ?",
        [class_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn roster_for_class(conn: &Connection, class_id: &str) -> Result<Vec<Student>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, roll_number
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([class_id], |r| {
        Ok(Student {
            id: r.get(0)?,
            name: r.get(1)?,
            roll_number: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            status: AttendanceStatus::Unmarked,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn find_session<'a>(
    sessions: &'a mut Sessions,
    session_id: &str,
) -> Result<&'a mut AttendanceSession, HandlerErr> {
    sessions.get_mut(session_id).ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "session not found".to_string(),
        details: Some(json!({ "sessionId": session_id })),
    })
}

fn counts_json(session: &AttendanceSession) -> serde_json::Value {
    json!({
        "counts": session.counts(),
        "isComplete": session.is_complete(),
        "submitted": session.is_submitted(),
    })
}

fn session_snapshot(session_id: &str, session: &AttendanceSession) -> serde_json::Value {
    json!({
        "sessionId": session_id,
        "classId": session.class_id(),
        "className": session.class_name(),
        "date": session.date(),
        "students": session.roster(),
        "counts": session.counts(),
        "isComplete": session.is_complete(),
    })
}

/// Writes one record plus one entry per roster member, replacing any prior
/// record for the same class/date. Only a committed transaction counts as the
/// sink accepting the payload.
fn persist_submission(
    conn: &Connection,
    payload: &SubmissionPayload,
) -> Result<String, HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let prior: Option<String> = tx
        .query_row(
            "SELECT id FROM attendance_records WHERE class_id = ? AND date = ?",
            (&payload.class_id, &payload.date),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if let Some(prior_id) = prior {
        tx.execute(
            "DELETE FROM attendance_entries WHERE record_id = ?",
            [&prior_id],
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_entries" })),
        })?;
        tx.execute("DELETE FROM attendance_records WHERE id = ?", [&prior_id])
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "attendance_records" })),
            })?;
    }

    let record_id = Uuid::new_v4().to_string();
    let submitted_at = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO attendance_records(id, class_id, date, submitted_at)
         VALUES(?, ?, ?, ?)",
        (&record_id, &payload.class_id, &payload.date, &submitted_at),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;
    for entry in &payload.entries {
        tx.execute(
            "INSERT INTO attendance_entries(record_id, student_id, status)
             VALUES(?, ?, ?)",
            (&record_id, &entry.student_id, entry.status.as_str()),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_entries" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(record_id)
}

fn session_open(
    conn: &Connection,
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_str(params, "date")?;
    check_iso_date(&date)?;

    let Some(name) = class_name(conn, &class_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    };
    let roster = roster_for_class(conn, &class_id)?;
    let session = AttendanceSession::new(class_id, name, date, roster)
        .map_err(HandlerErr::from_session)?;

    let session_id = Uuid::new_v4().to_string();
    let snapshot = session_snapshot(&session_id, &session);
    sessions.insert(session_id, session);
    Ok(snapshot)
}

fn set_status(sessions: &mut Sessions, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = AttendanceStatus::parse_mark(&status_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be present, absent, or late".to_string(),
            details: None,
        });
    };

    let session = find_session(sessions, &session_id)?;
    session
        .set_status(&student_id, status)
        .map_err(HandlerErr::from_session)?;
    Ok(counts_json(session))
}

fn mark_all_present(
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = find_session(sessions, &session_id)?;
    session.mark_all_present().map_err(HandlerErr::from_session)?;
    Ok(counts_json(session))
}

fn counts(sessions: &mut Sessions, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = find_session(sessions, &session_id)?;
    Ok(counts_json(session))
}

fn request_submit(
    conn: &Connection,
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = find_session(sessions, &session_id)?;
    match session.request_submit().map_err(HandlerErr::from_session)? {
        SubmitOutcome::NeedsConfirmation { unmarked } => Ok(json!({
            "outcome": "needsConfirmation",
            "unmarked": unmarked,
        })),
        SubmitOutcome::ReadyToSubmit(payload) => {
            let record_id = persist_submission(conn, &payload)?;
            session.mark_submitted().map_err(HandlerErr::from_session)?;
            Ok(json!({
                "outcome": "submitted",
                "recordId": record_id,
                "counts": session.counts(),
            }))
        }
    }
}

fn confirm_submit(
    conn: &Connection,
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = find_session(sessions, &session_id)?;
    let payload = session.confirm_submit().map_err(HandlerErr::from_session)?;
    let record_id = persist_submission(conn, &payload)?;
    session.mark_submitted().map_err(HandlerErr::from_session)?;
    Ok(json!({
        "outcome": "submitted",
        "recordId": record_id,
        "counts": session.counts(),
    }))
}

fn cancel_submit(
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = find_session(sessions, &session_id)?;
    session.cancel_submit().map_err(HandlerErr::from_session)?;
    Ok(json!({ "ok": true }))
}

fn session_close(
    sessions: &mut Sessions,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    if sessions.remove(&session_id).is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: Some(json!({ "sessionId": session_id })),
        });
    }
    Ok(json!({ "ok": true }))
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match session_open(conn, &mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    match set_status(&mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_mark_all_present(state: &mut AppState, req: &Request) -> serde_json::Value {
    match mark_all_present(&mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_counts(state: &mut AppState, req: &Request) -> serde_json::Value {
    match counts(&mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_request_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match request_submit(conn, &mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_confirm_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match confirm_submit(conn, &mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_cancel_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    match cancel_submit(&mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    match session_close(&mut state.sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sessionOpen" => Some(handle_session_open(state, req)),
        "attendance.setStatus" => Some(handle_set_status(state, req)),
        "attendance.markAllPresent" => Some(handle_mark_all_present(state, req)),
        "attendance.counts" => Some(handle_counts(state, req)),
        "attendance.requestSubmit" => Some(handle_request_submit(state, req)),
        "attendance.confirmSubmit" => Some(handle_confirm_submit(state, req)),
        "attendance.cancelSubmit" => Some(handle_cancel_submit(state, req)),
        "attendance.sessionClose" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
