use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_text(params: &serde_json::Value, key: &str) -> Result<String, String> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(format!("{} must not be empty", key)),
        None => Err(format!("missing {}", key)),
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let title = match required_text(&req.params, "title") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let subject = match required_text(&req.params, "subject") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let description = match required_text(&req.params, "description") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let due_date = match required_text(&req.params, "dueDate") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if NaiveDate::parse_from_str(&due_date, "%Y-%m-%d").is_err() {
        return err(&req.id, "bad_params", "dueDate must be YYYY-MM-DD", None);
    }
    let total_marks = match req.params.get("totalMarks").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 => v,
        Some(_) => return err(&req.id, "bad_params", "totalMarks must be positive", None),
        None => return err(&req.id, "bad_params", "missing totalMarks", None),
    };
    let attachment_name = req
        .params
        .get("attachmentName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let assignment_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(
            id, class_id, title, subject, description, due_date, total_marks,
            attachment_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &class_id,
            &title,
            &subject,
            &description,
            &due_date,
            total_marks,
            &attachment_name,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(
        &req.id,
        json!({ "assignmentId": assignment_id, "title": title }),
    )
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, subject, description, due_date, total_marks, attachment_name, created_at
         FROM assignments
         WHERE class_id = ?
         ORDER BY due_date, created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "dueDate": r.get::<_, String>(4)?,
                "totalMarks": r.get::<_, f64>(5)?,
                "attachmentName": r.get::<_, Option<String>>(6)?,
                "createdAt": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}
