use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Filter params use the UI's "All" sentinel; omitting the key means the same.
fn filter_value(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != "All")
}

fn today_or_local(params: &serde_json::Value) -> String {
    params
        .get("today")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Local::now().date_naive().format("%Y-%m-%d").to_string())
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let subject = filter_value(&req.params, "subject");
    let grade = filter_value(&req.params, "grade");
    let today = today_or_local(&req.params);

    // Correlated subqueries keep the per-class aggregates join-free.
    // averageAttendance treats present and late as attended; unmarked entries
    // in a submitted record count against the rate.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.grade,
           c.section,
           c.subject,
           c.room,
           c.schedule,
           (SELECT COUNT(*) FROM students s
             WHERE s.class_id = c.id AND s.active = 1) AS student_count,
           (SELECT COUNT(*) FROM attendance_entries e
             JOIN attendance_records r ON r.id = e.record_id
             WHERE r.class_id = c.id) AS entry_count,
           (SELECT COUNT(*) FROM attendance_entries e
             JOIN attendance_records r ON r.id = e.record_id
             WHERE r.class_id = c.id AND e.status IN ('present', 'late')) AS attended_count,
           (SELECT COUNT(*) FROM assignments a
             WHERE a.class_id = c.id AND a.due_date >= ?1) AS pending_assignments
         FROM classes c
         WHERE (?2 IS NULL OR c.subject = ?2)
           AND (?3 IS NULL OR c.grade = ?3)
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&today, &subject, &grade), |row| {
            let entry_count: i64 = row.get(8)?;
            let attended_count: i64 = row.get(9)?;
            let average_attendance = if entry_count > 0 {
                ((100 * attended_count) as f64 / entry_count as f64).round() as i64
            } else {
                0
            };
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "grade": row.get::<_, String>(2)?,
                "section": row.get::<_, String>(3)?,
                "subject": row.get::<_, String>(4)?,
                "room": row.get::<_, Option<String>>(5)?,
                "schedule": row.get::<_, Option<String>>(6)?,
                "studentCount": row.get::<_, i64>(7)?,
                "averageAttendance": average_attendance,
                "pendingAssignments": row.get::<_, i64>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut fields = Vec::with_capacity(4);
    for key in ["name", "grade", "section", "subject"] {
        match req.params.get(key).and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => fields.push(v.trim().to_string()),
            _ => return err(&req.id, "bad_params", format!("missing {}", key), None),
        }
    }
    let room = req
        .params
        .get("room")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let schedule = req
        .params
        .get("schedule")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, grade, section, subject, room, schedule)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_id, &fields[0], &fields[1], &fields[2], &fields[3], &room, &schedule,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": fields[0] }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit deletes in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_entries
         WHERE record_id IN (SELECT id FROM attendance_records WHERE class_id = ?)",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_entries" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM attendance_records WHERE class_id = ?",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_records" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM assignments WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
