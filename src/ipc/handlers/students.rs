use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::AttendanceStatus;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
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
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

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

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, roll_number, active, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let students = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNumber": r.get::<_, Option<String>>(2)?,
                "active": r.get::<_, i64>(3)? != 0,
                "sortOrder": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }
    let roll_number = params
        .get("rollNumber")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;

    let student_id = Uuid::new_v4().to_string();
    let updated_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, class_id, name, roll_number, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &name,
            &roll_number,
            active as i64,
            next_sort,
            &updated_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "studentId": student_id, "sortOrder": next_sort }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing patch".to_string(),
            details: None,
        });
    };

    let row: Option<(String, Option<String>, i64)> = conn
        .query_row(
            "SELECT name, roll_number, active FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((mut name, mut roll_number, mut active)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    if let Some(v) = patch.get("name").and_then(|v| v.as_str()) {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "name must not be empty".to_string(),
                details: None,
            });
        }
        name = trimmed.to_string();
    }
    if let Some(v) = patch.get("rollNumber") {
        roll_number = v.as_str().map(|s| s.trim().to_string());
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        active = v as i64;
    }

    let updated_at = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE students SET name = ?, roll_number = ?, active = ?, updated_at = ?
         WHERE class_id = ? AND id = ?",
        (&name, &roll_number, active, &updated_at, &class_id, &student_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn students_detail_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;

    let profile: Option<(String, Option<String>, i64)> = conn
        .query_row(
            "SELECT name, roll_number, active FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((name, roll_number, active)) = profile else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT r.date, e.status
             FROM attendance_entries e
             JOIN attendance_records r ON r.id = e.record_id
             WHERE r.class_id = ? AND e.student_id = ?
             ORDER BY r.date DESC",
        )
        .map_err(db_err)?;
    let history: Vec<(String, String)> = stmt
        .query_map((&class_id, &student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut present = 0i64;
    let mut late = 0i64;
    let mut absent = 0i64;
    let mut unmarked = 0i64;
    for (_, status) in &history {
        match AttendanceStatus::parse_any(status) {
            Some(AttendanceStatus::Present) => present += 1,
            Some(AttendanceStatus::Late) => late += 1,
            Some(AttendanceStatus::Absent) => absent += 1,
            _ => unmarked += 1,
        }
    }
    let total = history.len() as i64;
    let attendance_rate = if total > 0 {
        ((100 * (present + late)) as f64 / total as f64).round() as i64
    } else {
        0
    };

    let history_json: Vec<serde_json::Value> = history
        .iter()
        .map(|(date, status)| json!({ "date": date, "status": status }))
        .collect();

    Ok(json!({
        "student": {
            "id": student_id,
            "name": name,
            "rollNumber": roll_number,
            "active": active != 0,
        },
        "attendance": {
            "history": history_json,
            "presentCount": present,
            "lateCount": late,
            "absentCount": absent,
            "unmarkedCount": unmarked,
            "attendanceRate": attendance_rate,
        },
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.detailOpen" => Some(with_conn(state, req, students_detail_open)),
        _ => None,
    }
}
