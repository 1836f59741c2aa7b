use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Days, Local, NaiveDate};
use serde_json::json;

fn handle_dashboard_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let today = match req.params.get("today").and_then(|v| v.as_str()) {
        Some(v) => match NaiveDate::parse_from_str(v, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => return err(&req.id, "bad_params", "today must be YYYY-MM-DD", None),
        },
        None => Local::now().date_naive(),
    };
    let today_key = today.format("%Y-%m-%d").to_string();
    let week_ahead = today
        .checked_add_days(Days::new(7))
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string();

    let totals = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM classes),
           (SELECT COUNT(*) FROM students WHERE active = 1)",
        [],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
    );
    let (total_classes, total_students) = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let today_counts = conn.query_row(
        "SELECT
           COALESCE(SUM(CASE WHEN e.status = 'present' THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN e.status = 'absent' THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN e.status = 'late' THEN 1 ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN e.status = 'unmarked' THEN 1 ELSE 0 END), 0)
         FROM attendance_entries e
         JOIN attendance_records r ON r.id = e.record_id
         WHERE r.date = ?",
        [&today_key],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        },
    );
    let (present, absent, late, unmarked) = match today_counts {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let total_entries = present + absent + late + unmarked;
    let percent = if total_entries > 0 {
        ((100 * (present + late)) as f64 / total_entries as f64).round() as i64
    } else {
        0
    };

    let deadlines = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM assignments WHERE due_date >= ?1),
           (SELECT COUNT(*) FROM assignments WHERE due_date >= ?1 AND due_date <= ?2)",
        (&today_key, &week_ahead),
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
    );
    let (pending_assignments, upcoming_deadlines) = match deadlines {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "date": today_key,
            "totalClasses": total_classes,
            "totalStudents": total_students,
            "todayAttendance": {
                "present": present,
                "absent": absent,
                "late": late,
                "unmarked": unmarked,
                "total": total_entries,
                "percent": percent,
            },
            "pendingAssignments": pending_assignments,
            "upcomingDeadlines": upcoming_deadlines,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.open" => Some(handle_dashboard_open(state, req)),
        _ => None,
    }
}
