use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

// First-run fixture set matching the product's demo content: class cards for
// the teacher's timetable plus a full roster for the flagship class.
const DEMO_CLASSES: &[(&str, &str, &str, &str, &str, &str)] = &[
    (
        "Grade 10 - Section A",
        "10",
        "A",
        "Mathematics",
        "Room 204",
        "Mon, Wed, Fri - 9:00 AM",
    ),
    (
        "Grade 10 - Section B",
        "10",
        "B",
        "Mathematics",
        "Room 204",
        "Tue, Thu - 10:30 AM",
    ),
    (
        "Grade 11 - Section A",
        "11",
        "A",
        "Physics",
        "Lab 305",
        "Mon, Wed - 11:00 AM",
    ),
    (
        "Grade 11 - Section B",
        "11",
        "B",
        "Physics",
        "Lab 305",
        "Tue, Thu, Fri - 2:00 PM",
    ),
    (
        "Grade 12 - Section A",
        "12",
        "A",
        "Chemistry",
        "Lab 101",
        "Mon, Wed, Fri - 1:00 PM",
    ),
    (
        "Grade 12 - Section B",
        "12",
        "B",
        "Chemistry",
        "Lab 101",
        "Tue, Thu - 3:00 PM",
    ),
];

const DEMO_ROSTER: &[&str] = &[
    "Ahmed Ali Khan",
    "Fatima Hassan",
    "Hassan Ahmed",
    "Ayesha Malik",
    "Usman Tariq",
    "Zainab Hassan",
    "Ali Raza",
    "Maryam Siddiqui",
    "Omar Farooq",
    "Sara Khan",
    "Ibrahim Ali",
    "Aisha Ahmed",
    "Bilal Hassan",
    "Hira Malik",
    "Hamza Tariq",
];

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // Open sessions belong to the previous workspace's rosters.
            state.sessions.clear();
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_workspace_seed_demo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let existing: i64 = match conn.query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing > 0 {
        return ok(
            &req.id,
            json!({ "seeded": false, "classes": 0, "students": 0 }),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The demo roster belongs to the first class in the list.
    let roster_class = Uuid::new_v4().to_string();
    for (i, (name, grade, section, subject, room, schedule)) in DEMO_CLASSES.iter().enumerate() {
        let class_id = if i == 0 {
            roster_class.clone()
        } else {
            Uuid::new_v4().to_string()
        };
        if let Err(e) = tx.execute(
            "INSERT INTO classes(id, name, grade, section, subject, room, schedule)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (&class_id, name, grade, section, subject, room, schedule),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "classes" })),
            );
        }
    }

    let updated_at = Utc::now().to_rfc3339();
    for (i, name) in DEMO_ROSTER.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO students(id, class_id, name, roll_number, active, sort_order, updated_at)
             VALUES(?, ?, ?, ?, 1, ?, ?)",
            (
                &Uuid::new_v4().to_string(),
                &roster_class,
                name,
                format!("{:03}", i + 1),
                i as i64,
                &updated_at,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "seeded": true,
            "classes": DEMO_CLASSES.len(),
            "students": DEMO_ROSTER.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.seedDemo" => Some(handle_workspace_seed_demo(state, req)),
        _ => None,
    }
}
