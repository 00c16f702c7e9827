use crate::grade::status_set_snapshot;
use crate::ipc::helpers::{
    get_required_str, load_instance, load_session, load_statuses, now_unix,
    save_attendance_record, stamp_session_taken, update_users_grades, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Bulk "take attendance" submission: one mark per student for a single
/// session, then a session stamp and a grade refresh for the marked students.
fn take_session(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    let session_id = get_required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    if session.instance_id != instance_id {
        return Err(HandlerErr::not_found("session not found"));
    }
    let taken_by = get_required_str(params, "takenBy")?;
    let Some(marks) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let statuses = load_statuses(conn, &instance_id, true)?;
    let snapshot = status_set_snapshot(&statuses);
    let now = now_unix();

    let mut updated: Vec<String> = Vec::new();
    for mark in marks {
        let user_id = mark
            .get("userId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("mark userId must be string"))?;
        let status_id = mark
            .get("statusId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("mark statusId must be string"))?;
        if !statuses.iter().any(|s| s.id == status_id) {
            return Err(HandlerErr::bad_params("mark statusId not in catalog"));
        }
        let remarks = mark.get("remarks").and_then(|v| v.as_str()).unwrap_or("");

        save_attendance_record(
            conn, &session_id, user_id, status_id, &snapshot, remarks, &taken_by, now,
        )?;
        if !updated.contains(&user_id.to_string()) {
            updated.push(user_id.to_string());
        }
    }

    stamp_session_taken(conn, &session_id, now, &taken_by)?;
    update_users_grades(conn, &instance, &statuses, &updated)?;

    Ok(json!({ "updated": updated.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "take.session" => Some(with_db(state, req, take_session)),
        _ => None,
    }
}
