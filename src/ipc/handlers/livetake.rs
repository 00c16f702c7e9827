use crate::grade::status_set_snapshot;
use crate::import::format_user_date;
use crate::ipc::helpers::{
    get_required_str, get_user, load_instance, load_session, load_statuses, now_unix,
    resolve_user_by_id_number, save_attendance_record, stamp_session_taken, update_users_grades,
    with_db, HandlerErr, InstanceRow, UserRow,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Real-time scanning endpoint. Transport-level misuse (missing params, no
/// workspace) uses the error envelope; every check-off failure — unknown
/// mode, lookup miss, store rejection — is serialized as a typed
/// `importerror` payload so the scanning UI always gets one result per scan.
fn live_checkoff(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let mode = get_required_str(params, "mode")?;
    let uid = get_required_str(params, "user")?;
    let session_id = get_required_str(params, "session")?;
    let taken_by = get_required_str(params, "takenBy")?;
    let instance = load_instance(conn, &instance_id)?;

    match checkoff(conn, &instance, &mode, &uid, &session_id, &taken_by) {
        Ok(payload) => Ok(payload),
        Err(message) => Ok(json!({
            "status": "importerror",
            "uid": uid,
            "message": message,
        })),
    }
}

fn resolve_scanned_user(
    conn: &Connection,
    mode: &str,
    uid: &str,
) -> Result<UserRow, String> {
    match mode {
        "idnumber" => resolve_user_by_id_number(conn, uid)
            .map_err(|e| e.message)?
            .ok_or_else(|| format!("no user with id number {}", uid)),
        "userid" => get_user(conn, uid)
            .map_err(|e| e.message)?
            .ok_or_else(|| format!("no user with id {}", uid)),
        _ => Err(format!("invalid mode: {}", mode)),
    }
}

fn checkoff(
    conn: &Connection,
    instance: &InstanceRow,
    mode: &str,
    uid: &str,
    session_id: &str,
    taken_by: &str,
) -> Result<serde_json::Value, String> {
    let user = resolve_scanned_user(conn, mode, uid)?;

    let session = load_session(conn, session_id).map_err(|e| e.message)?;
    if session.instance_id != instance.id {
        return Err("session does not belong to this activity".to_string());
    }

    // Catalog order is points descending: the first entry marks presence.
    let statuses = load_statuses(conn, &instance.id, true).map_err(|e| e.message)?;
    let Some(present) = statuses.first() else {
        return Err("no visible statuses configured".to_string());
    };

    let now = now_unix();
    let remark = format!("in class at {}", format_user_date(now));
    let snapshot = status_set_snapshot(&statuses);
    save_attendance_record(
        conn, session_id, &user.id, &present.id, &snapshot, &remark, taken_by, now,
    )
    .map_err(|e| e.message)?;
    stamp_session_taken(conn, session_id, now, taken_by).map_err(|e| e.message)?;
    update_users_grades(conn, instance, &statuses, std::slice::from_ref(&user.id))
        .map_err(|e| e.message)?;

    Ok(json!({
        "status": "success",
        "firstname": user.first_name,
        "lastname": user.last_name,
        "userdate": format_user_date(now),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "live.checkoff" => Some(with_db(state, req, live_checkoff)),
        _ => None,
    }
}
