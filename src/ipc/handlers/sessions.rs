use crate::ipc::helpers::{
    find_covering_session, get_optional_i64, get_required_str, load_instance, load_session, new_id,
    now_unix, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn sessions_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let Some(defs) = params.get("sessions").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing sessions"));
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut session_ids = Vec::with_capacity(defs.len());
    for def in defs {
        let start_time = def
            .get("startTime")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::bad_params("session startTime must be integer"))?;
        let duration = def
            .get("duration")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::bad_params("session duration must be integer"))?;
        if duration < 0 {
            return Err(HandlerErr::bad_params("session duration must be >= 0"));
        }
        let group_id = def.get("groupId").and_then(|v| v.as_i64()).unwrap_or(0);
        let description = def
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let session_id = new_id();
        tx.execute(
            "INSERT INTO sessions(id, instance_id, start_time, duration, group_id, description)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &session_id,
                &instance_id,
                start_time,
                duration,
                group_id,
                description,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "sessions"))?;
        session_ids.push(session_id);
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "sessionIds": session_ids }))
}

fn sessions_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let session_id = get_required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    if session.instance_id != instance_id {
        return Err(HandlerErr::not_found("session not found"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut start_time = session.start_time;
    let mut duration = session.duration;
    let mut group_id = session.group_id;
    let mut description: Option<String> = None;
    for (k, v) in patch {
        match k.as_str() {
            "startTime" => {
                start_time = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("startTime must be integer"))?;
            }
            "duration" => {
                duration = v
                    .as_i64()
                    .filter(|d| *d >= 0)
                    .ok_or_else(|| HandlerErr::bad_params("duration must be integer >= 0"))?;
            }
            "groupId" => {
                group_id = v
                    .as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("groupId must be integer"))?;
            }
            "description" => {
                description = Some(
                    v.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| HandlerErr::bad_params("description must be string"))?,
                );
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE sessions SET start_time = ?1, duration = ?2, group_id = ?3,
           description = COALESCE(?4, description)
         WHERE id = ?5",
        (start_time, duration, group_id, &description, &session_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "sessions"))?;
    Ok(json!({ "ok": true }))
}

fn sessions_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let start = get_optional_i64(params, "startTime");
    let end = get_optional_i64(params, "endTime");
    let group = get_optional_i64(params, "groupId");

    let mut stmt = conn
        .prepare(
            "SELECT id, start_time, duration, group_id, description, last_taken, last_taken_by
             FROM sessions
             WHERE instance_id = ?1
               AND (?2 IS NULL OR start_time >= ?2)
               AND (?3 IS NULL OR start_time < ?3)
               AND (?4 IS NULL OR group_id = ?4)
             ORDER BY start_time ASC",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&instance_id, start, end, group), |r| {
            Ok(json!({
                "sessionId": r.get::<_, String>(0)?,
                "startTime": r.get::<_, i64>(1)?,
                "duration": r.get::<_, i64>(2)?,
                "groupId": r.get::<_, i64>(3)?,
                "description": r.get::<_, String>(4)?,
                "lastTaken": r.get::<_, Option<i64>>(5)?,
                "lastTakenBy": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "sessions": rows }))
}

/// Latest session start at or before now; seeds the default import time in
/// the bulk-import UI.
fn sessions_most_recent_start(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let start: Option<i64> = conn
        .query_row(
            "SELECT start_time FROM sessions
             WHERE instance_id = ?1 AND start_time <= ?2
             ORDER BY start_time DESC
             LIMIT 1",
            (&instance_id, now_unix()),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "startTime": start }))
}

fn sessions_find_covering(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let time = params
        .get("time")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing time"))?;
    let session_id = find_covering_session(conn, &instance_id, time)?;
    Ok(json!({ "sessionId": session_id }))
}

fn sessions_log(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    load_session(conn, &session_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT al.student_id, u.first_name, u.last_name, al.status_id, st.acronym,
                    al.status_set, al.remarks, al.time_taken, al.taken_by
             FROM attendance_log al
             JOIN users u ON u.id = al.student_id
             JOIN statuses st ON st.id = al.status_id
             WHERE al.session_id = ?
             ORDER BY u.last_name, u.first_name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "statusId": r.get::<_, String>(3)?,
                "acronym": r.get::<_, String>(4)?,
                "statusSet": r.get::<_, String>(5)?,
                "remarks": r.get::<_, String>(6)?,
                "timeTaken": r.get::<_, i64>(7)?,
                "takenBy": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "records": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.add" => Some(with_db(state, req, sessions_add)),
        "sessions.update" => Some(with_db(state, req, sessions_update)),
        "sessions.list" => Some(with_db(state, req, sessions_list)),
        "sessions.mostRecentStart" => Some(with_db(state, req, sessions_most_recent_start)),
        "sessions.findCovering" => Some(with_db(state, req, sessions_find_covering)),
        "sessions.log" => Some(with_db(state, req, sessions_log)),
        _ => None,
    }
}
