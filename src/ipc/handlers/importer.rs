use crate::grade::{status_set_snapshot, StatusDef};
use crate::import::{parse_line, ImportError, ImportReason, ParsedLine};
use crate::ipc::helpers::{
    find_covering_session, get_optional_str, get_required_i64, get_required_str, load_instance,
    load_session, load_statuses, now_unix, resolve_user_by_id_number, roster_user_ids,
    save_attendance_record, stamp_session_taken, status_from_string, update_users_grades, with_db,
    HandlerErr, InstanceRow,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

struct LineCommit {
    session_id: String,
    student_id: String,
}

/// Commit a single import line. The outer error is a store failure and aborts
/// the whole request; the inner error is a per-line failure the batch reports
/// and moves past.
#[allow(clippy::too_many_arguments)]
fn import_line(
    conn: &Connection,
    instance: &InstanceRow,
    statuses: &[StatusDef],
    snapshot: &str,
    line: &str,
    default_time: i64,
    default_status_id: &str,
    taken_by: &str,
    now: i64,
) -> Result<Result<LineCommit, ImportError>, HandlerErr> {
    let parsed = match parse_line(line) {
        Ok(p) => p,
        Err(e) => return Ok(Err(e)),
    };

    let Some(user) = resolve_user_by_id_number(conn, parsed.id_token())? else {
        return Ok(Err(ImportError::new(ImportReason::InvalidUser, line)));
    };

    let (time, status_id, remark) = match &parsed {
        ParsedLine::Bare { .. } => (
            default_time,
            default_status_id.to_string(),
            "checked off by scan".to_string(),
        ),
        ParsedLine::Scanner {
            time, status_token, ..
        } => {
            let status_id = match status_token {
                Some(token) => match status_from_string(statuses, token) {
                    Some(s) => s.id.clone(),
                    None => {
                        return Ok(Err(ImportError::new(ImportReason::InvalidStatus, line)));
                    }
                },
                None => default_status_id.to_string(),
            };
            let remark = match time {
                Some(t) => format!(
                    "checked off by scan at {}",
                    crate::import::format_user_date(*t)
                ),
                None => "checked off by scan".to_string(),
            };
            (time.unwrap_or(default_time), status_id, remark)
        }
    };

    let Some(session_id) = find_covering_session(conn, &instance.id, time)? else {
        return Ok(Err(ImportError::new(ImportReason::InvalidSession, line)));
    };

    save_attendance_record(
        conn, &session_id, &user.id, &status_id, snapshot, &remark, taken_by, now,
    )?;
    Ok(Ok(LineCommit {
        session_id,
        student_id: user.id,
    }))
}

/// Upsert the given status for every enrolled student with no record in the
/// session. Existing marks are never overwritten, whatever status they hold.
fn fill_empty_records(
    conn: &Connection,
    instance: &InstanceRow,
    session_id: &str,
    status_id: &str,
    snapshot: &str,
    taken_by: &str,
    now: i64,
    filled: &mut Vec<String>,
) -> Result<(), HandlerErr> {
    let session = load_session(conn, session_id)?;
    let roster = roster_user_ids(conn, &instance.course_id, session.group_id)?;

    let mut stmt = conn
        .prepare("SELECT student_id FROM attendance_log WHERE session_id = ?")
        .map_err(HandlerErr::db_query)?;
    let recorded: HashSet<String> = stmt
        .query_map([session_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    for user_id in roster {
        if recorded.contains(&user_id) {
            continue;
        }
        save_attendance_record(conn, session_id, &user_id, status_id, snapshot, "", taken_by, now)?;
        if !filled.contains(&user_id) {
            filled.push(user_id);
        }
    }
    Ok(())
}

fn import_run(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    let text = get_required_str(params, "text")?;
    let default_time = get_required_i64(params, "defaultTime")?;
    let default_status_token = get_required_str(params, "defaultStatus")?;
    let taken_by = get_required_str(params, "takenBy")?;

    // One catalog load per batch; every line shares the same snapshot.
    let statuses = load_statuses(conn, &instance_id, true)?;
    let snapshot = status_set_snapshot(&statuses);

    let Some(default_status) = status_from_string(&statuses, default_status_token.trim()) else {
        return Err(HandlerErr::bad_params("defaultStatus does not resolve"));
    };
    let default_status_id = default_status.id.clone();

    // "-" matches the form's "no change" choice for omitted students.
    let fill_status_id = match get_optional_str(params, "fillStatus") {
        Some(token) if token.trim() != "-" => {
            let Some(status) = status_from_string(&statuses, token.trim()) else {
                return Err(HandlerErr::bad_params("fillStatus does not resolve"));
            };
            Some(status.id.clone())
        }
        _ => None,
    };

    let now = now_unix();
    let mut success_count = 0usize;
    let mut failures: Vec<serde_json::Value> = Vec::new();
    let mut retry_text = String::new();
    let mut touched_sessions: Vec<String> = Vec::new();
    let mut touched_students: Vec<String> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            // Keep blank spacing so the retry buffer resembles the input.
            if !retry_text.is_empty() {
                retry_text.push('\n');
            }
            continue;
        }

        match import_line(
            conn,
            &instance,
            &statuses,
            &snapshot,
            line,
            default_time,
            &default_status_id,
            &taken_by,
            now,
        )? {
            Ok(commit) => {
                success_count += 1;
                if !touched_sessions.contains(&commit.session_id) {
                    touched_sessions.push(commit.session_id);
                }
                if !touched_students.contains(&commit.student_id) {
                    touched_students.push(commit.student_id);
                }
            }
            Err(e) => {
                failures.push(json!({
                    "line": e.raw_line,
                    "code": e.reason.code(),
                    "message": e.reason.message(),
                }));
                retry_text.push_str(line);
                retry_text.push('\n');
            }
        }
    }

    for session_id in &touched_sessions {
        if let Some(fill_status_id) = &fill_status_id {
            fill_empty_records(
                conn,
                &instance,
                session_id,
                fill_status_id,
                &snapshot,
                &taken_by,
                now,
                &mut touched_students,
            )?;
        }
        stamp_session_taken(conn, session_id, now, &taken_by)?;
    }

    update_users_grades(conn, &instance, &statuses, &touched_students)?;

    // The failed lines persist so they can be corrected and resubmitted.
    conn.execute(
        "UPDATE instances SET last_import = ?1 WHERE id = ?2",
        (&retry_text, &instance_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "instances"))?;

    Ok(json!({
        "successCount": success_count,
        "failures": failures,
        "retryText": retry_text,
    }))
}

fn import_buffer(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    Ok(json!({ "text": instance.last_import }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.run" => Some(with_db(state, req, import_run)),
        "import.buffer" => Some(with_db(state, req, import_buffer)),
        _ => None,
    }
}
