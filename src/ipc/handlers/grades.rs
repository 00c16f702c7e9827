use crate::grade;
use crate::ipc::helpers::{
    get_required_str, load_instance, load_statuses, roster_user_ids, update_users_grades,
    user_status_counts, user_taken_sessions_count, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Recompute and push gradebook rows. Without explicit studentIds the whole
/// course roster is refreshed, e.g. after a preference edit changes point
/// values.
fn grades_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    let statuses = load_statuses(conn, &instance_id, true)?;

    let user_ids: Vec<String> = match params.get("studentIds").and_then(|v| v.as_array()) {
        Some(ids) => ids
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("studentIds entries must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => roster_user_ids(conn, &instance.course_id, 0)?,
    };

    update_users_grades(conn, &instance, &statuses, &user_ids)?;
    Ok(json!({ "updated": user_ids.len() }))
}

fn grades_user_stat(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    let user_id = get_required_str(params, "userId")?;
    let statuses = load_statuses(conn, &instance_id, true)?;

    let counts = user_status_counts(conn, &instance, &user_id)?;
    let taken = user_taken_sessions_count(conn, &instance, &user_id)?;
    let raw_grade = grade::user_grade(&counts, &statuses);
    let max_grade = grade::user_max_grade(taken, &statuses);
    let fraction = grade::grade_fraction(raw_grade, max_grade);

    let status_rows: Vec<serde_json::Value> = statuses
        .iter()
        .map(|s| {
            json!({
                "statusId": s.id,
                "acronym": s.acronym,
                "count": counts.get(&s.id).copied().unwrap_or(0),
            })
        })
        .collect();

    Ok(json!({
        "takenSessions": taken,
        "statuses": status_rows,
        "rawGrade": raw_grade,
        "maxGrade": max_grade,
        "fraction": fraction,
        "gradebookGrade": fraction * instance.max_grade,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.update" => Some(with_db(state, req, grades_update)),
        "grades.userStat" => Some(with_db(state, req, grades_user_stat)),
        _ => None,
    }
}
