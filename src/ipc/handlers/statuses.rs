use crate::ipc::helpers::{
    get_required_f64, get_required_str, load_instance, load_statuses, new_id, status_from_string,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Acronyms are unique per instance, case-insensitively, among non-deleted
/// rows. Deleted rows keep their acronym so old log snapshots stay readable.
fn acronym_taken(
    conn: &Connection,
    instance_id: &str,
    acronym: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let statuses = load_statuses(conn, instance_id, false)?;
    Ok(statuses.iter().any(|s| {
        s.acronym.eq_ignore_ascii_case(acronym) && except_id != Some(s.id.as_str())
    }))
}

fn statuses_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let acronym = get_required_str(params, "acronym")?;
    let description = get_required_str(params, "description")?;
    let points = get_required_f64(params, "points")?;
    let visible = params
        .get("visible")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if acronym.trim().is_empty() {
        return Err(HandlerErr::bad_params("acronym must not be empty"));
    }
    if acronym_taken(conn, &instance_id, &acronym, None)? {
        return Err(HandlerErr::bad_params("acronym already in use"));
    }

    let status_id = new_id();
    conn.execute(
        "INSERT INTO statuses(id, instance_id, acronym, description, points, visible, deleted)
         VALUES(?, ?, ?, ?, ?, ?, 0)",
        (
            &status_id,
            &instance_id,
            acronym.trim(),
            &description,
            points,
            visible as i64,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "statuses"))?;
    Ok(json!({ "statusId": status_id }))
}

fn statuses_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let status_id = get_required_str(params, "statusId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let existing = conn
        .query_row(
            "SELECT acronym, description, points, visible FROM statuses
             WHERE id = ?1 AND instance_id = ?2 AND deleted = 0",
            (&status_id, &instance_id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, i64>(3)? != 0,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((mut acronym, mut description, mut points, mut visible)) = existing else {
        return Err(HandlerErr::not_found("status not found"));
    };

    for (k, v) in patch {
        match k.as_str() {
            "acronym" => {
                let s = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params("acronym must be a non-empty string"))?;
                if acronym_taken(conn, &instance_id, s, Some(&status_id))? {
                    return Err(HandlerErr::bad_params("acronym already in use"));
                }
                acronym = s.to_string();
            }
            "description" => {
                description = v
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("description must be string"))?;
            }
            "points" => {
                points = v
                    .as_f64()
                    .ok_or_else(|| HandlerErr::bad_params("points must be numeric"))?;
            }
            "visible" => {
                visible = v
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("visible must be boolean"))?;
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE statuses SET acronym = ?1, description = ?2, points = ?3, visible = ?4
         WHERE id = ?5 AND instance_id = ?6",
        (
            &acronym,
            &description,
            points,
            visible as i64,
            &status_id,
            &instance_id,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "statuses"))?;
    Ok(json!({ "ok": true }))
}

/// Soft delete: the row stays for historical log integrity, but disappears
/// from listings and resolution.
fn statuses_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let status_id = get_required_str(params, "statusId")?;
    let changed = conn
        .execute(
            "UPDATE statuses SET deleted = 1 WHERE id = ?1 AND instance_id = ?2 AND deleted = 0",
            (&status_id, &instance_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "statuses"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("status not found"));
    }
    Ok(json!({ "ok": true }))
}

fn statuses_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    load_instance(conn, &instance_id)?;
    let only_visible = params
        .get("onlyVisible")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let statuses = load_statuses(conn, &instance_id, only_visible)?;
    let rows: Vec<serde_json::Value> = statuses
        .iter()
        .map(|s| {
            json!({
                "statusId": s.id,
                "acronym": s.acronym,
                "description": s.description,
                "points": s.points,
                "visible": s.visible,
            })
        })
        .collect();
    Ok(json!({ "statuses": rows }))
}

fn statuses_resolve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let token = get_required_str(params, "token")?;
    let statuses = load_statuses(conn, &instance_id, true)?;
    let Some(status) = status_from_string(&statuses, token.trim()) else {
        return Err(HandlerErr::not_found("no status matches the token"));
    };
    Ok(json!({
        "statusId": status.id,
        "acronym": status.acronym,
        "description": status.description,
        "points": status.points,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "statuses.add" => Some(with_db(state, req, statuses_add)),
        "statuses.update" => Some(with_db(state, req, statuses_update)),
        "statuses.delete" => Some(with_db(state, req, statuses_delete)),
        "statuses.list" => Some(with_db(state, req, statuses_list)),
        "statuses.resolve" => Some(with_db(state, req, statuses_resolve)),
        _ => None,
    }
}
