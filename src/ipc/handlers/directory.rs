use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, new_id, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let id_number = get_optional_str(params, "idNumber");

    let user_id = new_id();
    conn.execute(
        "INSERT INTO users(id, id_number, first_name, last_name) VALUES(?, ?, ?, ?)",
        (&user_id, &id_number, &first_name, &last_name),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;

    if let Some(profile) = params.get("profile").and_then(|v| v.as_object()) {
        for (field, value) in profile {
            let Some(value) = value.as_str() else {
                return Err(HandlerErr::bad_params(format!(
                    "profile.{} must be string",
                    field
                )));
            };
            conn.execute(
                "INSERT INTO user_profile_data(user_id, field, value) VALUES(?, ?, ?)
                 ON CONFLICT(user_id, field) DO UPDATE SET value = excluded.value",
                (&user_id, field, value),
            )
            .map_err(|e| HandlerErr::db_update(e, "user_profile_data"))?;
        }
    }

    Ok(json!({ "userId": user_id }))
}

/// Replaces the ordered list of alternate profile fields consulted by the
/// identity lookup after the primary id number column.
fn set_id_number_fields(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(fields) = params.get("fields").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing fields"));
    };
    let names: Vec<String> = fields
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params("fields entries must be strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        })?;
    tx.execute("DELETE FROM id_number_fields", [])
        .map_err(|e| HandlerErr::db_update(e, "id_number_fields"))?;
    for (i, field) in names.iter().enumerate() {
        tx.execute(
            "INSERT INTO id_number_fields(sort_order, field) VALUES(?, ?)",
            (i as i64, field),
        )
        .map_err(|e| HandlerErr::db_update(e, "id_number_fields"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "count": names.len() }))
}

fn courses_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let start_date = get_optional_i64(params, "startDate").unwrap_or(0);
    let course_id = new_id();
    conn.execute(
        "INSERT INTO courses(id, name, start_date) VALUES(?, ?, ?)",
        (&course_id, &name, start_date),
    )
    .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    Ok(json!({ "courseId": course_id }))
}

fn enrolments_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let user_id = get_required_str(params, "userId")?;
    let group_id = get_optional_i64(params, "groupId").unwrap_or(0);

    let course_exists = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !course_exists {
        return Err(HandlerErr::not_found("course not found"));
    }

    conn.execute(
        "INSERT INTO enrolments(course_id, user_id, group_id) VALUES(?, ?, ?)
         ON CONFLICT(course_id, user_id) DO UPDATE SET group_id = excluded.group_id",
        (&course_id, &user_id, group_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "enrolments"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(with_db(state, req, users_create)),
        "directory.setIdNumberFields" => Some(with_db(state, req, set_id_number_fields)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "enrolments.add" => Some(with_db(state, req, enrolments_add)),
        _ => None,
    }
}
