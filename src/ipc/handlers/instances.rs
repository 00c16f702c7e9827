use crate::ipc::helpers::{
    get_optional_str, get_required_str, load_instance, new_id, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn instances_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let name = get_required_str(params, "name")?;
    let max_grade = params
        .get("maxGrade")
        .and_then(|v| v.as_f64())
        .unwrap_or(100.0);
    if max_grade < 0.0 {
        return Err(HandlerErr::bad_params("maxGrade must be >= 0"));
    }

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

    let instance_id = new_id();
    conn.execute(
        "INSERT INTO instances(id, course_id, name, max_grade, last_import) VALUES(?, ?, ?, ?, '')",
        (&instance_id, &course_id, &name, max_grade),
    )
    .map_err(|e| HandlerErr::db_update(e, "instances"))?;
    Ok(json!({ "instanceId": instance_id }))
}

fn instances_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let instance_id = get_required_str(params, "instanceId")?;
    let instance = load_instance(conn, &instance_id)?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut name = instance.name.clone();
    let mut max_grade = instance.max_grade;
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                name = v
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("name must be string"))?;
            }
            "maxGrade" => {
                max_grade = v
                    .as_f64()
                    .ok_or_else(|| HandlerErr::bad_params("maxGrade must be numeric"))?;
                if max_grade < 0.0 {
                    return Err(HandlerErr::bad_params("maxGrade must be >= 0"));
                }
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE instances SET name = ?1, max_grade = ?2 WHERE id = ?3",
        (&name, max_grade, &instance_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "instances"))?;
    Ok(json!({ "ok": true }))
}

fn instances_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_optional_str(params, "courseId");
    let mut rows: Vec<serde_json::Value> = Vec::new();
    let sql = "SELECT id, course_id, name, max_grade FROM instances
               WHERE (?1 IS NULL OR course_id = ?1) ORDER BY name";
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    let mapped = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "instanceId": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "maxGrade": r.get::<_, f64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    rows.extend(mapped);
    Ok(json!({ "instances": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "instances.create" => Some(with_db(state, req, instances_create)),
        "instances.update" => Some(with_db(state, req, instances_update)),
        "instances.list" => Some(with_db(state, req, instances_list)),
        _ => None,
    }
}
