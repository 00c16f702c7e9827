use crate::grade::StatusDef;
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: impl ToString) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: impl ToString, table: &str) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }
}

/// Wrapper shared by every handler family: require an open workspace, run the
/// operation, map the outcome onto the response envelope.
pub fn with_db(
    state: &mut crate::ipc::types::AppState,
    req: &crate::ipc::types::Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub max_grade: f64,
    pub last_import: String,
    pub course_start: i64,
}

pub fn load_instance(conn: &Connection, instance_id: &str) -> Result<InstanceRow, HandlerErr> {
    conn.query_row(
        "SELECT i.id, i.course_id, i.name, i.max_grade, i.last_import, c.start_date
         FROM instances i JOIN courses c ON c.id = i.course_id
         WHERE i.id = ?",
        [instance_id],
        |r| {
            Ok(InstanceRow {
                id: r.get(0)?,
                course_id: r.get(1)?,
                name: r.get(2)?,
                max_grade: r.get(3)?,
                last_import: r.get(4)?,
                course_start: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("instance not found"))
}

/// Active catalog for an instance, highest point value first. Soft-deleted
/// rows never appear here.
pub fn load_statuses(
    conn: &Connection,
    instance_id: &str,
    only_visible: bool,
) -> Result<Vec<StatusDef>, HandlerErr> {
    let sql = if only_visible {
        "SELECT id, acronym, description, points, visible
         FROM statuses
         WHERE instance_id = ? AND deleted = 0 AND visible = 1
         ORDER BY points DESC"
    } else {
        "SELECT id, acronym, description, points, visible
         FROM statuses
         WHERE instance_id = ? AND deleted = 0
         ORDER BY points DESC"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    stmt.query_map([instance_id], |r| {
        Ok(StatusDef {
            id: r.get(0)?,
            acronym: r.get(1)?,
            description: r.get(2)?,
            points: r.get(3)?,
            visible: r.get::<_, i64>(4)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

/// Two-pass, case-insensitive resolution: acronyms first, then descriptions,
/// each in catalog order. The separate passes keep the hierarchy predictable
/// when an acronym elsewhere collides with a description.
pub fn status_from_string<'a>(statuses: &'a [StatusDef], token: &str) -> Option<&'a StatusDef> {
    statuses
        .iter()
        .find(|s| s.acronym.eq_ignore_ascii_case(token))
        .or_else(|| {
            statuses
                .iter()
                .find(|s| s.description.eq_ignore_ascii_case(token))
        })
}

/// Session whose window [start, start+duration] contains the instant. When
/// windows overlap, the session that ends soonest wins.
pub fn find_covering_session(
    conn: &Connection,
    instance_id: &str,
    time: i64,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM sessions
         WHERE instance_id = ?1 AND ?2 BETWEEN start_time AND (start_time + duration)
         ORDER BY (start_time + duration)
         LIMIT 1",
        (instance_id, time),
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub instance_id: String,
    pub start_time: i64,
    pub duration: i64,
    pub group_id: i64,
}

pub fn load_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    conn.query_row(
        "SELECT id, instance_id, start_time, duration, group_id FROM sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                instance_id: r.get(1)?,
                start_time: r.get(2)?,
                duration: r.get(3)?,
                group_id: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("session not found"))
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub id_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        id_number: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, id_number, first_name, last_name FROM users WHERE id = ?",
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

/// Identity lookup: the primary id_number column first, then each configured
/// alternate profile field in declared order. First match wins; later fields
/// are not checked for conflicting matches.
pub fn resolve_user_by_id_number(
    conn: &Connection,
    id_number: &str,
) -> Result<Option<UserRow>, HandlerErr> {
    let primary = conn
        .query_row(
            "SELECT id, id_number, first_name, last_name FROM users WHERE id_number = ?",
            [id_number],
            user_from_row,
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if primary.is_some() {
        return Ok(primary);
    }

    let mut field_stmt = conn
        .prepare("SELECT field FROM id_number_fields ORDER BY sort_order")
        .map_err(HandlerErr::db_query)?;
    let fields = field_stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    for field in fields {
        let hit = conn
            .query_row(
                "SELECT u.id, u.id_number, u.first_name, u.last_name
                 FROM users u JOIN user_profile_data d ON d.user_id = u.id
                 WHERE d.field = ?1 AND d.value = ?2",
                (&field, id_number),
                user_from_row,
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        if hit.is_some() {
            return Ok(hit);
        }
    }
    Ok(None)
}

/// Idempotent (student, session) upsert: a second write for the same pair
/// updates the existing row in place, keeping its id. The unique constraint
/// makes this atomic under concurrent check-offs.
#[allow(clippy::too_many_arguments)]
pub fn save_attendance_record(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
    status_id: &str,
    status_set: &str,
    remarks: &str,
    taken_by: &str,
    time_taken: i64,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_log(id, session_id, student_id, status_id, status_set, remarks, time_taken, taken_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status_id = excluded.status_id,
           status_set = excluded.status_set,
           remarks = excluded.remarks,
           time_taken = excluded.time_taken,
           taken_by = excluded.taken_by",
        (
            new_id(),
            session_id,
            student_id,
            status_id,
            status_set,
            remarks,
            time_taken,
            taken_by,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance_log"))?;
    Ok(())
}

pub fn stamp_session_taken(
    conn: &Connection,
    session_id: &str,
    time: i64,
    taken_by: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE sessions SET last_taken = ?1, last_taken_by = ?2 WHERE id = ?3",
        (time, taken_by, session_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "sessions"))?;
    Ok(())
}

/// Enrolled user ids for a session's scope. Group 0 means the common session,
/// open to the whole course roster.
pub fn roster_user_ids(
    conn: &Connection,
    course_id: &str,
    group_id: i64,
) -> Result<Vec<String>, HandlerErr> {
    if group_id == 0 {
        let mut stmt = conn
            .prepare("SELECT user_id FROM enrolments WHERE course_id = ? ORDER BY user_id")
            .map_err(HandlerErr::db_query)?;
        return stmt
            .query_map([course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query);
    }
    let mut stmt = conn
        .prepare(
            "SELECT user_id FROM enrolments
             WHERE course_id = ?1 AND group_id = ?2
             ORDER BY user_id",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map((course_id, group_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

/// Per-status record counts for one student, bounded by course start.
pub fn user_status_counts(
    conn: &Connection,
    instance: &InstanceRow,
    user_id: &str,
) -> Result<HashMap<String, i64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT al.status_id, COUNT(al.status_id)
             FROM attendance_log al
             JOIN sessions s ON al.session_id = s.id
             WHERE s.instance_id = ?1 AND s.start_time >= ?2 AND al.student_id = ?3
             GROUP BY al.status_id",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&instance.id, instance.course_start, user_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(rows.into_iter().collect())
}

pub fn user_taken_sessions_count(
    conn: &Connection,
    instance: &InstanceRow,
    user_id: &str,
) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*)
         FROM attendance_log al
         JOIN sessions s ON al.session_id = s.id
         WHERE s.instance_id = ?1 AND s.start_time >= ?2 AND al.student_id = ?3",
        (&instance.id, instance.course_start, user_id),
        |r| r.get(0),
    )
    .map_err(HandlerErr::db_query)
}

/// Recompute and push gradebook rows for the given students. The statuses
/// slice is the visible catalog, loaded once by the caller so a batch shares
/// one snapshot. Push failures propagate; they are never swallowed.
pub fn update_users_grades(
    conn: &Connection,
    instance: &InstanceRow,
    statuses: &[StatusDef],
    user_ids: &[String],
) -> Result<(), HandlerErr> {
    for user_id in user_ids {
        let counts = user_status_counts(conn, instance, user_id)?;
        let taken = user_taken_sessions_count(conn, instance, user_id)?;
        let fraction = crate::grade::grade_fraction(
            crate::grade::user_grade(&counts, statuses),
            crate::grade::user_max_grade(taken, statuses),
        );
        let raw_grade = fraction * instance.max_grade;
        conn.execute(
            "INSERT INTO gradebook(course_id, instance_id, user_id, raw_grade)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(course_id, instance_id, user_id) DO UPDATE SET
               raw_grade = excluded.raw_grade",
            (&instance.course_id, &instance.id, user_id, raw_grade),
        )
        .map_err(|e| HandlerErr::db_update(e, "gradebook"))?;
    }
    Ok(())
}
