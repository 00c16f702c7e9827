use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            id_number TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_id_number ON users(id_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_profile_data(
            user_id TEXT NOT NULL,
            field TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY(user_id, field),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_profile_data_field ON user_profile_data(field, value)",
        [],
    )?;

    // Ordered list of alternate profile fields consulted when an id number
    // does not match the primary users.id_number column.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS id_number_fields(
            sort_order INTEGER PRIMARY KEY,
            field TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrolments(
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            group_id INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(course_id, user_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrolments_course ON enrolments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS instances(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            max_grade REAL NOT NULL DEFAULT 100,
            last_import TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_instances_course ON instances(course_id)",
        [],
    )?;
    ensure_instances_last_import(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS statuses(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            acronym TEXT NOT NULL,
            description TEXT NOT NULL,
            points REAL NOT NULL,
            visible INTEGER NOT NULL DEFAULT 1,
            deleted INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(instance_id) REFERENCES instances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_statuses_instance ON statuses(instance_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            instance_id TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            duration INTEGER NOT NULL,
            group_id INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            last_taken INTEGER,
            last_taken_by TEXT,
            FOREIGN KEY(instance_id) REFERENCES instances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_instance ON sessions(instance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_instance_start ON sessions(instance_id, start_time)",
        [],
    )?;

    // The UNIQUE(session_id, student_id) pair is the idempotency contract the
    // import pipeline depends on: a second write for the same pair must land
    // on the same row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_log(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status_id TEXT NOT NULL,
            status_set TEXT NOT NULL,
            remarks TEXT NOT NULL DEFAULT '',
            time_taken INTEGER NOT NULL,
            taken_by TEXT NOT NULL,
            UNIQUE(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(status_id) REFERENCES statuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_log_session ON attendance_log(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_log_student ON attendance_log(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gradebook(
            course_id TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            raw_grade REAL NOT NULL,
            PRIMARY KEY(course_id, instance_id, user_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(instance_id) REFERENCES instances(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gradebook_instance ON gradebook(instance_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_instances_last_import(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate the persisted import retry buffer.
    if table_has_column(conn, "instances", "last_import")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE instances ADD COLUMN last_import TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
