use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "homework.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS themes(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            rating INTEGER NOT NULL CHECK(rating BETWEEN 1 AND 5),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_themes_subject ON themes(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS theme_updates(
            id TEXT PRIMARY KEY,
            theme_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            calendar_date TEXT NOT NULL,
            rating INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(theme_id) REFERENCES themes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_theme_updates_date ON theme_updates(calendar_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS theme_photos(
            id TEXT PRIMARY KEY,
            theme_id TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            created_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(theme_id) REFERENCES themes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework(
            id TEXT PRIMARY KEY,
            local_id TEXT,
            owner_id TEXT NOT NULL,
            subject_id TEXT,
            title TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            due_date TEXT,
            status TEXT NOT NULL,
            completed INTEGER NOT NULL,
            comment TEXT,
            submitted_at TEXT,
            approved_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(owner_id, local_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_homework_owner ON homework(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework_photos(
            id TEXT PRIMARY KEY,
            homework_id TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(homework_id) REFERENCES homework(id),
            UNIQUE(homework_id, storage_path)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks(
            id TEXT PRIMARY KEY,
            local_id TEXT,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tag TEXT NOT NULL DEFAULT '',
            priority TEXT NOT NULL DEFAULT 'M',
            due_date TEXT,
            required INTEGER NOT NULL DEFAULT 0,
            assigned_by TEXT,
            status TEXT NOT NULL,
            completed INTEGER NOT NULL,
            approved_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(owner_id, local_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id)",
        [],
    )?;

    // week_key '' is the standing schedule; 'YYYY-Www' rows override it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_entries(
            week_key TEXT NOT NULL DEFAULT '',
            weekday INTEGER NOT NULL,
            time_slot INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            room TEXT NOT NULL DEFAULT '',
            teacher TEXT NOT NULL DEFAULT '',
            is_double INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(week_key, weekday, time_slot)
        )",
        [],
    )?;

    // Workspaces created before tasks carried a tag column.
    if !table_has_column(&conn, "tasks", "tag")? {
        conn.execute("ALTER TABLE tasks ADD COLUMN tag TEXT NOT NULL DEFAULT ''", [])?;
    }

    Ok(conn)
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
