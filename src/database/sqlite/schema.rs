use anyhow::Context;
use log::info;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 2;

const CREATE_PERSON_TABLE: &str = "CREATE TABLE IF NOT EXISTS persons (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  total_debt INTEGER NOT NULL DEFAULT 0
)";

const CREATE_ITEM_TABLE: &str = "CREATE TABLE IF NOT EXISTS items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  type TEXT NOT NULL CHECK (type IN ('drink', 'food')),
  price INTEGER NOT NULL,
  info TEXT,
  category TEXT
)";

const CREATE_OPEN_ITEM_TABLE: &str = "CREATE TABLE IF NOT EXISTS open_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  person_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
  source_item_id INTEGER NOT NULL,
  price_per_item INTEGER NOT NULL,
  item_name TEXT NOT NULL,
  item_type TEXT NOT NULL,
  date_added DATE
)";

const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  person_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
  item_id INTEGER,
  timestamp INTEGER NOT NULL,
  paid INTEGER NOT NULL,
  item_name TEXT,
  item_type TEXT,
  details TEXT NOT NULL DEFAULT '[]'
)";

const CREATE_OPEN_ITEM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_open_items_person ON open_items (person_id)";

const CREATE_HISTORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_history_person ON history (person_id, timestamp)";

pub fn create_all_tables(connection: &Connection) -> anyhow::Result<()> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .with_context(|| "Could not enable foreign keys")?;

    connection.execute(CREATE_PERSON_TABLE, ())?;
    connection.execute(CREATE_ITEM_TABLE, ())?;
    connection.execute(CREATE_OPEN_ITEM_TABLE, ())?;
    connection.execute(CREATE_HISTORY_TABLE, ())?;

    migrate(connection)?;

    connection.execute(CREATE_OPEN_ITEM_INDEX, ())?;
    connection.execute(CREATE_HISTORY_INDEX, ())?;
    Ok(())
}

/// Bring a store written by an older version up to date.
///
/// Version 1 had no acquisition date on open items and stored history
/// entries as plain totals.
fn migrate(connection: &Connection) -> anyhow::Result<()> {
    let version: i64 = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating schema from version {version} to {SCHEMA_VERSION}");

    let open_item_columns = table_columns(connection, "open_items")?;
    if !open_item_columns.iter().any(|c| c == "date_added") {
        connection.execute("ALTER TABLE open_items ADD COLUMN date_added DATE", ())?;
    }

    let history_columns = table_columns(connection, "history")?;
    if !history_columns.iter().any(|c| c == "item_name") {
        connection.execute("ALTER TABLE history ADD COLUMN item_name TEXT", ())?;
    }
    if !history_columns.iter().any(|c| c == "item_type") {
        connection.execute("ALTER TABLE history ADD COLUMN item_type TEXT", ())?;
    }
    if !history_columns.iter().any(|c| c == "details") {
        connection.execute(
            "ALTER TABLE history ADD COLUMN details TEXT NOT NULL DEFAULT '[]'",
            (),
        )?;
    }

    connection
        .pragma_update(None, "user_version", SCHEMA_VERSION)
        .with_context(|| "Could not update schema version")?;
    Ok(())
}

fn table_columns(connection: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = connection.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    Ok(columns)
}
