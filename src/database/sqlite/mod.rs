//! The implementation of a data storage using Sqlite.

use std::path::Path;

use anyhow::{anyhow, Context};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task::block_in_place;

use crate::{
    error::DatabaseError,
    grouping::summarize_payment,
    types::{
        Amount, Cancellation, DateKey, HistoryEntry, Item, ItemType, NewItem, OpenItem,
        PaymentDetail, Person, Quantity, SettlementRequest,
    },
};

use super::{Database, DatabaseResult};

mod schema;

const ITEM_COLUMNS: &str = "id, name, type, price, category, info";

const OPEN_ITEM_COLUMNS: &str =
    "id, person_id, source_item_id, item_name, price_per_item, item_type, date_added";

const HISTORY_COLUMNS: &str =
    "id, person_id, item_id, paid, timestamp, item_name, item_type, details";

pub struct SqliteDatabase {
    connection: Connection,
}

impl SqliteDatabase {
    pub fn new<P: AsRef<Path>>(path: P) -> DatabaseResult<SqliteDatabase> {
        block_in_place(|| {
            let connection = Connection::open(path)
                .map_err(|e| DatabaseError::new("cannot open database", e.into()))?;
            SqliteDatabase::with_connection(connection)
        })
    }

    #[cfg(test)]
    pub fn new_in_memory() -> DatabaseResult<SqliteDatabase> {
        let connection = Connection::open_in_memory()
            .map_err(|e| DatabaseError::new("cannot open database", e.into()))?;
        SqliteDatabase::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> DatabaseResult<SqliteDatabase> {
        schema::create_all_tables(&connection)
            .map_err(|e| DatabaseError::new("cannot create tables", e))?;
        Ok(SqliteDatabase { connection })
    }
}

impl Database for SqliteDatabase {
    fn create_item(&mut self, item: &NewItem) -> DatabaseResult<Item> {
        let fn_impl = || -> anyhow::Result<Item> {
            let id: i64 = self.connection.query_row(
                "INSERT INTO items (name, type, price, category, info) VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                params![&item.name, &item.item_type, &item.price, &item.category, &item.info],
                |row| row.get(0),
            )?;

            debug!("item_id is {id}");

            Ok(Item {
                id,
                name: item.name.clone(),
                item_type: item.item_type,
                price: item.price,
                category: item.category.clone(),
                info: item.info.clone(),
            })
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot create item", e)))
    }

    fn get_items(&self) -> DatabaseResult<Vec<Item>> {
        let fn_impl = || -> anyhow::Result<Vec<Item>> {
            let mut stmt = self
                .connection
                .prepare_cached(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items ORDER BY type, category, name COLLATE NOCASE"
                ))
                .with_context(|| "Could not prepare get items statement")?;

            let items = stmt
                .query_map([], item_from_row)
                .with_context(|| "Query to get items failed")?
                .collect::<Result<_, _>>()?;
            Ok(items)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get items", e)))
    }

    fn get_item(&self, item_id: i64) -> DatabaseResult<Option<Item>> {
        let fn_impl = || -> anyhow::Result<Option<Item>> {
            let item = self
                .connection
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                    params![&item_id],
                    item_from_row,
                )
                .optional()?;
            Ok(item)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get item", e)))
    }

    fn update_item(&mut self, item: &Item) -> DatabaseResult<bool> {
        debug!("Updating item. Item ID: {}", item.id);
        let fn_impl = || -> anyhow::Result<bool> {
            let updated = self
                .connection
                .execute(
                    "UPDATE items SET name = ?1, type = ?2, price = ?3, category = ?4, info = ?5
                     WHERE id = ?6",
                    params![
                        &item.name,
                        &item.item_type,
                        &item.price,
                        &item.category,
                        &item.info,
                        &item.id
                    ],
                )
                .with_context(|| "Query to update item failed")?;
            Ok(updated > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot update item", e)))
    }

    fn delete_item(&mut self, item_id: i64) -> DatabaseResult<bool> {
        info!("Deleting item. Item ID: {item_id}");
        let fn_impl = || -> anyhow::Result<bool> {
            let deleted = self
                .connection
                .execute("DELETE FROM items WHERE id = ?1", params![&item_id])
                .with_context(|| "Query to delete item failed")?;
            Ok(deleted > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete item", e)))
    }

    fn create_person(&mut self, name: &str) -> DatabaseResult<Person> {
        let fn_impl = || -> anyhow::Result<Person> {
            let id: i64 = self.connection.query_row(
                "INSERT INTO persons (name, total_debt) VALUES (?1, 0) RETURNING id",
                params![&name],
                |row| row.get(0),
            )?;

            debug!("person_id is {id}");

            Ok(Person {
                id,
                name: name.to_string(),
                total_debt: 0,
            })
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot create person", e)))
    }

    fn get_persons(&self) -> DatabaseResult<Vec<Person>> {
        let fn_impl = || -> anyhow::Result<Vec<Person>> {
            let mut stmt = self
                .connection
                .prepare_cached(
                    "SELECT id, name, total_debt FROM persons ORDER BY name COLLATE NOCASE, id",
                )
                .with_context(|| "Could not prepare get persons statement")?;

            let persons = stmt
                .query_map([], person_from_row)
                .with_context(|| "Query to get persons failed")?
                .collect::<Result<_, _>>()?;
            Ok(persons)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get persons", e)))
    }

    fn get_person(&self, person_id: i64) -> DatabaseResult<Option<Person>> {
        let fn_impl = || -> anyhow::Result<Option<Person>> {
            let person = self
                .connection
                .query_row(
                    "SELECT id, name, total_debt FROM persons WHERE id = ?1",
                    params![&person_id],
                    person_from_row,
                )
                .optional()?;
            Ok(person)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get person", e)))
    }

    fn rename_person(&mut self, person_id: i64, name: &str) -> DatabaseResult<bool> {
        let fn_impl = || -> anyhow::Result<bool> {
            let updated = self.connection.execute(
                "UPDATE persons SET name = ?1 WHERE id = ?2",
                params![&name, &person_id],
            )?;
            Ok(updated > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot rename person", e)))
    }

    fn delete_person(&mut self, person_id: i64) -> DatabaseResult<bool> {
        info!("Deleting person. Person ID: {person_id}");
        let mut fn_impl = || -> anyhow::Result<bool> {
            let tx = self.connection.transaction()?;

            // Foreign keys cascade as well, but the store may have been
            // opened by a client that did not enable them.
            let open_items = tx.execute(
                "DELETE FROM open_items WHERE person_id = ?1",
                params![&person_id],
            )?;
            let history = tx.execute(
                "DELETE FROM history WHERE person_id = ?1",
                params![&person_id],
            )?;
            let deleted = tx.execute("DELETE FROM persons WHERE id = ?1", params![&person_id])?;

            debug!("Deleted {open_items} open items and {history} history entries");

            tx.commit()?;

            Ok(deleted > 0)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot delete person", e)))
    }

    fn recalculate_debt(&mut self, person_id: i64) -> DatabaseResult<Option<Amount>> {
        let mut fn_impl = || -> anyhow::Result<Option<Amount>> {
            let tx = self.connection.transaction()?;

            if !person_exists(&tx, person_id)? {
                return Ok(None);
            }

            let debt: Amount = tx.query_row(
                "SELECT COALESCE(SUM(price_per_item), 0) FROM open_items WHERE person_id = ?1",
                params![&person_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE persons SET total_debt = ?1 WHERE id = ?2",
                params![&debt, &person_id],
            )?;

            tx.commit()?;

            Ok(Some(debt))
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot recalculate debt", e)))
    }

    fn add_open_items(
        &mut self,
        person_id: i64,
        item: &Item,
        quantity: Quantity,
        added_on: NaiveDate,
    ) -> DatabaseResult<usize> {
        debug!(
            "Adding {quantity} x {} for person {person_id} on {added_on}",
            item.name
        );
        let mut fn_impl = || -> anyhow::Result<usize> {
            let tx = self.connection.transaction()?;

            let debt: Option<Amount> = tx
                .query_row(
                    "SELECT total_debt FROM persons WHERE id = ?1",
                    params![&person_id],
                    |row| row.get(0),
                )
                .optional()?;
            let debt = match debt {
                Some(debt) => debt,
                None => return Ok(0),
            };

            let new_debt = item
                .price
                .checked_mul(Amount::from(quantity))
                .and_then(|added| debt.checked_add(added))
                .ok_or_else(|| {
                    anyhow!(
                        "debt of person {person_id} would overflow adding {quantity} x {}",
                        item.price
                    )
                })?;

            {
                let mut insert_open_item_stmt = tx.prepare_cached(
                    "INSERT INTO open_items
                     (person_id, source_item_id, price_per_item, item_name, item_type, date_added)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;

                for _ in 0..quantity {
                    insert_open_item_stmt.execute(params![
                        &person_id,
                        &item.id,
                        &item.price,
                        &item.name,
                        &item.item_type,
                        &added_on,
                    ])?;
                }
            }

            tx.execute(
                "UPDATE persons SET total_debt = ?1 WHERE id = ?2",
                params![&new_debt, &person_id],
            )?;

            tx.commit()?;

            Ok(quantity as usize)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot add open items", e)))
    }

    fn get_open_items(&self, person_id: i64) -> DatabaseResult<Vec<OpenItem>> {
        block_in_place(|| {
            query_open_items(&self.connection, person_id)
                .map_err(|e| map_error("cannot get open items", e))
        })
    }

    fn settle_items(
        &mut self,
        person_id: i64,
        requests: &[SettlementRequest],
        paid_at: DateTime<Utc>,
    ) -> DatabaseResult<Option<HistoryEntry>> {
        let mut fn_impl = || -> anyhow::Result<Option<HistoryEntry>> {
            let tx = self.connection.transaction()?;

            let settled = take_matching_rows(&tx, person_id, requests)?;
            if settled.is_empty() {
                return Ok(None);
            }

            let paid: Amount = settled.iter().map(|i| i.unit_price).sum();
            decrease_debt(&tx, person_id, paid)?;

            let details = summarize_payment(&settled);
            let (item_id, item_type) = match settled_item(&settled) {
                Some(item) => (Some(item.source_item_id), Some(item.item_type)),
                None => (None, common_item_type(&settled)),
            };

            let entry = insert_history(
                &tx,
                NewHistoryEntry {
                    person_id,
                    item_id,
                    paid,
                    paid_at,
                    item_name: Some(settled_names(&details)),
                    item_type,
                    details,
                },
            )?;

            tx.commit()?;

            Ok(Some(entry))
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot settle items", e)))
    }

    fn settle_all(
        &mut self,
        person_id: i64,
        paid_at: DateTime<Utc>,
    ) -> DatabaseResult<Option<HistoryEntry>> {
        debug!("Settling all open items of person {person_id}");
        let mut fn_impl = || -> anyhow::Result<Option<HistoryEntry>> {
            let tx = self.connection.transaction()?;

            let debt: Option<Amount> = tx
                .query_row(
                    "SELECT total_debt FROM persons WHERE id = ?1",
                    params![&person_id],
                    |row| row.get(0),
                )
                .optional()?;

            let debt = match debt {
                Some(debt) => debt,
                None => return Ok(None),
            };

            let open_items = query_open_items(&tx, person_id)?;
            if open_items.is_empty() && debt == 0 {
                return Ok(None);
            }

            tx.execute(
                "DELETE FROM open_items WHERE person_id = ?1",
                params![&person_id],
            )?;
            tx.execute(
                "UPDATE persons SET total_debt = 0 WHERE id = ?1",
                params![&person_id],
            )?;

            let entry = insert_history(
                &tx,
                NewHistoryEntry {
                    person_id,
                    item_id: None,
                    paid: debt,
                    paid_at,
                    item_name: None,
                    item_type: None,
                    details: summarize_payment(&open_items),
                },
            )?;

            tx.commit()?;

            Ok(Some(entry))
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot settle all items", e)))
    }

    fn cancel_items(
        &mut self,
        person_id: i64,
        requests: &[SettlementRequest],
    ) -> DatabaseResult<Cancellation> {
        let mut fn_impl = || -> anyhow::Result<Cancellation> {
            let tx = self.connection.transaction()?;

            let cancelled = take_matching_rows(&tx, person_id, requests)?;
            if cancelled.is_empty() {
                return Ok(Cancellation::default());
            }

            let amount: Amount = cancelled.iter().map(|i| i.unit_price).sum();
            decrease_debt(&tx, person_id, amount)?;

            tx.commit()?;

            Ok(Cancellation {
                removed: cancelled.len(),
                amount,
            })
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot cancel items", e)))
    }

    fn get_history(&self, person_id: i64) -> DatabaseResult<Vec<HistoryEntry>> {
        let fn_impl = || -> anyhow::Result<Vec<HistoryEntry>> {
            let mut stmt = self
                .connection
                .prepare_cached(&format!(
                    "SELECT {HISTORY_COLUMNS} FROM history WHERE person_id = ?1
                     ORDER BY timestamp DESC, id DESC"
                ))
                .with_context(|| "Could not prepare get history statement")?;

            let history = stmt
                .query_map(params![&person_id], history_from_row)
                .with_context(|| "Query to get history failed")?
                .collect::<Result<_, _>>()?;
            Ok(history)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot get history", e)))
    }

    fn clear_history(&mut self, person_id: i64) -> DatabaseResult<usize> {
        info!("Clearing history. Person ID: {person_id}");
        let fn_impl = || -> anyhow::Result<usize> {
            let deleted = self
                .connection
                .execute(
                    "DELETE FROM history WHERE person_id = ?1",
                    params![&person_id],
                )
                .with_context(|| "Query to clear history failed")?;
            Ok(deleted)
        };

        block_in_place(|| fn_impl().map_err(|e| map_error("cannot clear history", e)))
    }
}

struct NewHistoryEntry {
    person_id: i64,
    item_id: Option<i64>,
    paid: Amount,
    paid_at: DateTime<Utc>,
    item_name: Option<String>,
    item_type: Option<ItemType>,
    details: Vec<PaymentDetail>,
}

fn insert_history(connection: &Connection, entry: NewHistoryEntry) -> anyhow::Result<HistoryEntry> {
    let details = serde_json::to_string(&entry.details)
        .with_context(|| "Could not serialize payment details")?;
    let timestamp_millis = entry.paid_at.timestamp_millis();

    let id: i64 = connection.query_row(
        "INSERT INTO history (person_id, item_id, timestamp, paid, item_name, item_type, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
        params![
            &entry.person_id,
            &entry.item_id,
            &timestamp_millis,
            &entry.paid,
            &entry.item_name,
            &entry.item_type,
            &details,
        ],
        |row| row.get(0),
    )?;

    debug!("history_id is {id}");

    Ok(HistoryEntry {
        id,
        person_id: entry.person_id,
        item_id: entry.item_id,
        paid: entry.paid,
        timestamp_millis,
        item_name: entry.item_name,
        item_type: entry.item_type,
        details: entry.details,
    })
}

fn person_exists(connection: &Connection, person_id: i64) -> anyhow::Result<bool> {
    let id: Option<i64> = connection
        .query_row(
            "SELECT id FROM persons WHERE id = ?1",
            params![&person_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.is_some())
}

fn decrease_debt(connection: &Connection, person_id: i64, amount: Amount) -> anyhow::Result<()> {
    connection.execute(
        "UPDATE persons SET total_debt = MAX(total_debt - ?1, 0) WHERE id = ?2",
        params![&amount, &person_id],
    )?;
    Ok(())
}

fn query_open_items(connection: &Connection, person_id: i64) -> anyhow::Result<Vec<OpenItem>> {
    let mut stmt = connection
        .prepare_cached(&format!(
            "SELECT {OPEN_ITEM_COLUMNS} FROM open_items WHERE person_id = ?1 ORDER BY id"
        ))
        .with_context(|| "Could not prepare get open items statement")?;

    let open_items = stmt
        .query_map(params![&person_id], open_item_from_row)
        .with_context(|| "Query to get open items failed")?
        .collect::<Result<_, _>>()?;
    Ok(open_items)
}

/// Select the oldest rows matching *request*.
fn match_rows(
    connection: &Connection,
    person_id: i64,
    request: &SettlementRequest,
) -> anyhow::Result<Vec<OpenItem>> {
    let base = format!(
        "SELECT {OPEN_ITEM_COLUMNS} FROM open_items
         WHERE person_id = ?1 AND item_name = ?2 AND item_type = ?3 AND price_per_item = ?4"
    );
    let limit = i64::from(request.quantity);

    let rows: Vec<OpenItem> = match request.date_added {
        None => {
            let mut stmt =
                connection.prepare_cached(&format!("{base} ORDER BY id ASC LIMIT ?5"))?;
            let rows = stmt
                .query_map(
                    params![
                        &person_id,
                        &request.name,
                        &request.item_type,
                        &request.unit_price,
                        &limit
                    ],
                    open_item_from_row,
                )?
                .collect::<Result<_, _>>()?;
            rows
        }
        Some(DateKey::Known(date)) => {
            let mut stmt = connection.prepare_cached(&format!(
                "{base} AND date_added = ?5 ORDER BY id ASC LIMIT ?6"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        &person_id,
                        &request.name,
                        &request.item_type,
                        &request.unit_price,
                        &date,
                        &limit
                    ],
                    open_item_from_row,
                )?
                .collect::<Result<_, _>>()?;
            rows
        }
        Some(DateKey::Unknown) => {
            let mut stmt = connection.prepare_cached(&format!(
                "{base} AND date_added IS NULL ORDER BY id ASC LIMIT ?5"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        &person_id,
                        &request.name,
                        &request.item_type,
                        &request.unit_price,
                        &limit
                    ],
                    open_item_from_row,
                )?
                .collect::<Result<_, _>>()?;
            rows
        }
    };

    Ok(rows)
}

/// Match every request in turn and delete what it matched, so that a row is
/// never selected twice.
fn take_matching_rows(
    connection: &Connection,
    person_id: i64,
    requests: &[SettlementRequest],
) -> anyhow::Result<Vec<OpenItem>> {
    let mut taken = Vec::new();

    let mut delete_open_item_stmt =
        connection.prepare_cached("DELETE FROM open_items WHERE id = ?1")?;

    for request in requests {
        let matched = match_rows(connection, person_id, request)?;
        if matched.len() < request.quantity as usize {
            debug!(
                "Requested {} x {} but only {} matched",
                request.quantity,
                request.name,
                matched.len()
            );
        }

        for open_item in &matched {
            let num_deleted_rows = delete_open_item_stmt.execute(params![&open_item.id])?;
            if num_deleted_rows == 0 {
                return Err(DatabaseError::concurrency("the open item was not found").into());
            }
        }

        taken.extend(matched);
    }

    Ok(taken)
}

/// The item paid by a targeted settlement, if all rows refer to the same one.
fn settled_item(open_items: &[OpenItem]) -> Option<&OpenItem> {
    let first = open_items.first()?;
    if open_items
        .iter()
        .all(|i| i.name == first.name && i.item_type == first.item_type)
    {
        Some(first)
    } else {
        None
    }
}

fn common_item_type(open_items: &[OpenItem]) -> Option<ItemType> {
    let first = open_items.first()?.item_type;
    open_items
        .iter()
        .all(|i| i.item_type == first)
        .then_some(first)
}

/// The distinct names of a settlement in breakdown order. Only "pay
/// everything" entries are stored without a name.
fn settled_names(details: &[PaymentDetail]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for detail in details {
        if !names.contains(&detail.name.as_str()) {
            names.push(&detail.name);
        }
    }
    names.join(", ")
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        item_type: row.get(2)?,
        price: row.get(3)?,
        category: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        info: row.get(5)?,
    })
}

fn person_from_row(row: &Row) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        total_debt: row.get(2)?,
    })
}

fn open_item_from_row(row: &Row) -> rusqlite::Result<OpenItem> {
    Ok(OpenItem {
        id: row.get(0)?,
        person_id: row.get(1)?,
        source_item_id: row.get(2)?,
        name: row.get(3)?,
        unit_price: row.get(4)?,
        item_type: row.get(5)?,
        date_added: row.get(6)?,
    })
}

fn history_from_row(row: &Row) -> rusqlite::Result<HistoryEntry> {
    let id: i64 = row.get(0)?;
    let details: Option<String> = row.get(7)?;
    Ok(HistoryEntry {
        id,
        person_id: row.get(1)?,
        item_id: row.get(2)?,
        paid: row.get(3)?,
        timestamp_millis: row.get(4)?,
        item_name: row.get(5)?,
        item_type: row.get(6)?,
        details: parse_details(id, details),
    })
}

/// Entries written by old versions may have no breakdown at all: they are
/// shown as a plain total.
fn parse_details(history_id: i64, details: Option<String>) -> Vec<PaymentDetail> {
    match details {
        Some(details) if !details.trim().is_empty() => serde_json::from_str(&details)
            .unwrap_or_else(|e| {
                warn!("Cannot read details of history entry {history_id}: {e}");
                vec![]
            }),
        _ => vec![],
    }
}

fn map_error<T: AsRef<str>>(message: T, e: anyhow::Error) -> DatabaseError {
    match e.downcast::<DatabaseError>() {
        Ok(e) => e,
        Err(e) => DatabaseError::new(message, e),
    }
}
