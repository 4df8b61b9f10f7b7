//! Internal representation of data.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    error::DatabaseError,
    types::{
        Amount, Cancellation, HistoryEntry, Item, NewItem, OpenItem, Person, Quantity,
        SettlementRequest,
    },
};

type DatabaseResult<T> = Result<T, DatabaseError>;

pub mod sqlite;

/// This trait abstracts over the type of database.
///
/// Every method that changes both the open items of a person and their debt
/// must apply all of its changes atomically: a reader never sees rows removed
/// without the debt being updated, or vice versa.
pub trait Database {
    /// Add an item to the catalog.
    fn create_item(&mut self, item: &NewItem) -> DatabaseResult<Item>;

    /// Get the whole catalog, ordered by type, category and name.
    fn get_items(&self) -> DatabaseResult<Vec<Item>>;

    fn get_item(&self, item_id: i64) -> DatabaseResult<Option<Item>>;

    /// Overwrite a catalog item. Open items and history keep their own copy
    /// of name and price, so they are not affected.
    ///
    /// Returns false if the item does not exist.
    fn update_item(&mut self, item: &Item) -> DatabaseResult<bool>;

    /// Delete a catalog item. Returns false if the item does not exist.
    fn delete_item(&mut self, item_id: i64) -> DatabaseResult<bool>;

    /// Create a person with no debt.
    fn create_person(&mut self, name: &str) -> DatabaseResult<Person>;

    /// Get all persons ordered by name.
    fn get_persons(&self) -> DatabaseResult<Vec<Person>>;

    fn get_person(&self, person_id: i64) -> DatabaseResult<Option<Person>>;

    /// Returns false if the person does not exist.
    fn rename_person(&mut self, person_id: i64, name: &str) -> DatabaseResult<bool>;

    /// Delete a person together with all their open items and history.
    ///
    /// Returns false if the person does not exist.
    fn delete_person(&mut self, person_id: i64) -> DatabaseResult<bool>;

    /// Rewrite the cached debt of a person from the sum of their open items.
    ///
    /// Returns the new debt, or `None` if the person does not exist.
    fn recalculate_debt(&mut self, person_id: i64) -> DatabaseResult<Option<Amount>>;

    /// Insert `quantity` open items for the person, one row per unit, and
    /// increase their debt accordingly.
    ///
    /// Returns the number of inserted rows, which is zero if the person does
    /// not exist.
    fn add_open_items(
        &mut self,
        person_id: i64,
        item: &Item,
        quantity: Quantity,
        added_on: NaiveDate,
    ) -> DatabaseResult<usize>;

    /// Get the open items of a person in insertion order.
    fn get_open_items(&self, person_id: i64) -> DatabaseResult<Vec<OpenItem>>;

    /// Pay the open items selected by *requests*.
    ///
    /// Each request selects the oldest matching rows first and may match fewer
    /// rows than requested. All matched rows are deleted, the debt is reduced
    /// by their sum (never below zero) and exactly one history entry is
    /// written with one detail per distinct (name, type, price, date).
    ///
    /// Returns `None` without changing anything if no row matched.
    fn settle_items(
        &mut self,
        person_id: i64,
        requests: &[SettlementRequest],
        paid_at: DateTime<Utc>,
    ) -> DatabaseResult<Option<HistoryEntry>>;

    /// Pay everything the person owes.
    ///
    /// Deletes all open items, sets the debt to zero and writes one history
    /// entry without item name whose amount is the debt before clearing.
    /// Returns `None` if the person does not exist or owes nothing.
    fn settle_all(
        &mut self,
        person_id: i64,
        paid_at: DateTime<Utc>,
    ) -> DatabaseResult<Option<HistoryEntry>>;

    /// Remove the open items selected by *requests* as if they were never
    /// added: the debt is reduced but no history is written.
    fn cancel_items(
        &mut self,
        person_id: i64,
        requests: &[SettlementRequest],
    ) -> DatabaseResult<Cancellation>;

    /// Get the history of a person, newest first.
    fn get_history(&self, person_id: i64) -> DatabaseResult<Vec<HistoryEntry>>;

    /// Delete the whole history of a person. Open items and debt are untouched.
    ///
    /// Returns the number of deleted entries.
    fn clear_history(&mut self, person_id: i64) -> DatabaseResult<usize>;
}
