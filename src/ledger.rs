//! Every operation on persons, catalog and tabs, as seen by a front-end.
//!
//! This is where failures stop: targets that do not exist and selections
//! that match nothing are logged and reported as empty results, storage
//! errors are logged and returned to the caller. Nothing here panics.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::{
    config::Config,
    database::{sqlite::SqliteDatabase, Database},
    error::DatabaseError,
    grouping::{group_by_date, group_open_items, DateGroup, GroupedItems, ItemGroup},
    types::{
        Amount, Cancellation, HistoryEntry, Item, NewItem, OpenItem, Person, Quantity,
        SettlementRequest,
    },
};

/// Open the store described by *config* and return a ready ledger.
///
/// The store is opened and migrated on a blocking thread; no operation can be
/// issued before this completes.
pub async fn initialize(config: &Config) -> anyhow::Result<Ledger<SqliteDatabase>> {
    let path = config.database_path.clone();
    info!("Opening database at {}", path.display());

    let database = tokio::task::spawn_blocking(move || SqliteDatabase::new(path))
        .await
        .with_context(|| "Database initialization did not complete")??;

    Ok(Ledger::new(database))
}

pub struct Ledger<D: Database> {
    database: Arc<Mutex<D>>,
}

impl<D: Database> Clone for Ledger<D> {
    fn clone(&self) -> Self {
        Ledger {
            database: Arc::clone(&self.database),
        }
    }
}

impl<D: Database> Ledger<D> {
    pub fn new(database: D) -> Ledger<D> {
        Ledger {
            database: Arc::new(Mutex::new(database)),
        }
    }

    pub async fn create_item(&self, item: NewItem) -> anyhow::Result<Item> {
        let result = self.database.lock().await.create_item(&item);
        report("create item", result)
    }

    pub async fn list_items(&self) -> anyhow::Result<Vec<Item>> {
        let result = self.database.lock().await.get_items();
        report("list items", result)
    }

    pub async fn get_item(&self, item_id: i64) -> anyhow::Result<Option<Item>> {
        let item = report("get item", self.database.lock().await.get_item(item_id))?;
        if item.is_none() {
            warn!("Item {item_id} not found");
        }
        Ok(item)
    }

    pub async fn update_item(&self, item: Item) -> anyhow::Result<bool> {
        let updated = report("update item", self.database.lock().await.update_item(&item))?;
        if !updated {
            warn!("Cannot update item {}: not found", item.id);
        }
        Ok(updated)
    }

    pub async fn delete_item(&self, item_id: i64) -> anyhow::Result<bool> {
        let deleted = report("delete item", self.database.lock().await.delete_item(item_id))?;
        if !deleted {
            warn!("Cannot delete item {item_id}: not found");
        }
        Ok(deleted)
    }

    pub async fn create_person(&self, name: &str) -> anyhow::Result<Person> {
        let result = self.database.lock().await.create_person(name);
        report("create person", result)
    }

    pub async fn list_persons(&self) -> anyhow::Result<Vec<Person>> {
        let result = self.database.lock().await.get_persons();
        report("list persons", result)
    }

    pub async fn get_person(&self, person_id: i64) -> anyhow::Result<Option<Person>> {
        let person = report("get person", self.database.lock().await.get_person(person_id))?;
        if person.is_none() {
            warn!("Person {person_id} not found");
        }
        Ok(person)
    }

    pub async fn rename_person(&self, person_id: i64, name: &str) -> anyhow::Result<bool> {
        let result = self.database.lock().await.rename_person(person_id, name);
        let renamed = report("rename person", result)?;
        if !renamed {
            warn!("Cannot rename person {person_id}: not found");
        }
        Ok(renamed)
    }

    /// Delete a person with their open items and history.
    pub async fn delete_person(&self, person_id: i64) -> anyhow::Result<bool> {
        let result = self.database.lock().await.delete_person(person_id);
        let deleted = report("delete person", result)?;
        if !deleted {
            warn!("Cannot delete person {person_id}: not found");
        }
        Ok(deleted)
    }

    /// Rewrite the cached debt of a person from their open items.
    pub async fn recalculate_debt(&self, person_id: i64) -> anyhow::Result<Option<Amount>> {
        let result = self.database.lock().await.recalculate_debt(person_id);
        let debt = report("recalculate debt", result)?;
        match debt {
            Some(debt) => info!("Debt of person {person_id} recalculated: {debt}"),
            None => warn!("Cannot recalculate debt of person {person_id}: not found"),
        }
        Ok(debt)
    }

    /// Put *quantity* units of *item* on the tab of a person, dated today.
    ///
    /// Returns the number of units added; zero means nothing happened.
    pub async fn add_items(
        &self,
        person_id: i64,
        item: &Item,
        quantity: Quantity,
    ) -> anyhow::Result<usize> {
        if quantity == 0 {
            warn!("Not adding {} for person {person_id}: quantity is zero", item.name);
            return Ok(0);
        }

        let today = Local::now().date_naive();
        let result = self
            .database
            .lock()
            .await
            .add_open_items(person_id, item, quantity, today);
        let added = report("add items", result)?;
        if added == 0 {
            warn!("Cannot add {} for person {person_id}: person not found", item.name);
        }
        Ok(added)
    }

    /// Like [`Ledger::add_items`], looking the item up in the catalog first.
    pub async fn add_catalog_items(
        &self,
        person_id: i64,
        item_id: i64,
        quantity: Quantity,
    ) -> anyhow::Result<usize> {
        let item = report("get item", self.database.lock().await.get_item(item_id))?;
        match item {
            Some(item) => self.add_items(person_id, &item, quantity).await,
            None => {
                warn!("Cannot add item {item_id} for person {person_id}: item not found");
                Ok(0)
            }
        }
    }

    pub async fn open_items(&self, person_id: i64) -> anyhow::Result<Vec<OpenItem>> {
        let result = self.database.lock().await.get_open_items(person_id);
        report("get open items", result)
    }

    /// The open items of a person grouped and split into drinks and food.
    pub async fn grouped_open_items(&self, person_id: i64) -> anyhow::Result<GroupedItems> {
        Ok(group_open_items(&self.open_items(person_id).await?))
    }

    /// The open items of a person grouped by day, newest first.
    pub async fn tab(&self, person_id: i64) -> anyhow::Result<Vec<DateGroup>> {
        Ok(group_by_date(&self.open_items(person_id).await?))
    }

    /// Pay up to `request.quantity` matching units, oldest first.
    pub async fn pay(
        &self,
        person_id: i64,
        request: SettlementRequest,
    ) -> anyhow::Result<Option<HistoryEntry>> {
        self.pay_selection(person_id, &[request]).await
    }

    /// Pay *quantity* units of a displayed group.
    pub async fn pay_group(
        &self,
        person_id: i64,
        group: &ItemGroup,
        quantity: Quantity,
    ) -> anyhow::Result<Option<HistoryEntry>> {
        self.pay(person_id, group.request(quantity)).await
    }

    /// Pay several selections at once, recorded as a single history entry.
    pub async fn pay_selection(
        &self,
        person_id: i64,
        requests: &[SettlementRequest],
    ) -> anyhow::Result<Option<HistoryEntry>> {
        let result = self
            .database
            .lock()
            .await
            .settle_items(person_id, requests, Utc::now());
        let entry = report("pay items", result)?;

        match &entry {
            Some(entry) => {
                let paid_units: Quantity = entry.details.iter().map(|d| d.quantity).sum();
                log_partial_match(person_id, requests, paid_units);
                info!("Person {person_id} paid {}", entry.paid);
            }
            None => warn!(
                "Nothing to pay for person {person_id}: no open item matches {}",
                describe(requests)
            ),
        }
        Ok(entry)
    }

    /// Pay everything a person owes.
    pub async fn pay_all(&self, person_id: i64) -> anyhow::Result<Option<HistoryEntry>> {
        let result = self
            .database
            .lock()
            .await
            .settle_all(person_id, Utc::now());
        let entry = report("pay all", result)?;

        match &entry {
            Some(entry) => info!("Person {person_id} settled everything: {}", entry.paid),
            None => warn!("Nothing to pay for person {person_id}"),
        }
        Ok(entry)
    }

    /// Remove up to `request.quantity` matching units without recording a
    /// payment.
    pub async fn cancel(
        &self,
        person_id: i64,
        request: SettlementRequest,
    ) -> anyhow::Result<Cancellation> {
        self.cancel_selection(person_id, &[request]).await
    }

    pub async fn cancel_group(
        &self,
        person_id: i64,
        group: &ItemGroup,
        quantity: Quantity,
    ) -> anyhow::Result<Cancellation> {
        self.cancel(person_id, group.request(quantity)).await
    }

    pub async fn cancel_selection(
        &self,
        person_id: i64,
        requests: &[SettlementRequest],
    ) -> anyhow::Result<Cancellation> {
        let result = self
            .database
            .lock()
            .await
            .cancel_items(person_id, requests);
        let cancellation = report("cancel items", result)?;

        if cancellation.removed == 0 {
            warn!(
                "Nothing to cancel for person {person_id}: no open item matches {}",
                describe(requests)
            );
        } else {
            log_partial_match(person_id, requests, cancellation.removed as Quantity);
            info!(
                "Cancelled {} items for person {person_id}: {}",
                cancellation.removed, cancellation.amount
            );
        }
        Ok(cancellation)
    }

    pub async fn history(&self, person_id: i64) -> anyhow::Result<Vec<HistoryEntry>> {
        let result = self.database.lock().await.get_history(person_id);
        report("get history", result)
    }

    pub async fn clear_history(&self, person_id: i64) -> anyhow::Result<usize> {
        let result = self.database.lock().await.clear_history(person_id);
        report("clear history", result)
    }
}

fn report<T>(operation: &str, result: Result<T, DatabaseError>) -> anyhow::Result<T> {
    result.map_err(|e| {
        error!("Cannot {operation}: {e}");
        e.into()
    })
}

fn log_partial_match(person_id: i64, requests: &[SettlementRequest], matched: Quantity) {
    let requested: Quantity = requests.iter().map(|r| r.quantity).sum();
    if matched < requested {
        info!("Person {person_id}: requested {requested} items but only {matched} matched");
    }
}

fn describe(requests: &[SettlementRequest]) -> String {
    requests
        .iter()
        .map(|r| format!("{} x {} ({}, {})", r.quantity, r.name, r.item_type, r.unit_price))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::types::{DateKey, ItemType};

    async fn setup() -> anyhow::Result<(Ledger<SqliteDatabase>, Person, Item)> {
        let ledger = Ledger::new(SqliteDatabase::new_in_memory()?);
        let person = ledger.create_person("Max").await?;
        let beer = ledger
            .create_item(NewItem {
                name: "Bier".to_string(),
                item_type: ItemType::Drink,
                price: 250,
                category: "Bier".to_string(),
                info: Some("0,5l".to_string()),
            })
            .await?;
        Ok((ledger, person, beer))
    }

    async fn debt(ledger: &Ledger<SqliteDatabase>, person_id: i64) -> anyhow::Result<Amount> {
        Ok(ledger
            .get_person(person_id)
            .await?
            .map(|p| p.total_debt)
            .expect("person exists"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_catalog_items() -> anyhow::Result<()> {
        let (ledger, person, beer) = setup().await?;

        assert_eq!(ledger.add_catalog_items(person.id, beer.id, 2).await?, 2);
        assert_eq!(ledger.add_catalog_items(person.id, 999, 2).await?, 0);
        assert_eq!(ledger.add_catalog_items(999, beer.id, 2).await?, 0);
        assert_eq!(ledger.add_items(person.id, &beer, 0).await?, 0);

        assert_eq!(debt(&ledger, person.id).await?, 500);
        let open_items = ledger.open_items(person.id).await?;
        let today = Local::now().date_naive();
        assert!(open_items.iter().all(|i| i.date_added == Some(today)));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pay_and_cancel_groups() -> anyhow::Result<()> {
        let (ledger, person, beer) = setup().await?;
        ledger.add_items(person.id, &beer, 4).await?;

        let tab = ledger.tab(person.id).await?;
        assert_eq!(tab.len(), 1);
        let group = tab[0].items.drinks[0].clone();
        assert_eq!(group.count, 4);

        let entry = ledger
            .pay_group(person.id, &group, 3)
            .await?
            .expect("beers were paid");
        assert_eq!(entry.paid, 750);
        assert_eq!(entry.item_name, Some("Bier".to_string()));

        let cancellation = ledger.cancel_group(person.id, &group, 3).await?;
        assert_eq!(cancellation.removed, 1);
        assert_eq!(cancellation.amount, 250);

        assert!(ledger.grouped_open_items(person.id).await?.is_empty());
        assert_eq!(debt(&ledger, person.id).await?, 0);
        assert_eq!(ledger.history(person.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nothing_to_do() -> anyhow::Result<()> {
        let (ledger, person, beer) = setup().await?;

        let request = SettlementRequest::new("Bier", ItemType::Drink, 250, 1, None);
        assert_eq!(ledger.pay(person.id, request.clone()).await?, None);
        assert_eq!(
            ledger.cancel(person.id, request).await?,
            Cancellation::default()
        );
        assert_eq!(ledger.pay_all(person.id).await?, None);
        assert!(!ledger.delete_person(999).await?);
        assert!(!ledger.delete_item(999).await?);
        assert!(!ledger.rename_person(999, "Nobody").await?);
        assert_eq!(ledger.get_person(999).await?, None);
        assert_eq!(ledger.recalculate_debt(999).await?, None);

        ledger.add_items(person.id, &beer, 1).await?;
        let yesterday = Local::now().date_naive().pred_opt().expect("valid date");
        let request = SettlementRequest::new(
            "Bier",
            ItemType::Drink,
            250,
            1,
            Some(DateKey::Known(yesterday)),
        );
        assert_eq!(ledger.pay(person.id, request).await?, None);
        assert_eq!(debt(&ledger, person.id).await?, 250);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pay_all_then_clear_history() -> anyhow::Result<()> {
        let (ledger, person, beer) = setup().await?;
        ledger.add_items(person.id, &beer, 2).await?;

        let entry = ledger
            .pay_all(person.id)
            .await?
            .expect("everything was paid");
        assert_eq!(entry.paid, 500);
        assert!(entry.is_aggregate());
        assert_eq!(debt(&ledger, person.id).await?, 0);

        assert_eq!(ledger.clear_history(person.id).await?, 1);
        assert!(ledger.history(person.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_adds_keep_debt_consistent() -> anyhow::Result<()> {
        let (ledger, person, beer) = setup().await?;

        let person_id = person.id;
        let mut handles = vec![];
        for _ in 0..8 {
            let ledger = ledger.clone();
            let beer = beer.clone();
            handles.push(tokio::spawn(async move {
                ledger.add_items(person_id, &beer, 1).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let sum: Amount = ledger
            .open_items(person.id)
            .await?
            .iter()
            .map(|i| i.unit_price)
            .sum();
        assert_eq!(sum, 2000);
        assert_eq!(debt(&ledger, person.id).await?, sum);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize() -> anyhow::Result<()> {
        let dir = TempDir::new("tally")?;
        let config = Config {
            database_path: dir.path().join("tally.db"),
            ..Config::default()
        };

        let ledger = initialize(&config).await?;
        let person = ledger.create_person("Max").await?;
        drop(ledger);

        let ledger = initialize(&config).await?;
        assert_eq!(ledger.list_persons().await?, vec![person]);
        Ok(())
    }
}
