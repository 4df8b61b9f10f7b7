use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Money in minor units (cents).
pub type Amount = i64;

pub type Quantity = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Drink,
    Food,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Drink => "drink",
            ItemType::Food => "food",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drink" => Ok(ItemType::Drink),
            "food" => Ok(ItemType::Food),
            _ => Err(InputError::invalid_item_type(s.to_string())),
        }
    }
}

impl ToSql for ItemType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A catalog entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub item_type: ItemType,
    pub price: Amount,
    pub category: String,
    pub info: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub item_type: ItemType,
    pub price: Amount,
    pub category: String,
    pub info: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub total_debt: Amount,
}

/// One unpaid unit of an item.
///
/// Name, type and price are copied from the catalog when the row is created,
/// so later catalog edits do not touch it. Rows written before dates were
/// tracked have no `date_added`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenItem {
    pub id: i64,
    pub person_id: i64,
    pub source_item_id: i64,
    pub name: String,
    pub unit_price: Amount,
    pub item_type: ItemType,
    pub date_added: Option<NaiveDate>,
}

/// One group of a settlement breakdown, as stored in the history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    pub name: String,
    pub price: Amount,
    pub quantity: Quantity,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub date_added: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub person_id: i64,
    pub item_id: Option<i64>,
    pub paid: Amount,
    pub timestamp_millis: i64,
    pub item_name: Option<String>,
    pub item_type: Option<ItemType>,
    pub details: Vec<PaymentDetail>,
}

impl HistoryEntry {
    /// Entries without an item name come from a "pay everything" settlement.
    pub fn is_aggregate(&self) -> bool {
        self.item_name.is_none()
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }
}

/// The acquisition day used to group items. Legacy rows without a date
/// fall under `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateKey {
    Known(NaiveDate),
    Unknown,
}

impl From<Option<NaiveDate>> for DateKey {
    fn from(date: Option<NaiveDate>) -> Self {
        match date {
            Some(date) => DateKey::Known(date),
            None => DateKey::Unknown,
        }
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DateKey::Known(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateKey::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identifies up to `quantity` open items of a person to pay or cancel.
///
/// `date_added` restricts the match to one acquisition day; `None` matches
/// any day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementRequest {
    pub name: String,
    pub item_type: ItemType,
    pub unit_price: Amount,
    pub quantity: Quantity,
    pub date_added: Option<DateKey>,
}

impl SettlementRequest {
    pub fn new(
        name: &str,
        item_type: ItemType,
        unit_price: Amount,
        quantity: Quantity,
        date_added: Option<DateKey>,
    ) -> SettlementRequest {
        SettlementRequest {
            name: name.to_string(),
            item_type,
            unit_price,
            quantity,
            date_added,
        }
    }
}

/// What a cancellation removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cancellation {
    pub removed: usize,
    pub amount: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_type_from_str() {
        assert_eq!("Drink".parse::<ItemType>().ok(), Some(ItemType::Drink));
        assert_eq!("food".parse::<ItemType>().ok(), Some(ItemType::Food));
        assert!("snack".parse::<ItemType>().is_err());
    }

    #[test]
    fn test_payment_detail_json() -> anyhow::Result<()> {
        let detail = PaymentDetail {
            name: "Bier".to_string(),
            price: 250,
            quantity: 2,
            item_type: ItemType::Drink,
            date_added: NaiveDate::from_ymd_opt(2024, 5, 17),
        };
        let json = serde_json::to_string(&detail)?;
        assert_eq!(
            json,
            r#"{"name":"Bier","price":250,"quantity":2,"type":"drink","dateAdded":"2024-05-17"}"#
        );

        let legacy: PaymentDetail =
            serde_json::from_str(r#"{"name":"Pommes","price":300,"quantity":1,"type":"food"}"#)?;
        assert_eq!(legacy.date_added, None);
        Ok(())
    }
}
