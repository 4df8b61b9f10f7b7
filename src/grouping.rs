//! Grouping of open items and payment breakdowns.
//!
//! Items are grouped by (type, name, unit price, acquisition day). Tabs and
//! settlement breakdowns share this grouping, and a displayed group turns back
//! into a [`SettlementRequest`] for "pay 2 of these".

use std::cmp::Ordering;
use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use crate::types::{
    Amount, DateKey, HistoryEntry, ItemType, OpenItem, PaymentDetail, Quantity, SettlementRequest,
};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub item_type: ItemType,
    pub name: String,
    pub unit_price: Amount,
    pub date: DateKey,
}

/// Anything that contributes some units to a group.
pub trait Groupable {
    fn group_key(&self) -> GroupKey;

    fn quantity(&self) -> Quantity;
}

impl Groupable for OpenItem {
    fn group_key(&self) -> GroupKey {
        GroupKey {
            item_type: self.item_type,
            name: self.name.clone(),
            unit_price: self.unit_price,
            date: self.date_added.into(),
        }
    }

    fn quantity(&self) -> Quantity {
        1
    }
}

impl Groupable for PaymentDetail {
    fn group_key(&self) -> GroupKey {
        GroupKey {
            item_type: self.item_type,
            name: self.name.clone(),
            unit_price: self.price,
            date: self.date_added.into(),
        }
    }

    fn quantity(&self) -> Quantity {
        self.quantity
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemGroup {
    pub name: String,
    pub item_type: ItemType,
    pub count: Quantity,
    pub unit_price: Amount,
    pub total_price: Amount,
    pub date_added: DateKey,
}

impl ItemGroup {
    fn new(key: GroupKey, count: Quantity) -> ItemGroup {
        ItemGroup {
            total_price: key.unit_price.saturating_mul(Amount::from(count)),
            name: key.name,
            item_type: key.item_type,
            count,
            unit_price: key.unit_price,
            date_added: key.date,
        }
    }

    /// Build the request that selects *quantity* units of this group.
    ///
    /// The quantity is capped at the size of the group.
    pub fn request(&self, quantity: Quantity) -> SettlementRequest {
        SettlementRequest::new(
            &self.name,
            self.item_type,
            self.unit_price,
            quantity.min(self.count),
            Some(self.date_added),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupedItems {
    pub drinks: Vec<ItemGroup>,
    pub food: Vec<ItemGroup>,
}

impl GroupedItems {
    pub fn is_empty(&self) -> bool {
        self.drinks.is_empty() && self.food.is_empty()
    }

    pub fn total(&self) -> Amount {
        self.drinks
            .iter()
            .chain(self.food.iter())
            .map(|g| g.total_price)
            .sum()
    }

    /// The group shown at position *number*, counting from 1 over drinks
    /// first and then food.
    pub fn get(&self, number: usize) -> Option<&ItemGroup> {
        self.drinks.iter().chain(self.food.iter()).nth(number.checked_sub(1)?)
    }

    fn push(&mut self, group: ItemGroup) {
        match group.item_type {
            ItemType::Drink => self.drinks.push(group),
            ItemType::Food => self.food.push(group),
        }
    }
}

/// All groups acquired on the same day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateGroup {
    pub date: DateKey,
    pub items: GroupedItems,
}

/// Group the open items of a person, split into drinks and food.
pub fn group_open_items(items: &[OpenItem]) -> GroupedItems {
    let mut result = GroupedItems::default();
    for (key, count) in aggregate(items) {
        result.push(ItemGroup::new(key, count));
    }
    result
}

/// Group the open items of a person by acquisition day, newest first.
pub fn group_by_date(items: &[OpenItem]) -> Vec<DateGroup> {
    group_dates(items)
}

/// Group the breakdown of a history entry by acquisition day, newest first.
///
/// Entries without details yield no groups.
pub fn group_payment_details(entry: &HistoryEntry) -> Vec<DateGroup> {
    group_dates(&entry.details)
}

/// Build the breakdown stored with a settlement of *items*.
///
/// There is one detail per group, ordered by the oldest row of each group.
pub fn summarize_payment(items: &[OpenItem]) -> Vec<PaymentDetail> {
    let mut sorted: Vec<_> = items.iter().collect();
    sorted.sort_by_key(|item| item.id);

    let mut details: Vec<PaymentDetail> = Vec::new();
    let mut positions: HashMap<GroupKey, usize> = HashMap::new();
    for item in sorted {
        match positions.entry(item.group_key()) {
            Entry::Occupied(e) => details[*e.get()].quantity += 1,
            Entry::Vacant(e) => {
                e.insert(details.len());
                details.push(PaymentDetail {
                    name: item.name.clone(),
                    price: item.unit_price,
                    quantity: 1,
                    item_type: item.item_type,
                    date_added: item.date_added,
                });
            }
        }
    }
    details
}

/// Order dates from newest to oldest. `Unknown` always goes last.
pub fn newest_first(a: &DateKey, b: &DateKey) -> Ordering {
    match (a, b) {
        (DateKey::Unknown, DateKey::Unknown) => Ordering::Equal,
        (DateKey::Unknown, DateKey::Known(_)) => Ordering::Greater,
        (DateKey::Known(_), DateKey::Unknown) => Ordering::Less,
        (DateKey::Known(a), DateKey::Known(b)) => b.cmp(a),
    }
}

fn aggregate<T: Groupable>(elements: &[T]) -> BTreeMap<GroupKey, Quantity> {
    let mut groups = BTreeMap::new();
    for element in elements {
        *groups.entry(element.group_key()).or_insert(0) += element.quantity();
    }
    groups
}

fn group_dates<T: Groupable>(elements: &[T]) -> Vec<DateGroup> {
    let mut by_date: BTreeMap<DateKey, GroupedItems> = BTreeMap::new();
    for (key, count) in aggregate(elements) {
        by_date
            .entry(key.date)
            .or_default()
            .push(ItemGroup::new(key, count));
    }

    let mut result: Vec<_> = by_date
        .into_iter()
        .map(|(date, items)| DateGroup { date, items })
        .collect();
    result.sort_by(|x, y| newest_first(&x.date, &y.date));
    result
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).expect("valid date")
    }

    fn open_item(
        id: i64,
        name: &str,
        item_type: ItemType,
        unit_price: Amount,
        date_added: Option<NaiveDate>,
    ) -> OpenItem {
        OpenItem {
            id,
            person_id: 1,
            source_item_id: 1,
            name: name.to_string(),
            unit_price,
            item_type,
            date_added,
        }
    }

    fn sample() -> Vec<OpenItem> {
        vec![
            open_item(1, "Bier", ItemType::Drink, 250, Some(day(1))),
            open_item(2, "Bier", ItemType::Drink, 250, Some(day(1))),
            open_item(3, "Burger", ItemType::Food, 500, Some(day(2))),
            open_item(4, "Bier", ItemType::Drink, 250, Some(day(2))),
            open_item(5, "Cola", ItemType::Drink, 200, None),
        ]
    }

    #[test]
    fn test_group_open_items() {
        let grouped = group_open_items(&sample());

        assert_eq!(grouped.drinks.len(), 3);
        assert_eq!(grouped.food.len(), 1);
        assert_eq!(grouped.total(), 1450);

        let beers: Vec<_> = grouped.drinks.iter().filter(|g| g.name == "Bier").collect();
        assert_eq!(beers.len(), 2);
        let first_day = beers
            .iter()
            .find(|g| g.date_added == DateKey::Known(day(1)))
            .expect("group for the first day");
        assert_eq!(first_day.count, 2);
        assert_eq!(first_day.total_price, 500);

        assert_eq!(grouped.food[0].name, "Burger");
        assert_eq!(grouped.food[0].count, 1);

        assert_eq!(grouped.get(1), grouped.drinks.first());
        assert_eq!(grouped.get(4), grouped.food.first());
        assert_eq!(grouped.get(0), None);
        assert_eq!(grouped.get(5), None);
        assert!(!grouped.is_empty());
        assert!(group_open_items(&[]).is_empty());
    }

    #[test]
    fn test_grouping_is_pure_and_order_independent() {
        let items = sample();
        let mut reversed = items.clone();
        reversed.reverse();

        assert_eq!(group_open_items(&items), group_open_items(&items));
        assert_eq!(group_open_items(&items), group_open_items(&reversed));
        assert_eq!(group_by_date(&items), group_by_date(&reversed));
    }

    #[test]
    fn test_names_are_not_split() {
        let items = vec![
            open_item(1, "Radler-Zitrone", ItemType::Drink, 300, Some(day(1))),
            open_item(2, "Radler", ItemType::Drink, 300, Some(day(1))),
        ];
        let grouped = group_open_items(&items);
        assert_eq!(grouped.drinks.len(), 2);
        assert!(grouped.drinks.iter().any(|g| g.name == "Radler-Zitrone"));
    }

    #[test]
    fn test_group_by_date_newest_first_unknown_last() {
        let dates: Vec<_> = group_by_date(&sample()).iter().map(|g| g.date).collect();
        assert_eq!(
            dates,
            vec![DateKey::Known(day(2)), DateKey::Known(day(1)), DateKey::Unknown]
        );

        let by_date = group_by_date(&sample());
        assert_eq!(by_date[0].items.drinks.len(), 1);
        assert_eq!(by_date[0].items.food.len(), 1);
        assert_eq!(by_date[1].items.drinks[0].count, 2);
    }

    #[test]
    fn test_newest_first() {
        let mut dates = vec![
            DateKey::Unknown,
            DateKey::Known(day(1)),
            DateKey::Known(day(3)),
            DateKey::Unknown,
            DateKey::Known(day(2)),
        ];
        dates.sort_by(newest_first);
        assert_eq!(
            dates,
            vec![
                DateKey::Known(day(3)),
                DateKey::Known(day(2)),
                DateKey::Known(day(1)),
                DateKey::Unknown,
                DateKey::Unknown,
            ]
        );
    }

    #[test]
    fn test_summarize_payment() {
        let details = summarize_payment(&sample());
        assert_eq!(details.len(), 4);
        assert_eq!(details[0].name, "Bier");
        assert_eq!(details[0].quantity, 2);
        assert_eq!(details[0].date_added, Some(day(1)));
        assert_eq!(details[1].name, "Burger");
        assert_eq!(details[2].name, "Bier");
        assert_eq!(details[2].date_added, Some(day(2)));
        assert_eq!(details[3].date_added, None);

        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(summarize_payment(&reversed), details);
    }

    #[test]
    fn test_group_payment_details() {
        let entry = HistoryEntry {
            id: 1,
            person_id: 1,
            item_id: None,
            paid: 1450,
            timestamp_millis: 0,
            item_name: None,
            item_type: None,
            details: summarize_payment(&sample()),
        };

        let groups = group_payment_details(&entry);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[2].date, DateKey::Unknown);
        let total: Amount = groups.iter().map(|g| g.items.total()).sum();
        assert_eq!(total, 1450);

        let legacy = HistoryEntry {
            details: vec![],
            ..entry
        };
        assert!(group_payment_details(&legacy).is_empty());
    }

    #[test]
    fn test_request_from_group() {
        let grouped = group_open_items(&sample());
        let burger = &grouped.food[0];

        let request = burger.request(5);
        assert_eq!(request.quantity, 1);
        assert_eq!(request.unit_price, 500);
        assert_eq!(request.item_type, ItemType::Food);
        assert_eq!(request.date_added, Some(DateKey::Known(day(2))));
    }
}
