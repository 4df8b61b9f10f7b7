//! Produce the strings printed by the shell.

use chrono::Local;

use crate::{
    grouping::{group_payment_details, DateGroup, GroupedItems, ItemGroup},
    parser::COMMANDS,
    types::{Amount, Cancellation, HistoryEntry, Item, Person},
};

const AMOUNT_TO_FLOAT_DIVISOR: f64 = 100.0;
const NOTHING_TO_SHOW: &str = "Nothing to show!";

pub fn format_amount(amount: Amount) -> String {
    let amount = amount as f64 / AMOUNT_TO_FLOAT_DIVISOR;
    format!("{:.2}", amount)
}

pub fn format_help() -> String {
    let width = COMMANDS
        .iter()
        .map(|(k, args, _)| k.len() + args.len() + 1)
        .max()
        .unwrap_or(0);

    COMMANDS
        .iter()
        .map(|(k, args, description)| {
            let usage = format!("{k} {args}");
            format!("{usage:width$}  {description}")
        })
        .fold(String::new(), |a, b| a + &b + "\n")
}

pub fn format_persons(persons: &[Person]) -> String {
    if persons.is_empty() {
        return NOTHING_TO_SHOW.to_string();
    }

    let width = persons.iter().map(|p| p.name.chars().count()).max().unwrap_or(0);
    persons
        .iter()
        .map(|p| {
            format!(
                "{:>4}  {:width$}  {:>8}",
                p.id,
                p.name,
                format_amount(p.total_debt)
            )
        })
        .fold(String::new(), |a, b| a + &b + "\n")
}

pub fn format_person(person: &Person) -> String {
    format!(
        "{}: {} owes {}",
        person.id,
        person.name,
        format_amount(person.total_debt)
    )
}

pub fn format_items(items: &[Item]) -> String {
    if items.is_empty() {
        return NOTHING_TO_SHOW.to_string();
    }

    items
        .iter()
        .map(format_item)
        .fold(String::new(), |a, b| a + &b + "\n")
}

pub fn format_item(item: &Item) -> String {
    let result = format!(
        "{:>4}  {:<5}  {:>7}  {} / {}",
        item.id,
        item.item_type,
        format_amount(item.price),
        item.category,
        item.name
    );

    match &item.info {
        Some(info) => format!("{result} ({info})"),
        None => result,
    }
}

/// The tab of a person, one block per day.
pub fn format_tab(person: &Person, days: &[DateGroup]) -> String {
    let mut result = format_person(person) + "\n";
    if days.is_empty() {
        return result + NOTHING_TO_SHOW + "\n";
    }

    for day in days {
        result += &format_day(day);
    }
    result
}

/// The open items of a person as numbered groups, drinks first. The numbers
/// are the ones accepted by `paygroup` and `cancelgroup`.
pub fn format_groups(person: &Person, groups: &GroupedItems) -> String {
    let mut result = format_person(person) + "\n";
    if groups.is_empty() {
        return result + NOTHING_TO_SHOW + "\n";
    }

    for (number, group) in groups.drinks.iter().chain(groups.food.iter()).enumerate() {
        result += &format!("{:>3}. {} ({})\n", number + 1, format_group(group), group.date_added);
    }
    result
}

fn format_day(day: &DateGroup) -> String {
    format!(
        "{} ({})\n{}",
        day.date,
        format_amount(day.items.total()),
        format_grouped_items(&day.items)
    )
}

fn format_grouped_items(items: &GroupedItems) -> String {
    items
        .drinks
        .iter()
        .chain(items.food.iter())
        .map(format_group)
        .fold(String::new(), |a, b| a + &b + "\n")
}

fn format_group(group: &ItemGroup) -> String {
    format!(
        "  {:>3} x {:<5} {} @ {} = {}",
        group.count,
        group.item_type,
        group.name,
        format_amount(group.unit_price),
        format_amount(group.total_price)
    )
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return NOTHING_TO_SHOW.to_string();
    }

    entries
        .iter()
        .map(format_history_entry)
        .fold(String::new(), |a, b| a + &b)
}

/// One line per payment. Payments of more than one group also list what was
/// paid, grouped by day.
pub fn format_history_entry(entry: &HistoryEntry) -> String {
    let when = entry
        .paid_at()
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "????-??-?? ??:??".to_string());
    let what = match (&entry.item_name, entry.item_type) {
        (Some(name), Some(item_type)) => format!("{item_type} {name}"),
        (Some(name), None) => name.clone(),
        (None, _) => "everything".to_string(),
    };

    let mut result = format!(
        "{:>4}  {when}  {:>8}  {what}\n",
        entry.id,
        format_amount(entry.paid)
    );
    if entry.is_aggregate() || entry.details.len() > 1 {
        for day in group_payment_details(entry) {
            result += &format_day(&day);
        }
    }
    result
}

pub fn format_cancellation(cancellation: &Cancellation) -> String {
    if cancellation.removed == 0 {
        "Nothing matched, nothing was cancelled.".to_string()
    } else {
        format!(
            "Cancelled {} item(s) worth {}.",
            cancellation.removed,
            format_amount(cancellation.amount)
        )
    }
}
