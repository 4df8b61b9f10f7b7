//! The interactive front-end: read a command per line, run it against the
//! ledger, print the outcome.

use anyhow::Context;
use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    database::Database,
    formatter::{
        format_amount, format_cancellation, format_groups, format_help, format_history,
        format_history_entry, format_items, format_person, format_persons, format_tab,
    },
    ledger::Ledger,
    parser::{parse_command, Command},
    types::{Amount, NewItem, Quantity},
};

const PROMPT: &str = "> ";

/// What the shell does after a line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Print(String),
    Quit,
}

/// Run the shell until *input* is exhausted or the user quits.
pub async fn run<D, R, W>(ledger: &Ledger<D>, input: R, mut output: W) -> anyhow::Result<()>
where
    D: Database,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let line = match lines.next_line().await.context("cannot read input")? {
            Some(line) => line,
            None => break,
        };

        match handle_line(ledger, &line).await {
            Outcome::Print(text) if text.is_empty() => {}
            Outcome::Print(text) => {
                output.write_all(text.as_bytes()).await?;
                if !text.ends_with('\n') {
                    output.write_all(b"\n").await?;
                }
            }
            Outcome::Quit => break,
        }
    }

    info!("Shell closed");
    Ok(())
}

/// Parse and execute one line. Errors become the text to print.
pub async fn handle_line<D: Database>(ledger: &Ledger<D>, line: &str) -> Outcome {
    if line.trim().is_empty() {
        return Outcome::Print(String::new());
    }

    let command = match parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            debug!("Rejected input `{}`: {e}", line.trim());
            return Outcome::Print(e.to_string());
        }
    };

    let result = match command {
        Command::Quit => return Outcome::Quit,
        Command::Help => Ok(format_help()),
        Command::Persons => handle_persons(ledger).await,
        Command::AddPerson(name) => handle_add_person(ledger, &name).await,
        Command::RemovePerson(id) => handle_remove_person(ledger, id).await,
        Command::RenamePerson(id, name) => handle_rename_person(ledger, id, &name).await,
        Command::Items => handle_items(ledger).await,
        Command::AddItem(item) => handle_add_item(ledger, item).await,
        Command::SetPrice(id, price) => handle_set_price(ledger, id, price).await,
        Command::RemoveItem(id) => handle_remove_item(ledger, id).await,
        Command::Add {
            person_id,
            item_id,
            quantity,
        } => handle_add(ledger, person_id, item_id, quantity).await,
        Command::Tab(id) => handle_tab(ledger, id).await,
        Command::Groups(id) => handle_groups(ledger, id).await,
        Command::PayGroup {
            person_id,
            group,
            quantity,
        } => handle_pay_group(ledger, person_id, group, quantity).await,
        Command::CancelGroup {
            person_id,
            group,
            quantity,
        } => handle_cancel_group(ledger, person_id, group, quantity).await,
        Command::Pay(id, request) => match ledger.pay(id, request).await {
            Ok(Some(entry)) => Ok(format!("Paid:\n{}", format_history_entry(&entry))),
            Ok(None) => Ok("Nothing matched, nothing was paid.".to_string()),
            Err(e) => Err(e),
        },
        Command::Cancel(id, request) => ledger
            .cancel(id, request)
            .await
            .map(|c| format_cancellation(&c)),
        Command::PayAll(id) => match ledger.pay_all(id).await {
            Ok(Some(entry)) => Ok(format!("Paid:\n{}", format_history_entry(&entry))),
            Ok(None) => Ok("Nothing to pay.".to_string()),
            Err(e) => Err(e),
        },
        Command::History(id) => ledger.history(id).await.map(|h| format_history(&h)),
        Command::ClearHistory(id) => ledger
            .clear_history(id)
            .await
            .map(|n| format!("Deleted {n} history entries.")),
        Command::FixDebt(id) => handle_fix_debt(ledger, id).await,
    };

    // The ledger already logged the failure.
    match result {
        Ok(text) => Outcome::Print(text),
        Err(e) => Outcome::Print(format!("Error: {e:#}")),
    }
}

async fn handle_persons<D: Database>(ledger: &Ledger<D>) -> anyhow::Result<String> {
    Ok(format_persons(&ledger.list_persons().await?))
}

async fn handle_add_person<D: Database>(ledger: &Ledger<D>, name: &str) -> anyhow::Result<String> {
    let person = ledger.create_person(name).await?;
    info!("Created person {} ({})", person.id, person.name);
    Ok(format!("Created {}", format_person(&person)))
}

async fn handle_remove_person<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
) -> anyhow::Result<String> {
    if ledger.delete_person(person_id).await? {
        Ok(format!("Deleted person {person_id}."))
    } else {
        Ok(not_found("person", person_id))
    }
}

async fn handle_rename_person<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
    name: &str,
) -> anyhow::Result<String> {
    if ledger.rename_person(person_id, name).await? {
        Ok(format!("Person {person_id} is now called {name}."))
    } else {
        Ok(not_found("person", person_id))
    }
}

async fn handle_items<D: Database>(ledger: &Ledger<D>) -> anyhow::Result<String> {
    Ok(format_items(&ledger.list_items().await?))
}

async fn handle_add_item<D: Database>(ledger: &Ledger<D>, item: NewItem) -> anyhow::Result<String> {
    let item = ledger.create_item(item).await?;
    info!("Created item {} ({})", item.id, item.name);
    Ok(format!(
        "Created item {}: {} {} at {}",
        item.id,
        item.item_type,
        item.name,
        format_amount(item.price)
    ))
}

/// Changes the catalog only; items already on a tab keep their price.
async fn handle_set_price<D: Database>(
    ledger: &Ledger<D>,
    item_id: i64,
    price: Amount,
) -> anyhow::Result<String> {
    let mut item = match ledger.get_item(item_id).await? {
        Some(item) => item,
        None => return Ok(not_found("item", item_id)),
    };

    item.price = price;
    if ledger.update_item(item).await? {
        Ok(format!("Item {item_id} now costs {}.", format_amount(price)))
    } else {
        Ok(not_found("item", item_id))
    }
}

async fn handle_remove_item<D: Database>(
    ledger: &Ledger<D>,
    item_id: i64,
) -> anyhow::Result<String> {
    if ledger.delete_item(item_id).await? {
        Ok(format!("Deleted item {item_id}."))
    } else {
        Ok(not_found("item", item_id))
    }
}

async fn handle_add<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
    item_id: i64,
    quantity: Quantity,
) -> anyhow::Result<String> {
    let added = ledger
        .add_catalog_items(person_id, item_id, quantity)
        .await?;
    if added == 0 {
        return Ok(format!(
            "Nothing added: check person {person_id} and item {item_id}."
        ));
    }

    match ledger.get_person(person_id).await? {
        Some(person) => Ok(format!("Added {added} item(s). {}", format_person(&person))),
        None => Ok(format!("Added {added} item(s).")),
    }
}

async fn handle_tab<D: Database>(ledger: &Ledger<D>, person_id: i64) -> anyhow::Result<String> {
    match ledger.get_person(person_id).await? {
        Some(person) => Ok(format_tab(&person, &ledger.tab(person_id).await?)),
        None => Ok(not_found("person", person_id)),
    }
}

async fn handle_groups<D: Database>(ledger: &Ledger<D>, person_id: i64) -> anyhow::Result<String> {
    match ledger.get_person(person_id).await? {
        Some(person) => Ok(format_groups(
            &person,
            &ledger.grouped_open_items(person_id).await?,
        )),
        None => Ok(not_found("person", person_id)),
    }
}

async fn handle_pay_group<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
    number: usize,
    quantity: Quantity,
) -> anyhow::Result<String> {
    let groups = ledger.grouped_open_items(person_id).await?;
    let group = match groups.get(number) {
        Some(group) => group,
        None => return Ok(no_group(person_id, number)),
    };

    match ledger.pay_group(person_id, group, quantity).await? {
        Some(entry) => Ok(format!("Paid:\n{}", format_history_entry(&entry))),
        None => Ok("Nothing matched, nothing was paid.".to_string()),
    }
}

async fn handle_cancel_group<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
    number: usize,
    quantity: Quantity,
) -> anyhow::Result<String> {
    let groups = ledger.grouped_open_items(person_id).await?;
    match groups.get(number) {
        Some(group) => Ok(format_cancellation(
            &ledger.cancel_group(person_id, group, quantity).await?,
        )),
        None => Ok(no_group(person_id, number)),
    }
}

fn no_group(person_id: i64, number: usize) -> String {
    warn!("Person {person_id} has no group {number}");
    format!("No group {number} on the tab of person {person_id}; see `groups {person_id}`.")
}

async fn handle_fix_debt<D: Database>(
    ledger: &Ledger<D>,
    person_id: i64,
) -> anyhow::Result<String> {
    match ledger.recalculate_debt(person_id).await? {
        Some(debt) => Ok(format!(
            "Debt of person {person_id} recomputed: {}",
            format_amount(debt)
        )),
        None => Ok(not_found("person", person_id)),
    }
}

fn not_found(what: &str, id: i64) -> String {
    warn!("No {what} with ID {id}");
    format!("No {what} with ID {id}.")
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;
    use crate::database::sqlite::SqliteDatabase;

    fn ledger() -> anyhow::Result<Ledger<SqliteDatabase>> {
        Ok(Ledger::new(SqliteDatabase::new_in_memory()?))
    }

    async fn text(ledger: &Ledger<SqliteDatabase>, line: &str) -> String {
        match handle_line(ledger, line).await {
            Outcome::Print(text) => text,
            Outcome::Quit => panic!("unexpected quit on `{line}`"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session() -> anyhow::Result<()> {
        let ledger = ledger()?;

        assert_eq!(text(&ledger, "person Max").await, "Created 1: Max owes 0.00");
        assert_eq!(
            text(&ledger, "item drink 2,50 Bier Helles").await,
            "Created item 1: drink Helles at 2.50"
        );
        assert_eq!(
            text(&ledger, "add 1 1 3").await,
            "Added 3 item(s). 1: Max owes 7.50"
        );

        assert_eq!(
            text(&ledger, "setprice 1 3").await,
            "Item 1 now costs 3.00."
        );

        let paid = text(&ledger, "pay 1 2 drink 2.50 Helles").await;
        assert!(paid.starts_with("Paid:\n"));
        assert!(paid.contains("5.00  drink Helles"));

        assert_eq!(
            text(&ledger, "cancel 1 5 drink 2.50 Helles").await,
            "Cancelled 1 item(s) worth 2.50."
        );
        assert_eq!(text(&ledger, "payall 1").await, "Nothing to pay.");
        assert_eq!(
            text(&ledger, "clearhistory 1").await,
            "Deleted 1 history entries."
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_commands() -> anyhow::Result<()> {
        let ledger = ledger()?;
        text(&ledger, "person Max").await;
        text(&ledger, "item food 4 Snacks Pommes rot-weiß").await;
        text(&ledger, "item drink 2,50 Bier Helles").await;
        text(&ledger, "add 1 1 2").await;
        text(&ledger, "add 1 2 3").await;

        let groups = text(&ledger, "groups 1").await;
        assert!(groups.contains("  1.     3 x drink Helles @ 2.50 = 7.50"));
        assert!(groups.contains("  2.     2 x food  Pommes rot-weiß @ 4.00 = 8.00"));

        let paid = text(&ledger, "paygroup 1 1 2").await;
        assert!(paid.contains("5.00  drink Helles"));
        assert_eq!(
            text(&ledger, "cancelgroup 1 2 5").await,
            "Cancelled 2 item(s) worth 8.00."
        );
        assert_eq!(
            text(&ledger, "paygroup 1 2").await,
            "No group 2 on the tab of person 1; see `groups 1`."
        );
        assert_eq!(
            text(&ledger, "persons").await,
            "   1  Max      2.50\n"
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_errors_are_printed() -> anyhow::Result<()> {
        let ledger = ledger()?;

        assert!(text(&ledger, "dance").await.starts_with("unknown command"));
        assert!(text(&ledger, "tab x").await.contains("usage: tab <person-id>"));
        assert_eq!(text(&ledger, "tab 9").await, "No person with ID 9.");
        assert_eq!(
            text(&ledger, "add 9 9").await,
            "Nothing added: check person 9 and item 9."
        );
        assert_eq!(text(&ledger, "fixdebt 9").await, "No person with ID 9.");
        assert_eq!(text(&ledger, "   ").await, "");
        assert_eq!(handle_line(&ledger, "quit").await, Outcome::Quit);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run() -> anyhow::Result<()> {
        let ledger = ledger()?;
        let input = BufReader::new("person Max\n\npersons\nquit\npersons\n".as_bytes());
        let mut output = Vec::new();

        run(&ledger, input, &mut output).await?;

        let output = String::from_utf8(output)?;
        assert_eq!(
            output,
            "> Created 1: Max owes 0.00\n> >    1  Max      0.00\n> "
        );
        Ok(())
    }
}
