//! Parse the commands typed in the shell.
//!
//! Names always come last and run until the end of the line, so they can
//! contain spaces and dashes. A settlement can be restricted to one day by
//! ending the line with `@YYYY-MM-DD` (or `@unknown` for undated items).

mod amount;

pub use amount::parse_amount;

use chrono::NaiveDate;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag_no_case},
    character::complete::{alpha1, char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, rest, verify},
    error::{Error, ErrorKind},
    sequence::{preceded, terminated, tuple},
    IResult,
};

use crate::{
    error::InputError,
    types::{Amount, DateKey, ItemType, NewItem, Quantity, SettlementRequest},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Persons,
    AddPerson(String),
    RemovePerson(i64),
    RenamePerson(i64, String),
    Items,
    AddItem(NewItem),
    SetPrice(i64, Amount),
    RemoveItem(i64),
    Add {
        person_id: i64,
        item_id: i64,
        quantity: Quantity,
    },
    Tab(i64),
    Groups(i64),
    PayGroup {
        person_id: i64,
        group: usize,
        quantity: Quantity,
    },
    CancelGroup {
        person_id: i64,
        group: usize,
        quantity: Quantity,
    },
    Pay(i64, SettlementRequest),
    Cancel(i64, SettlementRequest),
    PayAll(i64),
    History(i64),
    ClearHistory(i64),
    FixDebt(i64),
}

/// Keyword, arguments and description of every command.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("help", "", "shows this message"),
    ("quit", "", "leaves the shell"),
    ("persons", "", "lists all persons and their debt"),
    ("person", "<name>", "creates a person"),
    ("rmperson", "<person-id>", "deletes a person with open items and history"),
    ("rename", "<person-id> <name>", "renames a person"),
    ("items", "", "lists the catalog"),
    (
        "item",
        "<drink|food> <price> <category> <name>",
        "adds an item to the catalog",
    ),
    ("setprice", "<item-id> <price>", "changes the price of an item"),
    ("rmitem", "<item-id>", "deletes an item from the catalog"),
    ("add", "<person-id> <item-id> [qty]", "puts items on a tab"),
    ("tab", "<person-id>", "shows the open items of a person"),
    (
        "groups",
        "<person-id>",
        "shows the numbered groups of open items, drinks first",
    ),
    (
        "paygroup",
        "<person-id> <group-no> [qty]",
        "pays units of a group listed by `groups`",
    ),
    (
        "cancelgroup",
        "<person-id> <group-no> [qty]",
        "cancels units of a group listed by `groups`",
    ),
    (
        "pay",
        "<person-id> <qty> <drink|food> <price> <name> [@date]",
        "pays open items, oldest first",
    ),
    (
        "cancel",
        "<person-id> <qty> <drink|food> <price> <name> [@date]",
        "removes open items without recording a payment",
    ),
    ("payall", "<person-id>", "pays everything a person owes"),
    ("history", "<person-id>", "shows the payments of a person"),
    ("clearhistory", "<person-id>", "deletes the payments of a person"),
    ("fixdebt", "<person-id>", "recomputes the debt from the open items"),
];

pub fn parse_command(line: &str) -> Result<Command, InputError> {
    let line = line.trim();
    let (keyword, args) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    let keyword = keyword.to_lowercase();

    let syntax_error = |_| InputError::invalid_syntax(&keyword, &usage(&keyword));

    let parsed = match keyword.as_str() {
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "persons" => Ok(Command::Persons),
        "items" => Ok(Command::Items),
        "person" => name_only(args).map(|n| Command::AddPerson(n.to_string())),
        "rmperson" => id_only(args).map(Command::RemovePerson),
        "rename" => all_consuming(tuple((id, name)))(args)
            .map(|(_, (id, name))| Command::RenamePerson(id, name.to_string())),
        "item" => all_consuming(tuple((item_type, amount, word, name)))(args).map(
            |(_, (item_type, price, category, name))| {
                Command::AddItem(NewItem {
                    name: name.to_string(),
                    item_type,
                    price,
                    category: category.to_string(),
                    info: None,
                })
            },
        ),
        "setprice" => all_consuming(terminated(tuple((id, amount)), multispace0))(args)
            .map(|(_, (id, price))| Command::SetPrice(id, price)),
        "rmitem" => id_only(args).map(Command::RemoveItem),
        "add" => all_consuming(terminated(
            tuple((id, id, opt(quantity))),
            multispace0,
        ))(args)
        .map(|(_, (person_id, item_id, quantity))| Command::Add {
            person_id,
            item_id,
            quantity: quantity.unwrap_or(1),
        }),
        "tab" => id_only(args).map(Command::Tab),
        "groups" => id_only(args).map(Command::Groups),
        "paygroup" => group_selection(args).map(|(person_id, group, quantity)| {
            Command::PayGroup {
                person_id,
                group,
                quantity,
            }
        }),
        "cancelgroup" => group_selection(args).map(|(person_id, group, quantity)| {
            Command::CancelGroup {
                person_id,
                group,
                quantity,
            }
        }),
        "pay" => selection(args).map(|(_, (id, request))| Command::Pay(id, request)),
        "cancel" => selection(args).map(|(_, (id, request))| Command::Cancel(id, request)),
        "payall" => id_only(args).map(Command::PayAll),
        "history" => id_only(args).map(Command::History),
        "clearhistory" => id_only(args).map(Command::ClearHistory),
        "fixdebt" => id_only(args).map(Command::FixDebt),
        _ => return Err(InputError::unknown_command(keyword.clone())),
    };

    parsed.map_err(syntax_error)
}

fn usage(keyword: &str) -> String {
    COMMANDS
        .iter()
        .find(|(k, _, _)| *k == keyword)
        .map(|(k, args, _)| format!("{k} {args}").trim_end().to_string())
        .unwrap_or_default()
}

fn id_only(s: &str) -> Result<i64, nom::Err<Error<&str>>> {
    all_consuming(terminated(id, multispace0))(s).map(|(_, id)| id)
}

fn name_only(s: &str) -> Result<&str, nom::Err<Error<&str>>> {
    all_consuming(name)(s).map(|(_, name)| name)
}

/// Person, group number and an optional quantity defaulting to 1.
fn group_selection(s: &str) -> Result<(i64, usize, Quantity), nom::Err<Error<&str>>> {
    all_consuming(terminated(
        tuple((id, group_number, opt(quantity))),
        multispace0,
    ))(s)
    .map(|(_, (person_id, group, quantity))| (person_id, group, quantity.unwrap_or(1)))
}

fn group_number(s: &str) -> IResult<&str, usize> {
    preceded(
        multispace0,
        verify(map_res(digit1, |d: &str| d.parse::<usize>()), |n: &usize| *n > 0),
    )(s)
}

fn id(s: &str) -> IResult<&str, i64> {
    preceded(multispace0, map_res(digit1, |d: &str| d.parse::<i64>()))(s)
}

/// The most units a single command can add, pay or cancel.
pub const MAX_QUANTITY: Quantity = 1000;

fn quantity(s: &str) -> IResult<&str, Quantity> {
    preceded(
        multispace0,
        verify(map_res(digit1, |d: &str| d.parse::<Quantity>()), |q: &Quantity| {
            (1..=MAX_QUANTITY).contains(q)
        }),
    )(s)
}

fn item_type(s: &str) -> IResult<&str, ItemType> {
    preceded(multispace0, map_res(alpha1, |t: &str| t.parse::<ItemType>()))(s)
}

fn amount(s: &str) -> IResult<&str, Amount> {
    preceded(multispace0, parse_amount)(s)
}

fn word(s: &str) -> IResult<&str, &str> {
    preceded(multispace0, is_not(" \t\r\n"))(s)
}

/// The rest of the line, trimmed. Must not be empty.
fn name(s: &str) -> IResult<&str, &str> {
    map(
        preceded(multispace0, verify(rest, |n: &str| !n.trim().is_empty())),
        str::trim_end,
    )(s)
}

fn date_filter(s: &str) -> IResult<&str, DateKey> {
    preceded(
        char('@'),
        alt((
            map(tag_no_case("unknown"), |_| DateKey::Unknown),
            map_res(
                recognize(tuple((digit1, char('-'), digit1, char('-'), digit1))),
                |d: &str| NaiveDate::parse_from_str(d, "%Y-%m-%d").map(DateKey::Known),
            ),
        )),
    )(s)
}

/// A name optionally followed by a date filter.
fn name_and_date(s: &str) -> IResult<&str, (&str, Option<DateKey>)> {
    let (s, text) = name(s)?;

    let (name, last) = text.rsplit_once(char::is_whitespace).unwrap_or(("", text));
    if !last.starts_with('@') {
        return Ok((s, (text, None)));
    }

    let (_, date) = all_consuming(date_filter)(last)?;
    let name = name.trim_end();
    if name.is_empty() {
        return Err(nom::Err::Error(Error::new(text, ErrorKind::Verify)));
    }
    Ok((s, (name, Some(date))))
}

fn selection(s: &str) -> IResult<&str, (i64, SettlementRequest)> {
    let (s, (person_id, quantity, item_type, unit_price)) =
        tuple((id, quantity, item_type, amount))(s)?;
    let (s, (name, date_added)) = all_consuming(name_and_date)(s)?;

    Ok((
        s,
        (
            person_id,
            SettlementRequest::new(name, item_type, unit_price, quantity, date_added),
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() -> anyhow::Result<()> {
        assert_eq!(parse_command(" HELP ")?, Command::Help);
        assert_eq!(parse_command("exit")?, Command::Quit);
        assert_eq!(parse_command("tab 3")?, Command::Tab(3));
        assert_eq!(parse_command("payall  12 ")?, Command::PayAll(12));
        assert_eq!(
            parse_command("person Max  Mustermann ")?,
            Command::AddPerson("Max  Mustermann".to_string())
        );
        assert_eq!(
            parse_command("rename 2 Anna-Lena")?,
            Command::RenamePerson(2, "Anna-Lena".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_parse_add() -> anyhow::Result<()> {
        assert_eq!(
            parse_command("add 1 4")?,
            Command::Add {
                person_id: 1,
                item_id: 4,
                quantity: 1
            }
        );
        assert_eq!(
            parse_command("add 1 4 3")?,
            Command::Add {
                person_id: 1,
                item_id: 4,
                quantity: 3
            }
        );
        assert!(parse_command("add 1 4 0").is_err());
        assert!(parse_command("add 1 4 1001").is_err());
        assert!(parse_command("add 1 4 4294967296").is_err());
        assert!(parse_command("add 1").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_group_commands() -> anyhow::Result<()> {
        assert_eq!(parse_command("groups 2")?, Command::Groups(2));
        assert_eq!(
            parse_command("paygroup 2 3")?,
            Command::PayGroup {
                person_id: 2,
                group: 3,
                quantity: 1
            }
        );
        assert_eq!(
            parse_command("cancelgroup 2 1 4")?,
            Command::CancelGroup {
                person_id: 2,
                group: 1,
                quantity: 4
            }
        );
        assert!(parse_command("paygroup 2 0").is_err());
        assert!(parse_command("paygroup 2").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_item() -> anyhow::Result<()> {
        assert_eq!(
            parse_command("item drink 2,50 Bier Radler - Zitrone")?,
            Command::AddItem(NewItem {
                name: "Radler - Zitrone".to_string(),
                item_type: ItemType::Drink,
                price: 250,
                category: "Bier".to_string(),
                info: None,
            })
        );
        assert_eq!(parse_command("setprice 3 3,20")?, Command::SetPrice(3, 320));
        assert!(parse_command("item snack 2 Misc Chips").is_err());
        assert!(parse_command("item food 2 Misc").is_err());
        assert!(parse_command("item drink 92233720368547757 Bier X").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_pay() -> anyhow::Result<()> {
        assert_eq!(
            parse_command("pay 1 2 drink 2.5 Radler-Zitrone")?,
            Command::Pay(
                1,
                SettlementRequest::new("Radler-Zitrone", ItemType::Drink, 250, 2, None)
            )
        );

        let date = NaiveDate::from_ymd_opt(2024, 5, 17).expect("valid date");
        assert_eq!(
            parse_command("cancel 1 1 food 4 Pommes rot-weiß @2024-05-17")?,
            Command::Cancel(
                1,
                SettlementRequest::new(
                    "Pommes rot-weiß",
                    ItemType::Food,
                    400,
                    1,
                    Some(DateKey::Known(date))
                )
            )
        );

        assert_eq!(
            parse_command("pay 1 1 drink 2 Cola @unknown")?,
            Command::Pay(
                1,
                SettlementRequest::new("Cola", ItemType::Drink, 200, 1, Some(DateKey::Unknown))
            )
        );
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_command("dance"),
            Err(InputError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_command("tab abc"),
            Err(InputError::InvalidSyntax(_, _))
        ));
        assert!(parse_command("pay 1 1 drink 2").is_err());
        assert!(parse_command("pay 1 1 drink 2 @2024-05-17").is_err());
        assert!(parse_command("pay 1 1 drink 2 Bier @yesterday").is_err());
        assert!(parse_command("pay 1 1 drink 2 Bier @2024-13-01").is_err());
        assert!(parse_command("person   ").is_err());
    }

    #[test]
    fn test_usage() {
        assert_eq!(usage("tab"), "tab <person-id>");
        assert_eq!(usage("help"), "help");
    }
}
