//! Parse an amount of money typed by the user.

use nom::{
    character::complete::{digit1, one_of},
    combinator::{map_res, opt, recognize},
    sequence::tuple,
    IResult,
};

use crate::{error::InputError, types::Amount};

/// The largest price accepted, in minor units.
pub const MAX_AMOUNT: Amount = 1_000_000 * 100;

/// Parse a non-negative amount in euros, returning minor units.
///
/// Both `,` and `.` are accepted as decimal separator. Digits after the
/// second decimal are rounded half up. Amounts above [`MAX_AMOUNT`] are
/// rejected.
pub fn parse_amount(s: &str) -> IResult<&str, Amount> {
    map_res(amount_digits, to_minor_units)(s)
}

fn amount_digits(s: &str) -> IResult<&str, &str> {
    recognize(tuple((digit1, opt(tuple((one_of(",."), digit1))))))(s)
}

fn to_minor_units(x: &str) -> Result<Amount, InputError> {
    let invalid = || InputError::invalid_amount(x.to_string());

    let (integer_part, fractional_part) = x
        .split_once(|c| c == ',' || c == '.')
        .unwrap_or((x, ""));

    let integer: Amount = integer_part.parse().map_err(|_| invalid())?;

    let fractional_part = format!("{fractional_part:0<3}");
    let cents: Amount = fractional_part
        .get(0..2)
        .and_then(|c| c.parse().ok())
        .ok_or_else(invalid)?;
    let round_up = fractional_part.get(2..3).map_or(false, |d| d >= "5");

    integer
        .checked_mul(100)
        .and_then(|a| a.checked_add(cents + Amount::from(round_up)))
        .filter(|a| *a <= MAX_AMOUNT)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("3.45"), Ok(("", 345)));
        assert_eq!(parse_amount("3,45"), Ok(("", 345)));
        assert_eq!(parse_amount("3"), Ok(("", 300)));
        assert_eq!(parse_amount("2,5"), Ok(("", 250)));
        assert_eq!(parse_amount("0,05"), Ok(("", 5)));
        assert_eq!(parse_amount("2.50 Bier"), Ok((" Bier", 250)));
    }

    #[test]
    fn test_parse_amount_rounding() {
        assert_eq!(parse_amount("2.555"), Ok(("", 256)));
        assert_eq!(parse_amount("2.554"), Ok(("", 255)));
        assert_eq!(parse_amount("0,995"), Ok(("", 100)));
    }

    #[test]
    fn test_parse_invalid_amount() {
        assert!(parse_amount("-3").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("99999999999999999999").is_err());
        assert!(parse_amount("92233720368547757").is_err());
        assert!(parse_amount("1000000,01").is_err());
        assert_eq!(parse_amount("1000000"), Ok(("", MAX_AMOUNT)));
    }
}
