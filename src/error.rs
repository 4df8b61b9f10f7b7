use anyhow::anyhow;
use thiserror::Error;

/// A failure of the underlying store.
#[derive(Error, Debug)]
#[error("{message}: {cause:#}")]
pub struct DatabaseError {
    message: String,
    cause: anyhow::Error,
}

impl DatabaseError {
    pub fn new<T: AsRef<str>>(message: T, cause: anyhow::Error) -> Self {
        DatabaseError {
            message: message.as_ref().to_string(),
            cause,
        }
    }

    /// Data changed between a read and a write of the same transaction.
    pub fn concurrency<T: AsRef<str>>(message: T) -> Self {
        DatabaseError::new(message, anyhow!("concurrent modification detected"))
    }
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("unknown command `{0}`; type `help` for the list of commands")]
    UnknownCommand(String),

    #[error("invalid syntax for `{0}`; usage: {1}")]
    InvalidSyntax(String, String),

    #[error("invalid item type `{0}`: expected `drink` or `food`")]
    InvalidItemType(String),

    #[error("invalid amount `{0}`: expected a positive value such as 2,50")]
    InvalidAmount(String),
}

impl InputError {
    pub fn unknown_command(command: String) -> Self {
        InputError::UnknownCommand(command)
    }

    pub fn invalid_syntax(command: &str, usage: &str) -> Self {
        InputError::InvalidSyntax(command.to_string(), usage.to_string())
    }

    pub fn invalid_item_type(item_type: String) -> Self {
        InputError::InvalidItemType(item_type)
    }

    pub fn invalid_amount(amount: String) -> Self {
        InputError::InvalidAmount(amount)
    }
}
