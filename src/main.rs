use anyhow::{anyhow, Context};
use log::{error, info};
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::io::{stdin, stdout, BufReader};

mod config;
mod database;
mod error;
mod formatter;
mod grouping;
mod ledger;
mod parser;
mod shell;
mod types;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_log(&config)?;

    info!("Initializing ledger...");
    let ledger = ledger::initialize(&config).await.map_err(|e| {
        error!("Cannot initialize ledger: {e:#}");
        e
    })?;

    info!("Starting shell...");
    println!("Type `help` for the list of commands.");
    shell::run(&ledger, BufReader::new(stdin()), stdout()).await
}

fn init_log(config: &Config) -> anyhow::Result<()> {
    // Roll the log file when it exceeds 10 MB.
    let size_trigger = SizeTrigger::new(10 * 1024 * 1024);

    // Keep up to 2 archived log files.
    let archive_pattern = config.log_dir.join("tally.{}.log");
    let fixed_window_roller = FixedWindowRoller::builder()
        .build(&archive_pattern.to_string_lossy(), 2)
        .map_err(|e| anyhow!("[init log] Cannot create fixed window roller: {e}"))?;

    let compound_policy =
        CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

    let rolling_file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} - {l} - {m}{n}")))
        .build(config.log_dir.join("tally.log"), Box::new(compound_policy))
        .context("[init log] Cannot create rolling file appender")?;

    let log_config = log4rs::config::Config::builder()
        .appender(Appender::builder().build("rolling_file", Box::new(rolling_file_appender)))
        .build(
            Root::builder()
                .appender("rolling_file")
                .build(config.log_level),
        )
        .context("[init log] Cannot build config")?;

    log4rs::init_config(log_config).map_err(|e| anyhow!("[init log] Cannot init log4rs: {e}"))?;
    Ok(())
}
