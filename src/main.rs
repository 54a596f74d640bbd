use std::sync::Arc;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use sqlx::any::AnyPoolOptions;
use teloxide::Bot;

mod bot;
mod models;
mod repositories;
pub mod services;
pub mod settings;

fn init_logging() {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();

    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("Could not build logging config.");

    log4rs::init_config(config).expect("Could not init logging.");
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_logging();

    let config = settings::Settings::new().expect("Could not load config file.");

    // DATABASE_URL (or database.url in config.toml) selects Postgres;
    // without either the bot runs on a local SQLite file.
    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| config.database.url.clone())
        .unwrap_or_else(|| "sqlite://gatebot.db?mode=rwc".to_string());

    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Could not connect to database.");

    repositories::init_schema(&pool)
        .await
        .expect("Could not initialize database schema.");

    let telegram_bot = Bot::new(config.bot.token.clone());
    let notifier = Arc::new(bot::TelegramNotifier::new(telegram_bot.clone()));
    let settings = Arc::new(config);

    let (ledger_tx, broadcast_tx) = services::start_services(pool, settings.clone(), notifier)
        .await
        .expect("Could not start services.");

    let ctx = bot::BotContext::new(ledger_tx, broadcast_tx, settings);

    log::info!("Starting bot dispatcher.");
    bot::run(telegram_bot, ctx).await;
}
