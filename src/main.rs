mod api;
mod appsettings;
mod delivery;
mod messages;
mod roster;
mod scheduling;
mod telegram;
mod telegram_bot;

use std::sync::Arc;

use teloxide::Bot;

use api::BackendClient;
use scheduling::{ReminderScheduler, SchedulerController, SystemClock};
use telegram_bot::TelegramNotificationSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();
    log::info!("Starting habitnag");

    let settings = appsettings::get();
    let bot = Bot::new(settings.telegram.token.clone());

    let backend = Arc::new(BackendClient::new(&settings.backend)?);
    let sink = Arc::new(TelegramNotificationSink::new(bot.clone()));
    let scheduler = ReminderScheduler::new(backend.clone(), sink, Arc::new(SystemClock));
    let controller = Arc::new(SchedulerController::new(scheduler));

    // reminders run from boot; chat commands can stop or restart them
    controller.start().await;

    telegram::run(bot, backend, controller).await;

    Ok(())
}
