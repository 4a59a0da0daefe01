use std::collections::HashMap;
use std::sync::Arc;

use dptree::case;
use teloxide::{
    dispatching::UpdateHandler, dispatching::dialogue, dispatching::dialogue::InMemStorage,
    macros::BotCommands, prelude::*, types::KeyboardButton, types::KeyboardMarkup,
};

use crate::api::{BackendClient, UserPatch, UserProfile};
use crate::messages;
use crate::scheduling::SchedulerController;

type GlobalDialogue = Dialogue<GlobalState, InMemStorage<GlobalState>>;
type HandlerResult = anyhow::Result<()>;

const MIN_REPEAT_NUMBER: u32 = 10;
const MAX_REPEAT_NUMBER: u32 = 50;
const DELETE_CONFIRMATION_WORD: &str = "yes";

/// Offsets offered on the time-zone keyboard; typed offsets down to UTC-12
/// are accepted as well.
const KEYBOARD_TIME_ZONES: std::ops::RangeInclusive<i32> = 0..=12;

#[derive(Default, Clone, Debug, PartialEq, Eq)]
enum GlobalState {
    #[default]
    Idle,
    ChoosingTimeZone,
    AddingHabit,
    SelectingHabit {
        deleting: bool,
    },
    ChangingRepeatNumber,
    ConfirmingAccountDeletion,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "These commands are supported:")]
enum Command {
    #[command(description = "start working with the bot")]
    Start,
    #[command(description = "how the bot works")]
    Help,
    #[command(description = "list all commands")]
    Menu,
    #[command(description = "set or change your time zone")]
    TimeZone,
    #[command(description = "habits to work on")]
    GetHabits,
    #[command(description = "add a habit")]
    AddHabit,
    #[command(description = "delete a habit")]
    DeleteHabit,
    #[command(description = "learned habits")]
    GetCompleted,
    #[command(description = "change the repetitions goal")]
    SetRepeatNumber,
    #[command(description = "delete your account")]
    DeleteAccount,
    #[command(description = "start the reminder scheduler")]
    RunScheduler,
    #[command(description = "stop the reminder scheduler")]
    StopScheduler,
}

pub async fn run(bot: Bot, backend: Arc<BackendClient>, controller: Arc<SchedulerController>) {
    log::info!("Starting Telegram interaction interface");

    let schema = dialogue::enter::<Update, InMemStorage<GlobalState>, GlobalState, _>()
        .branch(schema());

    Dispatcher::builder(bot, schema)
        .dependencies(dptree::deps![
            InMemStorage::<GlobalState>::new(),
            backend,
            controller
        ])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

fn schema() -> UpdateHandler<anyhow::Error> {
    let commands = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(start))
        .branch(case![Command::Help].endpoint(help))
        .branch(case![Command::Menu].endpoint(menu))
        .branch(case![Command::TimeZone].endpoint(choose_time_zone))
        .branch(case![Command::GetHabits].endpoint(list_habits_for_tracking))
        .branch(case![Command::AddHabit].endpoint(add_habit))
        .branch(case![Command::DeleteHabit].endpoint(list_habits_for_deletion))
        .branch(case![Command::GetCompleted].endpoint(get_completed))
        .branch(case![Command::SetRepeatNumber].endpoint(set_repeat_number))
        .branch(case![Command::DeleteAccount].endpoint(delete_account))
        .branch(case![Command::RunScheduler].endpoint(run_scheduler))
        .branch(case![Command::StopScheduler].endpoint(stop_scheduler));

    Update::filter_message()
        .branch(commands)
        .branch(case![GlobalState::ChoosingTimeZone].endpoint(receive_time_zone))
        .branch(case![GlobalState::AddingHabit].endpoint(receive_habit_text))
        .branch(case![GlobalState::SelectingHabit { deleting }].endpoint(receive_habit_selection))
        .branch(case![GlobalState::ChangingRepeatNumber].endpoint(receive_repeat_number))
        .branch(case![GlobalState::ConfirmingAccountDeletion].endpoint(receive_delete_confirmation))
        .branch(dptree::endpoint(fallback))
}

// Private chats only, where the chat id is the user's id.
fn sender_id(msg: &Message) -> Option<i64> {
    msg.chat.is_private().then_some(msg.chat.id.0)
}

async fn report_backend_error(bot: &Bot, msg: &Message, error: anyhow::Error) -> HandlerResult {
    log::error!("Backend request failed. [error = {:#}]", error);
    bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
        .await?;
    Ok(())
}

async fn start(bot: Bot, msg: Message, backend: Arc<BackendClient>) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(_)) => {
            bot.send_message(
                msg.chat.id,
                "Welcome back! Shall we work on your habits? :) - /get_habits",
            )
            .await?;
        }
        Ok(None) => {
            bot.send_message(msg.chat.id, format!("Hi! {}", messages::START))
                .await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    Ok(())
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, messages::HELP).await?;
    Ok(())
}

async fn menu(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, messages::MENU).await?;
    Ok(())
}

fn format_time_zone(offset: i32) -> String {
    format!("UTC{offset:+}")
}

fn parse_time_zone(text: &str) -> Option<i32> {
    let offset: i32 = text.trim().strip_prefix("UTC")?.parse().ok()?;
    (-12..=12).contains(&offset).then_some(offset)
}

fn time_zone_keyboard() -> KeyboardMarkup {
    let rows = KEYBOARD_TIME_ZONES
        .map(|offset| vec![KeyboardButton::new(format_time_zone(offset))])
        .collect::<Vec<_>>();
    KeyboardMarkup::new(rows).one_time_keyboard().resize_keyboard()
}

async fn choose_time_zone(bot: Bot, dialogue: GlobalDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, messages::CHOOSE_TIME_ZONE)
        .reply_markup(time_zone_keyboard())
        .await?;
    dialogue.update(GlobalState::ChoosingTimeZone).await?;
    Ok(())
}

/// Registers a new user or moves an existing one; either way the active
/// schedule was derived from the old roster, so the scheduler is restarted.
async fn receive_time_zone(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
    controller: Arc<SchedulerController>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(offset) = msg.text().and_then(parse_time_zone) else {
        bot.send_message(
            msg.chat.id,
            "Please pick a time zone from the keyboard, e.g. UTC+3.",
        )
        .await?;
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(_)) => {
            let patch = UserPatch {
                tg_uid: user_id,
                time_zone: Some(offset),
                ..Default::default()
            };
            match backend.patch_user(&patch).await {
                Ok(true) => {
                    bot.send_message(
                        msg.chat.id,
                        format!("Your time zone is set: {} /menu", format_time_zone(offset)),
                    )
                    .await?;
                    controller.restart().await;
                }
                Ok(false) => {
                    bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                        .await?;
                }
                Err(error) => report_backend_error(&bot, &msg, error).await?,
            }
        }
        Ok(None) => match backend.make_user(user_id, offset).await {
            Ok(true) => {
                bot.send_message(msg.chat.id, messages::CONGRATULATIONS)
                    .await?;
                controller.restart().await;
            }
            Ok(false) => {
                bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                    .await?;
            }
            Err(error) => report_backend_error(&bot, &msg, error).await?,
        },
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }

    dialogue.exit().await?;
    Ok(())
}

fn habit_keyboard(habits: &HashMap<String, u32>, deleting: bool) -> KeyboardMarkup {
    let mut names: Vec<&String> = habits.keys().collect();
    names.sort();

    let rows = names
        .into_iter()
        .map(|name| {
            let label = if deleting {
                name.clone()
            } else {
                format!("{} {}", name, habits[name])
            };
            vec![KeyboardButton::new(label)]
        })
        .collect::<Vec<_>>();
    KeyboardMarkup::new(rows).one_time_keyboard().resize_keyboard()
}

const TRACKING_PROMPT: &str =
    "Here are your habits. Press one to mark it done for today. /menu";

async fn list_habits_for_tracking(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    show_habit_list(bot, dialogue, msg, backend, false).await
}

async fn list_habits_for_deletion(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    show_habit_list(bot, dialogue, msg, backend, true).await
}

async fn show_habit_list(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
    deleting: bool,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    let profile = match backend.get_user(user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
            return Ok(());
        }
        Err(error) => return report_backend_error(&bot, &msg, error).await,
    };

    if profile.habits.is_empty() {
        let completed = profile.completed_habits();
        let reply = if completed.is_empty() {
            messages::EMPTY_LIST.to_owned()
        } else {
            format!(
                "Your habit list is empty, but you have already learned: {}. \
                 Shall we pick up a new one? /add_habit",
                completed.join(", ")
            )
        };
        bot.send_message(msg.chat.id, reply).await?;
        return Ok(());
    }

    let prompt = if deleting {
        "Choose the habit you want to delete. /menu"
    } else {
        TRACKING_PROMPT
    };
    bot.send_message(msg.chat.id, prompt)
        .reply_markup(habit_keyboard(&profile.habits, deleting))
        .await?;
    dialogue
        .update(GlobalState::SelectingHabit { deleting })
        .await?;
    Ok(())
}

enum HabitSelection {
    Deleted(String),
    Progressed { name: String, left: u32 },
    Learned(String),
    Unknown,
}

fn split_habit_button(button: &str) -> Option<(String, u32)> {
    let (name, count) = button.rsplit_once(' ')?;
    Some((name.to_owned(), count.parse().ok()?))
}

/// Applies one keyboard press to the profile. The stored count is
/// authoritative; the count on the button label may be stale.
fn apply_habit_selection(profile: &mut UserProfile, button: &str, deleting: bool) -> HabitSelection {
    if deleting {
        let name = button.trim();
        return if profile.habits.remove(name).is_some() {
            HabitSelection::Deleted(name.to_owned())
        } else {
            HabitSelection::Unknown
        };
    }

    let Some((name, _)) = split_habit_button(button) else {
        return HabitSelection::Unknown;
    };
    let Some(count) = profile.habits.get_mut(&name) else {
        return HabitSelection::Unknown;
    };

    *count += 1;
    if *count >= profile.repeat_number {
        profile.habits.remove(&name);
        profile
            .completed
            .get_or_insert_with(Vec::new)
            .push(name.clone());
        HabitSelection::Learned(name)
    } else {
        let left = profile.repeat_number - profile.habits[&name];
        HabitSelection::Progressed { name, left }
    }
}

async fn receive_habit_selection(
    bot: Bot,
    dialogue: GlobalDialogue,
    deleting: bool,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(button) = msg.text() else {
        bot.send_message(msg.chat.id, "Please pick a habit from the keyboard.")
            .await?;
        return Ok(());
    };

    let mut profile = match backend.get_user(user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
            dialogue.exit().await?;
            return Ok(());
        }
        Err(error) => {
            dialogue.exit().await?;
            return report_backend_error(&bot, &msg, error).await;
        }
    };

    let reply = match apply_habit_selection(&mut profile, button, deleting) {
        HabitSelection::Deleted(name) => {
            format!("Habit '{}' deleted. /get_habits, /menu", name)
        }
        HabitSelection::Learned(name) => {
            format!("Congratulations, you have learned the habit '{}'!", name)
        }
        HabitSelection::Progressed { name, left } => {
            format!("Habit '{}' done for today. {} repetitions to go.", name, left)
        }
        HabitSelection::Unknown => {
            bot.send_message(msg.chat.id, "Please pick a habit from the keyboard.")
                .await?;
            return Ok(());
        }
    };

    let patch = UserPatch {
        tg_uid: user_id,
        habits: Some(profile.habits.clone()),
        completed: profile.completed.clone().filter(|c| !c.is_empty()),
        ..Default::default()
    };
    match backend.patch_user(&patch).await {
        Ok(true) => {}
        Ok(false) => {
            bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                .await?;
            dialogue.exit().await?;
            return Ok(());
        }
        Err(error) => {
            dialogue.exit().await?;
            return report_backend_error(&bot, &msg, error).await;
        }
    }

    bot.send_message(msg.chat.id, reply).await?;

    if profile.habits.is_empty() {
        bot.send_message(msg.chat.id, messages::EMPTY_LIST).await?;
        dialogue.exit().await?;
    } else {
        bot.send_message(msg.chat.id, TRACKING_PROMPT)
            .reply_markup(habit_keyboard(&profile.habits, false))
            .await?;
        dialogue
            .update(GlobalState::SelectingHabit { deleting: false })
            .await?;
    }
    Ok(())
}

async fn add_habit(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(_)) => {
            bot.send_message(msg.chat.id, "Describe the habit you want to build. /menu")
                .await?;
            dialogue.update(GlobalState::AddingHabit).await?;
        }
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    Ok(())
}

async fn receive_habit_text(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let name = msg
        .text()
        .map(|text| text.trim_start_matches('/').trim().to_owned())
        .unwrap_or_default();
    if name.is_empty() {
        bot.send_message(msg.chat.id, "Please describe the habit as text.")
            .await?;
        return Ok(());
    }

    let mut profile = match backend.get_user(user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
            dialogue.exit().await?;
            return Ok(());
        }
        Err(error) => {
            dialogue.exit().await?;
            return report_backend_error(&bot, &msg, error).await;
        }
    };

    profile.habits.entry(name.clone()).or_insert(0);
    let patch = UserPatch {
        tg_uid: user_id,
        habits: Some(profile.habits.clone()),
        ..Default::default()
    };
    match backend.patch_user(&patch).await {
        Ok(true) => {
            bot.send_message(msg.chat.id, format!("Habit '{}' added!", name))
                .await?;
            bot.send_message(msg.chat.id, TRACKING_PROMPT)
                .reply_markup(habit_keyboard(&profile.habits, false))
                .await?;
            dialogue
                .update(GlobalState::SelectingHabit { deleting: false })
                .await?;
        }
        Ok(false) => {
            bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                .await?;
            dialogue.exit().await?;
        }
        Err(error) => {
            dialogue.exit().await?;
            return report_backend_error(&bot, &msg, error).await;
        }
    }
    Ok(())
}

async fn get_completed(bot: Bot, msg: Message, backend: Arc<BackendClient>) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(profile)) => {
            let completed = profile.completed_habits();
            let reply = if completed.is_empty() {
                "You have not learned any habits yet. Habits to work on - /get_habits".to_owned()
            } else {
                format!(
                    "Here are all the habits you have learned: {}. /menu",
                    completed.join(", ")
                )
            };
            bot.send_message(msg.chat.id, reply).await?;
        }
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    Ok(())
}

fn parse_repeat_number(text: &str) -> Option<u32> {
    let number: u32 = text.trim().parse().ok()?;
    (MIN_REPEAT_NUMBER..=MAX_REPEAT_NUMBER)
        .contains(&number)
        .then_some(number)
}

async fn set_repeat_number(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(profile)) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "To change the repetitions goal, enter a number from {} to {}. \
                     Current value: {}",
                    MIN_REPEAT_NUMBER, MAX_REPEAT_NUMBER, profile.repeat_number
                ),
            )
            .await?;
            dialogue.update(GlobalState::ChangingRepeatNumber).await?;
        }
        Ok(None) => {
            bot.send_message(msg.chat.id, messages::NO_ACCOUNT).await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    Ok(())
}

async fn receive_repeat_number(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(number) = msg.text().and_then(parse_repeat_number) else {
        bot.send_message(
            msg.chat.id,
            format!(
                "Invalid input. Enter a number from {} to {}.",
                MIN_REPEAT_NUMBER, MAX_REPEAT_NUMBER
            ),
        )
        .await?;
        return Ok(());
    };

    let patch = UserPatch {
        tg_uid: user_id,
        repeat_number: Some(number),
        ..Default::default()
    };
    match backend.patch_user(&patch).await {
        Ok(true) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Your repetitions goal is now {}. Habits to work on - /get_habits",
                    number
                ),
            )
            .await?;
        }
        Ok(false) => {
            bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                .await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    dialogue.exit().await?;
    Ok(())
}

async fn delete_account(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    match backend.get_user(user_id).await {
        Ok(Some(_)) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "If you really want to delete your account and all its data, \
                     type '{}'",
                    DELETE_CONFIRMATION_WORD
                ),
            )
            .await?;
            dialogue
                .update(GlobalState::ConfirmingAccountDeletion)
                .await?;
        }
        Ok(None) => {
            bot.send_message(
                msg.chat.id,
                "You don't have an account yet, so there is nothing to delete. \
                 To register, pick your time zone - /time_zone",
            )
            .await?;
        }
        Err(error) => report_backend_error(&bot, &msg, error).await?,
    }
    Ok(())
}

/// Deleting an account shrinks the roster, so the scheduler is restarted
/// after a successful deletion.
async fn receive_delete_confirmation(
    bot: Bot,
    dialogue: GlobalDialogue,
    msg: Message,
    backend: Arc<BackendClient>,
    controller: Arc<SchedulerController>,
) -> HandlerResult {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let confirmed = msg
        .text()
        .is_some_and(|text| text.trim().eq_ignore_ascii_case(DELETE_CONFIRMATION_WORD));

    if confirmed {
        match backend.delete_user(user_id).await {
            Ok(true) => {
                bot.send_message(
                    msg.chat.id,
                    "Your account is deleted. You can always register again, with new \
                     habits :). To do so, pick your time zone - /time_zone",
                )
                .await?;
                controller.restart().await;
            }
            Ok(false) => {
                bot.send_message(msg.chat.id, messages::SOMETHING_WENT_WRONG)
                    .await?;
            }
            Err(error) => {
                dialogue.exit().await?;
                return report_backend_error(&bot, &msg, error).await;
            }
        }
    } else {
        bot.send_message(
            msg.chat.id,
            "Wrong confirmation word, the account stays. By the way, how are the \
             habits doing... /get_habits, /menu",
        )
        .await?;
    }

    dialogue.exit().await?;
    Ok(())
}

async fn run_scheduler(controller: Arc<SchedulerController>) -> HandlerResult {
    controller.start().await;
    Ok(())
}

async fn stop_scheduler(controller: Arc<SchedulerController>) -> HandlerResult {
    controller.stop().await;
    Ok(())
}

async fn fallback(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, "Please choose a command from /menu")
        .await?;
    Ok(())
}
