//! User-facing bot copy.

pub const REMINDER: &str = "Don't forget to work on your habits ;) - /get_habits";

pub const START: &str =
    "To register, pick your time zone - /time_zone. After that, build your habit list: /menu";

pub const HELP: &str = "I help you build habits: add one with /add_habit, then mark it done every \
                        day from /get_habits. Once a habit reaches your repetitions goal it counts \
                        as learned, and I nudge you about your list twice a day. All commands: /menu";

pub const MENU: &str = "/get_habits - habits to work on\n\
                        /add_habit - add a habit\n\
                        /delete_habit - delete a habit\n\
                        /get_completed - learned habits\n\
                        /set_repeat_number - repetitions goal\n\
                        /time_zone - set or change your time zone\n\
                        /delete_account - delete your account\n\
                        /help - how the bot works";

pub const EMPTY_LIST: &str = "Your habit list is empty. Let's add the first one - /add_habit";

pub const NO_ACCOUNT: &str =
    "You don't have an account yet. To register, pick your time zone - /time_zone";

pub const SOMETHING_WENT_WRONG: &str = "Something went wrong, please try again later.";

pub const CONGRATULATIONS: &str = "You are registered! Now add your first habit - /add_habit";

pub const CHOOSE_TIME_ZONE: &str = "Choose your time zone:";
