//! Account-linking bot.
//!
//! Users open the deep link produced by the API, which sends
//! `/start <code>` from their chat. The bot consumes the code and binds the
//! chat to the account. `/status` and `/help` are informational.

use std::time::Duration;

use skyguard_database::DbError;
use skyguard_users::{link::LinkCodes, profile::ProfileStore};

use crate::{TelegramClient, Update};

/// Pause after a failed poll before retrying.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A recognized bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// `/start <code>`: link this chat to an account.
    Link(String),
    /// Bare `/start`.
    Start,
    /// `/status`.
    Status,
    /// `/help`.
    Help,
}

impl BotCommand {
    /// Parses a message text. Returns `None` for anything that is not a
    /// known command.
    ///
    /// A `@botname` suffix on the command is accepted, as Telegram adds it
    /// in group chats.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (command, argument) = text
            .split_once(char::is_whitespace)
            .map_or((text, ""), |(c, a)| (c, a.trim()));
        let command = command.split_once('@').map_or(command, |(c, _)| c);

        match command {
            "/start" if argument.is_empty() => Some(Self::Start),
            "/start" => Some(Self::Link(argument.to_uppercase())),
            "/status" => Some(Self::Status),
            "/help" => Some(Self::Help),
            _ => None,
        }
    }
}

fn linked_reply(user_id: i64, alert_radius_km: f64) -> String {
    format!(
        "✅ <b>Połączono pomyślnie!</b>\n\n\
         Twoje konto <b>#{user_id}</b> zostało połączone z tym czatem.\n\n\
         Teraz będziesz otrzymywać powiadomienia o zagrożeniach w promieniu \
         {alert_radius_km:.0} km od Twojej lokalizacji.\n\n\
         🔔 Upewnij się, że zaktualizowałeś swoją lokalizację w aplikacji!"
    )
}

const INVALID_CODE_REPLY: &str = "❌ <b>Nieprawidłowy lub wygasły kod.</b>\n\n\
     Wygeneruj nowy kod w aplikacji i spróbuj ponownie.";

const WELCOME_REPLY: &str = "👋 <b>Witaj w SkyGuard Bot!</b>\n\n\
     Aby połączyć swoje konto:\n\
     1. Otwórz aplikację SkyGuard\n\
     2. Przejdź do zakładki Profile\n\
     3. Kliknij 'Connect Telegram'\n\
     4. Kliknij wygenerowany link\n\n\
     Po połączeniu będziesz otrzymywać powiadomienia o zagrożeniach! 🚨";

const NOT_LINKED_REPLY: &str = "❌ Ten czat nie jest połączony z żadnym kontem.\n\n\
     Użyj aplikacji SkyGuard, aby połączyć konto.";

const HELP_REPLY: &str = "📖 <b>Dostępne komendy:</b>\n\n\
     /start - Rozpocznij i połącz konto\n\
     /status - Sprawdź status konta\n\
     /help - Pokaż tę wiadomość\n\n\
     🚨 Powiadomienia o zagrożeniach są wysyłane automatycznie!";

fn status_reply(
    user_id: i64,
    location: Option<(f64, f64)>,
    notifications_enabled: bool,
) -> String {
    let location =
        location.map_or_else(|| "nie ustawiona".to_string(), |(lat, lon)| format!("{lat:.4}, {lon:.4}"));
    let notifications = if notifications_enabled {
        "✅ włączone"
    } else {
        "❌ wyłączone"
    };

    format!(
        "📊 <b>Status konta</b>\n\n\
         👤 Użytkownik: <b>#{user_id}</b>\n\
         📍 Lokalizacja: {location}\n\
         🔔 Powiadomienia: {notifications}"
    )
}

/// Command handler and polling loop.
pub struct Bot {
    client: TelegramClient,
    profiles: ProfileStore,
    links: LinkCodes,
    alert_radius_km: f64,
}

impl Bot {
    /// Creates a bot. `alert_radius_km` is only used in reply texts.
    #[must_use]
    pub const fn new(
        client: TelegramClient,
        profiles: ProfileStore,
        links: LinkCodes,
        alert_radius_km: f64,
    ) -> Self {
        Self {
            client,
            profiles,
            links,
            alert_radius_km,
        }
    }

    /// Computes the reply to `text` received in `chat_id`. Returns `None`
    /// for messages the bot ignores.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on storage failure.
    pub async fn reply_to(&self, chat_id: &str, text: &str) -> Result<Option<String>, DbError> {
        let Some(command) = BotCommand::parse(text) else {
            return Ok(None);
        };

        let reply = match command {
            BotCommand::Link(code) => match self.links.consume_link_code(&code, chat_id).await? {
                Some(user_id) => linked_reply(user_id, self.alert_radius_km),
                None => INVALID_CODE_REPLY.to_string(),
            },
            BotCommand::Start => WELCOME_REPLY.to_string(),
            BotCommand::Status => match self.profiles.find_by_channel(chat_id).await? {
                Some(profile) => status_reply(
                    profile.user_id,
                    profile.location(),
                    profile.notifications_enabled,
                ),
                None => NOT_LINKED_REPLY.to_string(),
            },
            BotCommand::Help => HELP_REPLY.to_string(),
        };

        Ok(Some(reply))
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text else {
            return;
        };
        let chat_id = message.chat.id.to_string();

        log::debug!("Message from chat {chat_id}: {text}");

        match self.reply_to(&chat_id, &text).await {
            Ok(Some(reply)) => {
                if let Err(e) = self.client.send_message(&chat_id, &reply).await {
                    log::warn!("Failed to reply to chat {chat_id}: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("Failed to handle message from chat {chat_id}: {e}"),
        }
    }

    /// Polls for updates forever, handling each message in order.
    ///
    /// Poll failures are logged and retried after a short pause.
    pub async fn run(&self) {
        log::info!("SkyGuard bot started, listening for messages");

        let mut offset = 0;
        loop {
            match self.client.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    log::error!("Polling for updates failed: {e}");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use skyguard_database::{Storage as _, memory::MemoryStore};
    use skyguard_database_models::UserProfileRow;

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            BotCommand::parse("/start abcd1234"),
            Some(BotCommand::Link("ABCD1234".to_string()))
        );
        assert_eq!(
            BotCommand::parse("  /start   ABCD1234  "),
            Some(BotCommand::Link("ABCD1234".to_string()))
        );
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/status"), Some(BotCommand::Status));
        assert_eq!(BotCommand::parse("/help@skyguard_bot"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("hello"), None);
        assert_eq!(BotCommand::parse("/stop"), None);
        assert_eq!(BotCommand::parse(""), None);
    }

    fn bot(store: Arc<MemoryStore>) -> Bot {
        Bot::new(
            TelegramClient::with_api_base("1:test", "http://127.0.0.1:9").unwrap(),
            ProfileStore::new(store.clone()),
            LinkCodes::new(store),
            30.0,
        )
    }

    #[tokio::test]
    async fn links_chat_with_code() {
        let store = Arc::new(MemoryStore::new());
        let links = LinkCodes::new(store.clone());
        let bot = bot(store.clone());

        let code = links.create_link_code(7).await.unwrap();
        let reply = bot
            .reply_to("555", &format!("/start {}", code.code.to_lowercase()))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("Połączono pomyślnie"));
        assert!(reply.contains("30 km"));

        let reply = bot
            .reply_to("555", &format!("/start {}", code.code))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, INVALID_CODE_REPLY);

        let profile = store.get_profile(7).await.unwrap().unwrap();
        assert_eq!(profile.channel(), Some("555"));
    }

    #[tokio::test]
    async fn status_reports_link_state() {
        let store = Arc::new(MemoryStore::new());
        let bot = bot(store.clone());

        let reply = bot.reply_to("1", "/status").await.unwrap().unwrap();
        assert_eq!(reply, NOT_LINKED_REPLY);

        let mut profile = UserProfileRow::new(3);
        profile.channel_id = Some("1".to_string());
        profile.last_latitude = Some(52.229_68);
        profile.last_longitude = Some(21.012_23);
        store.save_profile(profile).await.unwrap();

        let reply = bot.reply_to("1", "/status").await.unwrap().unwrap();
        assert!(reply.contains("52.2297, 21.0122"));
        assert!(reply.contains("✅ włączone"));
    }

    #[tokio::test]
    async fn ignores_unknown_text() {
        let bot = bot(Arc::new(MemoryStore::new()));
        assert_eq!(bot.reply_to("1", "what is this").await.unwrap(), None);
        assert_eq!(bot.reply_to("1", "/help").await.unwrap().as_deref(), Some(HELP_REPLY));
    }
}
