// Default English rendering of engine notices.

use crate::core::moderation::Notice;

/// Parse mode Telegram should apply to a rendered notice.
pub const MARKDOWN: &str = "Markdown";

/// Text for a notice plus the parse mode it needs, if any.
pub fn render(notice: &Notice) -> (String, Option<&'static str>) {
    match notice {
        Notice::Introduction => (
            "Hi 👋\n\
             I'm Botguard. My job is to protect 🛡 groups from spam bots.\n\
             To get me ready, make me an admin with the *Ban users* permission, \
             then ask the group creator to switch me on.\n\
             I only take orders from the group creator."
                .to_string(),
            Some(MARKDOWN),
        ),
        Notice::CreatorRequired => (
            "⛔️ I cannot operate in this group. ⛔️\n\
             Reason: the group creator has to be a member of the group."
                .to_string(),
            None,
        ),
        // Usernames may contain underscores, so this one stays plain text.
        Notice::Whitelisted { username } => {
            let text = match username {
                Some(name) => format!("🤖 Bot @{} was added to the allowed bots. ✅", name),
                None => "🤖 Bot was added to the allowed bots. ✅".to_string(),
            };
            (text, None)
        }
        Notice::Warning { count, limit } => (
            format!(
                "⚠️ Warning {} of {} ⚠️\nOnly the group creator may add bots.",
                count, limit
            ),
            None,
        ),
        Notice::PermissionRequired => (
            "⛔️ I need the *Ban users* permission to remove spam bots. \
             Moderation is paused until the creator switches it back on. ⛔️"
                .to_string(),
            Some(MARKDOWN),
        ),
    }
}
