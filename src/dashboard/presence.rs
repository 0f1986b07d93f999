use chrono::Utc;

use crate::{
    backend::Identity,
    fmt::{escape_html, initial},
    realtime::PresenceEntry,
};

/// Tracked by every mounted view.
pub const ONLINE_USERS: &str = "online-users";
/// Tracked while the chat view is mounted.
pub const CHAT_PRESENCE: &str = "chat-presence";

const SHOWN_AVATARS: usize = 5;

pub(crate) fn entry_for(user: &Identity) -> PresenceEntry {
    PresenceEntry {
        id: user.id,
        username: user.display_name().to_owned(),
        online_at: Utc::now(),
    }
}

/// Who is in the chat, as rendered in its header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    pub fn from_entries(entries: &[PresenceEntry]) -> Self {
        Self {
            names: entries.iter().map(|entry| entry.username.clone()).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn label(&self) -> String {
        match self.count() {
            1 => "1 person online".to_owned(),
            n => format!("{n} people online"),
        }
    }

    pub fn html(&self) -> String {
        let mut out = String::from(r#"<div class="avatars">"#);
        for name in self.names.iter().take(SHOWN_AVATARS) {
            out.push_str(&format!(
                r#"<span class="avatar" title="{}">{}</span>"#,
                escape_html(name),
                escape_html(&initial(name))
            ));
        }
        if self.count() > SHOWN_AVATARS {
            out.push_str(&format!(r#"<span class="avatar more">+{}</span>"#, self.count() - SHOWN_AVATARS));
        }
        out.push_str("</div>");
        out.push_str(&format!(r#"<span class="online-label">{}</span>"#, self.label()));
        out
    }
}
