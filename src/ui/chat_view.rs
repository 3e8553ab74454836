use chatsync::api::models::Message;

/// Message history of the open conversation, oldest first.
pub fn render(messages: &[Message], me: &str, typing: Option<&str>) -> String {
    let mut out = String::new();
    for m in messages {
        let line = if m.is_from(me) {
            let tick = if m.read { " ✓✓" } else { "" };
            format!("{} me: {}{}\n", m.created_at.format("%H:%M"), m.text, tick)
        } else {
            let who = if m.sender.name.is_empty() { &m.sender.id } else { &m.sender.name };
            format!("{} {}: {}\n", m.created_at.format("%H:%M"), who, m.text)
        };
        out.push_str(&line);
    }
    if let Some(name) = typing {
        out.push_str(&format!("{} is typing...\n", name));
    }
    out
}
