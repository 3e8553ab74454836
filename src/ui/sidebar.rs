use chatsync::api::models::Conversation;

const PREVIEW_LEN: usize = 50;

/// Conversation list as terminal lines, newest first.
pub fn render(items: &[Conversation], active: Option<&str>) -> String {
    if items.is_empty() {
        return "No conversations yet\n".to_string();
    }
    let mut out = String::new();
    for conv in items {
        let marker = if active == Some(conv.id.as_str()) { '>' } else { ' ' };
        let unread = if conv.unread > 0 {
            format!(" ({})", conv.unread)
        } else {
            String::new()
        };
        let preview: String = conv.preview_text().chars().take(PREVIEW_LEN).collect();
        out.push_str(&format!(
            "{} [{}] {}{}: {}\n",
            marker, conv.id, conv.other.name, unread, preview
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync::api::models::{MessagePreview, Participant};

    #[test]
    fn marks_active_and_unread() {
        let mut a = Conversation::new("c1", Participant::new("u2", "Bo"));
        a.unread = 2;
        a.last_message = Some(MessagePreview {
            text: "x".repeat(80),
            created_at: None,
        });
        let b = Conversation::new("c2", Participant::new("u3", "Cy"));
        let text = render(&[a, b], Some("c2"));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], format!("  [c1] Bo (2): {}", "x".repeat(50)));
        assert_eq!(lines[1], "> [c2] Cy: No messages yet");
    }
}
