//! Conversation history for agent context.
//!
//! The agent sees a bounded window of the project's most recent messages,
//! oldest first. The window is a snapshot taken at job start; messages
//! created afterwards are not picked up.
//!
//! # Transcript Format
//!
//! [`format_transcript`] renders a window in the compact form used by the
//! CLI:
//!
//! ```text
//! U> build a counter
//!
//! A> Here is what I built for you.
//!
//! A[ERROR]> Something went wrong
//! ```

use crate::llm::{Message, Role};
use crate::store::{MessageRole, MessageStore, MessageType, StorageResult, StoredMessage};

/// Load the `limit` most recent messages of `project_id`, oldest first,
/// as chat messages for the coding agent.
pub async fn load_history(
    store: &dyn MessageStore,
    project_id: &str,
    limit: usize,
) -> StorageResult<Vec<Message>> {
    let mut recent = store.find_recent(project_id, limit).await?;
    recent.reverse();
    Ok(recent.iter().map(to_chat_message).collect())
}

/// Map a stored message to the agent's user/assistant vocabulary.
pub fn to_chat_message(message: &StoredMessage) -> Message {
    match message.role {
        MessageRole::Assistant => Message::text(Role::Assistant, &message.content),
        MessageRole::User => Message::user(&message.content),
    }
}

/// Render messages (oldest first) as a transcript.
pub fn format_transcript(messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        if !out.is_empty() {
            out.push('\n');
        }
        let prefix = match (message.role, message.message_type) {
            (MessageRole::User, _) => "U>",
            (MessageRole::Assistant, MessageType::Result) => "A>",
            (MessageRole::Assistant, MessageType::Error) => "A[ERROR]>",
        };
        out.push_str(prefix);
        out.push(' ');
        out.push_str(&message.content);
        out.push('\n');
        if let Some(fragment) = &message.fragment {
            out.push_str(&format!(
                "F[{}] {} ({} files)\n",
                fragment.title,
                fragment.sandbox_url,
                fragment.files.len()
            ));
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::store::{Fragment, InMemoryMessageStore, NewMessage};

    fn message(i: i64, role: MessageRole) -> StoredMessage {
        StoredMessage {
            id: format!("m{i}"),
            project_id: "p1".to_string(),
            role,
            content: format!("message {i}"),
            message_type: MessageType::Result,
            created_at: Utc::now() + Duration::seconds(i),
            fragment: None,
        }
    }

    #[tokio::test]
    async fn test_window_is_most_recent_oldest_first() {
        let store = InMemoryMessageStore::new();
        for i in 0..10 {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store.insert(message(i, role)).await;
        }

        let history = load_history(&store, "p1", 6).await.unwrap();

        let contents: Vec<&str> = history.iter().map(Message::content_str).collect();
        assert_eq!(
            contents,
            vec![
                "message 4",
                "message 5",
                "message 6",
                "message 7",
                "message 8",
                "message 9"
            ]
        );
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_short_history() {
        let store = InMemoryMessageStore::new();
        store
            .append_message("p1", NewMessage::user("build a counter"))
            .await
            .unwrap();

        let history = load_history(&store, "p1", 6).await.unwrap();
        assert_eq!(history, vec![Message::user("build a counter")]);
        assert!(load_history(&store, "p2", 6).await.unwrap().is_empty());
    }

    #[test]
    fn test_transcript() {
        let mut result = message(1, MessageRole::Assistant);
        result.content = "Here is what I built for you.".to_string();
        result.fragment = Some(Fragment {
            sandbox_url: "http://localhost:3000".to_string(),
            title: "Counter".to_string(),
            files: BTreeMap::from([("app/page.tsx".to_string(), String::new())]),
        });
        let mut error = message(2, MessageRole::Assistant);
        error.message_type = MessageType::Error;
        error.content = "Something went wrong".to_string();

        let transcript = format_transcript(&[message(0, MessageRole::User), result, error]);

        assert_eq!(
            transcript,
            "U> message 0\n\
             \n\
             A> Here is what I built for you.\n\
             F[Counter] http://localhost:3000 (1 files)\n\
             \n\
             A[ERROR]> Something went wrong\n"
        );
    }
}
