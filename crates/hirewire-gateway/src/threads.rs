use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use hirewire_types::models::{ConversationContext, Role, StoredMessage, ThreadSummary};

/// Server-side cache of per-viewer thread lists, kept consistent with the
/// live event stream so clients never see a thread list that disagrees with
/// the `message:new` events they just received.
///
/// A viewer's list becomes cached ("primed") the first time they aggregate
/// from the store; from then on live messages fold into it in place instead
/// of re-querying. Unprimed viewers fall through to the store on their next
/// request.
#[derive(Clone)]
pub struct ThreadAggregator {
    cache: Arc<Mutex<HashMap<(Role, Uuid), HashMap<Uuid, ThreadSummary>>>>,
}

impl ThreadAggregator {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the viewer's cached list with freshly aggregated rows. The
    /// cache is authoritative for that viewer from here on.
    pub fn prime(&self, viewer: Role, viewer_id: Uuid, rows: Vec<ThreadSummary>) {
        let mut cache = self.cache.lock().expect("aggregator lock poisoned");
        cache.insert(
            (viewer, viewer_id),
            rows.into_iter().map(|row| (row.counterpart_id, row)).collect(),
        );
    }

    /// The viewer's cached thread list, most recent conversation first.
    /// `None` until the viewer has been primed.
    pub fn cached(&self, viewer: Role, viewer_id: Uuid) -> Option<Vec<ThreadSummary>> {
        let cache = self.cache.lock().expect("aggregator lock poisoned");
        let threads = cache.get(&(viewer, viewer_id))?;
        let mut rows: Vec<ThreadSummary> = threads.values().cloned().collect();
        rows.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Some(rows)
    }

    /// Fold a freshly appended message into the viewer's cached list. The
    /// unread counter grows only for counterpart-sent messages the viewer is
    /// not currently looking at; a viewer's own messages never count.
    ///
    /// Returns the updated row for the `conversation:updated` fan-out, or
    /// `None` when the viewer is unprimed.
    pub fn apply_message(
        &self,
        viewer: Role,
        viewer_id: Uuid,
        message: &StoredMessage,
        context: &ConversationContext,
        viewer_in_room: bool,
    ) -> Option<ThreadSummary> {
        let counterpart = viewer.counterpart();
        let counterpart_id = message.key().side(counterpart);

        let mut cache = self.cache.lock().expect("aggregator lock poisoned");
        let threads = cache.get_mut(&(viewer, viewer_id))?;

        let (name, email) = context.counterpart_of(viewer);
        let entry = threads.entry(counterpart_id).or_insert_with(|| ThreadSummary {
            counterpart_id,
            counterpart_name: name.to_string(),
            counterpart_email: email.to_string(),
            job_title: context.job_title.clone(),
            last_message: String::new(),
            last_message_at: message.created_at,
            last_sender_role: message.sender_role,
            unread_count: 0,
        });

        entry.last_message = message.preview();
        entry.last_message_at = message.created_at;
        entry.last_sender_role = message.sender_role;
        if message.sender_role == counterpart && !viewer_in_room {
            entry.unread_count += 1;
        }

        Some(entry.clone())
    }

    /// Zero the unread counter after the viewer fetched the conversation.
    /// The mark-read side effect of that fetch made the store agree.
    pub fn reset_unread(&self, viewer: Role, viewer_id: Uuid, counterpart_id: Uuid) {
        let mut cache = self.cache.lock().expect("aggregator lock poisoned");
        if let Some(entry) = cache
            .get_mut(&(viewer, viewer_id))
            .and_then(|threads| threads.get_mut(&counterpart_id))
        {
            entry.unread_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hirewire_types::models::{Attachment, ConversationKey};

    fn context() -> ConversationContext {
        ConversationContext {
            poster_name: "Acme Robotics".into(),
            poster_email: "jobs@acme.test".into(),
            respondent_name: "Dana Flores".into(),
            respondent_email: "dana@mail.test".into(),
            job_title: Some("Firmware Engineer".into()),
        }
    }

    fn message(key: ConversationKey, sender: Role, body: &str) -> StoredMessage {
        StoredMessage {
            id: Uuid::new_v4(),
            poster_id: key.poster_id,
            respondent_id: key.respondent_id,
            job_ref: None,
            sender_role: sender,
            sender_id: key.side(sender),
            body: body.into(),
            attachments: vec![],
            read_by_poster: false,
            read_by_respondent: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unprimed_viewers_are_not_tracked() {
        let aggregator = ThreadAggregator::new();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());

        assert!(aggregator.cached(Role::Poster, key.poster_id).is_none());
        let applied = aggregator.apply_message(
            Role::Poster,
            key.poster_id,
            &message(key, Role::Respondent, "hello"),
            &context(),
            false,
        );
        assert!(applied.is_none(), "unprimed viewers re-aggregate from the store");
    }

    #[test]
    fn counterpart_messages_increment_unread() {
        let aggregator = ThreadAggregator::new();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        aggregator.prime(Role::Poster, key.poster_id, vec![]);

        let first = aggregator
            .apply_message(
                Role::Poster,
                key.poster_id,
                &message(key, Role::Respondent, "hi"),
                &context(),
                false,
            )
            .unwrap();
        assert_eq!(first.unread_count, 1);
        assert_eq!(first.counterpart_id, key.respondent_id);
        assert_eq!(first.counterpart_name, "Dana Flores");
        assert_eq!(first.last_message, "hi");

        let second = aggregator
            .apply_message(
                Role::Poster,
                key.poster_id,
                &message(key, Role::Respondent, "still there?"),
                &context(),
                false,
            )
            .unwrap();
        assert_eq!(second.unread_count, 2);
        assert_eq!(second.last_message, "still there?");
    }

    #[test]
    fn own_messages_never_count_as_unread() {
        let aggregator = ThreadAggregator::new();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        aggregator.prime(Role::Poster, key.poster_id, vec![]);

        let applied = aggregator
            .apply_message(
                Role::Poster,
                key.poster_id,
                &message(key, Role::Poster, "Are you still interested?"),
                &context(),
                false,
            )
            .unwrap();
        assert_eq!(applied.unread_count, 0);
        assert_eq!(applied.last_sender_role, Role::Poster);
    }

    #[test]
    fn viewing_the_room_suppresses_unread() {
        let aggregator = ThreadAggregator::new();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        aggregator.prime(Role::Respondent, key.respondent_id, vec![]);

        let applied = aggregator
            .apply_message(
                Role::Respondent,
                key.respondent_id,
                &message(key, Role::Poster, "hello"),
                &context(),
                true,
            )
            .unwrap();
        assert_eq!(applied.unread_count, 0, "open conversation never accrues unread");
        assert_eq!(applied.last_message, "hello");
    }

    #[test]
    fn reset_unread_zeroes_only_that_conversation() {
        let aggregator = ThreadAggregator::new();
        let poster = Uuid::new_v4();
        let first = ConversationKey::new(poster, Uuid::new_v4());
        let second = ConversationKey::new(poster, Uuid::new_v4());
        aggregator.prime(Role::Poster, poster, vec![]);

        aggregator.apply_message(
            Role::Poster,
            poster,
            &message(first, Role::Respondent, "one"),
            &context(),
            false,
        );
        aggregator.apply_message(
            Role::Poster,
            poster,
            &message(second, Role::Respondent, "two"),
            &context(),
            false,
        );

        aggregator.reset_unread(Role::Poster, poster, first.respondent_id);

        let rows = aggregator.cached(Role::Poster, poster).unwrap();
        let unread_of = |id: Uuid| rows.iter().find(|t| t.counterpart_id == id).unwrap().unread_count;
        assert_eq!(unread_of(first.respondent_id), 0);
        assert_eq!(unread_of(second.respondent_id), 1);
    }

    #[test]
    fn cached_lists_most_recent_first() {
        let aggregator = ThreadAggregator::new();
        let poster = Uuid::new_v4();
        let older = ConversationKey::new(poster, Uuid::new_v4());
        let newer = ConversationKey::new(poster, Uuid::new_v4());
        aggregator.prime(Role::Poster, poster, vec![]);

        aggregator.apply_message(
            Role::Poster,
            poster,
            &message(older, Role::Respondent, "first"),
            &context(),
            false,
        );
        aggregator.apply_message(
            Role::Poster,
            poster,
            &message(newer, Role::Respondent, "second"),
            &context(),
            false,
        );

        let rows = aggregator.cached(Role::Poster, poster).unwrap();
        assert_eq!(rows[0].counterpart_id, newer.respondent_id);
        assert_eq!(rows[1].counterpart_id, older.respondent_id);
    }

    #[test]
    fn attachment_only_message_updates_preview() {
        let aggregator = ThreadAggregator::new();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        aggregator.prime(Role::Poster, key.poster_id, vec![]);

        let mut msg = message(key, Role::Respondent, "");
        msg.attachments = vec![Attachment {
            name: "portfolio.pdf".into(),
            reference: "blob-7".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 2 * 1024 * 1024,
        }];

        let applied = aggregator
            .apply_message(Role::Poster, key.poster_id, &msg, &context(), false)
            .unwrap();
        assert_eq!(applied.last_message, "Attachment: portfolio.pdf");
    }
}
