use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::util::random_uuid;

/// Threading pointers for one client session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assistant_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ConversationState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversation_id.is_none()
            && self.last_assistant_message_id.is_none()
            && self.system_prompt.is_none()
    }

    /// Field-by-field merge: fields present on `self` win, the rest fall back
    /// to `stored`.
    #[must_use]
    pub fn merged_with(&self, stored: Option<&ConversationState>) -> ConversationState {
        let Some(stored) = stored else {
            return self.clone();
        };
        ConversationState {
            conversation_id: self
                .conversation_id
                .clone()
                .or_else(|| stored.conversation_id.clone()),
            last_assistant_message_id: self
                .last_assistant_message_id
                .clone()
                .or_else(|| stored.last_assistant_message_id.clone()),
            system_prompt: self
                .system_prompt
                .clone()
                .or_else(|| stored.system_prompt.clone()),
        }
    }

    fn apply(&mut self, partial: &ConversationState) {
        if let Some(ref id) = partial.conversation_id {
            self.conversation_id = Some(id.clone());
        }
        if let Some(ref id) = partial.last_assistant_message_id {
            self.last_assistant_message_id = Some(id.clone());
        }
        if let Some(ref prompt) = partial.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
    }
}

/// Where a session id may come from, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHints {
    /// Explicit session header set by the HTTP layer.
    pub header: Option<String>,
    /// `metadata.session_id` from the request body.
    pub metadata_session_id: Option<String>,
    /// `metadata.user_id` from the request body.
    pub metadata_user_id: Option<String>,
}

impl SessionHints {
    fn first_present(&self) -> Option<&str> {
        [
            self.header.as_deref(),
            self.metadata_session_id.as_deref(),
            self.metadata_user_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: ConversationState,
    last_touched: Instant,
}

/// Process-wide session id to [`ConversationState`] map with lazy TTL expiry.
///
/// Every operation sweeps entries idle for longer than the TTL first.
pub struct ConversationStore {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, Entry>>,
}

impl ConversationStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    fn sweep(&self, entries: &mut FxHashMap<String, Entry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_touched) <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(
                "[ConversationStore] expired {} idle sessions ({} left)",
                removed,
                entries.len()
            );
        }
    }

    /// Pick the session id for a request: header, then metadata session id,
    /// then metadata user id, else a fresh `sess_<uuid>`.
    #[must_use]
    pub fn resolve(&self, hints: &SessionHints) -> String {
        self.resolve_at(hints, Instant::now())
    }

    fn resolve_at(&self, hints: &SessionHints, now: Instant) -> String {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        drop(entries);

        match hints.first_present() {
            Some(id) => id.to_string(),
            None => {
                let id = format!("sess_{}", random_uuid());
                tracing::debug!("[ConversationStore] generated session id {}", id);
                id
            }
        }
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<ConversationState> {
        self.get_at(session_id, Instant::now())
    }

    fn get_at(&self, session_id: &str, now: Instant) -> Option<ConversationState> {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        let entry = entries.get_mut(session_id)?;
        entry.last_touched = now;
        Some(entry.state.clone())
    }

    /// Overwrite only the fields present in `partial`, creating the entry
    /// when needed.
    pub fn update(&self, session_id: &str, partial: &ConversationState) {
        self.update_at(session_id, partial, Instant::now());
    }

    fn update_at(&self, session_id: &str, partial: &ConversationState, now: Instant) {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        let entry = entries
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                state: ConversationState::default(),
                last_touched: now,
            });
        entry.state.apply(partial);
        entry.last_touched = now;
    }

    /// Forget a session; returns whether it existed.
    pub fn reset(&self, session_id: &str) -> bool {
        self.reset_at(session_id, Instant::now())
    }

    fn reset_at(&self, session_id: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        entries.remove(session_id).is_some()
    }

    /// Live sessions; expired ones are swept first.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    fn len_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        self.sweep(&mut entries, now);
        entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(6 * 60 * 60);

    fn state(conv: Option<&str>, last: Option<&str>, sys: Option<&str>) -> ConversationState {
        ConversationState {
            conversation_id: conv.map(str::to_string),
            last_assistant_message_id: last.map(str::to_string),
            system_prompt: sys.map(str::to_string),
        }
    }

    #[test]
    fn resolve_prefers_header_then_metadata() {
        let store = ConversationStore::new(TTL);
        let mut hints = SessionHints {
            header: Some("hdr".into()),
            metadata_session_id: Some("meta".into()),
            metadata_user_id: Some("user".into()),
        };
        assert_eq!(store.resolve(&hints), "hdr");
        hints.header = Some("  ".into());
        assert_eq!(store.resolve(&hints), "meta");
        hints.metadata_session_id = None;
        assert_eq!(store.resolve(&hints), "user");
    }

    #[test]
    fn resolve_generates_unique_ids() {
        let store = ConversationStore::new(TTL);
        let a = store.resolve(&SessionHints::default());
        let b = store.resolve(&SessionHints::default());
        assert!(a.starts_with("sess_"));
        assert_eq!(a.len(), "sess_".len() + 36);
        assert_ne!(a, b);
    }

    #[test]
    fn update_only_overwrites_present_fields() {
        let store = ConversationStore::new(TTL);
        store.update("s", &state(Some("c1"), Some("m1"), Some("sys")));
        store.update("s", &state(None, Some("m2"), None));
        assert_eq!(store.get("s"), Some(state(Some("c1"), Some("m2"), Some("sys"))));
    }

    #[test]
    fn merge_prefers_request_fields() {
        let stored = state(Some("c1"), Some("m1"), Some("old"));
        let request = state(None, Some("m9"), None);
        assert_eq!(
            request.merged_with(Some(&stored)),
            state(Some("c1"), Some("m9"), Some("old"))
        );
        assert_eq!(request.merged_with(None), request);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = ConversationStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.update_at("s", &state(Some("c"), None, None), start);
        assert!(store.get_at("s", start + Duration::from_secs(59)).is_some());
        // The read above refreshed the entry.
        assert!(store.get_at("s", start + Duration::from_secs(118)).is_some());
        assert_eq!(store.get_at("s", start + Duration::from_secs(179)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn any_operation_sweeps() {
        let store = ConversationStore::new(Duration::from_secs(10));
        let start = Instant::now();
        store.update_at("a", &state(Some("c"), None, None), start);
        store.update_at("b", &state(Some("c"), None, None), start + Duration::from_secs(5));
        assert!(!store.reset_at("zzz", start + Duration::from_secs(12)));
        assert_eq!(store.len(), 1);
        let _ = store.resolve_at(&SessionHints::default(), start + Duration::from_secs(30));
        assert!(store.is_empty());
    }

    #[test]
    fn len_counts_only_live_sessions() {
        let store = ConversationStore::new(Duration::from_secs(10));
        let start = Instant::now();
        store.update_at("a", &state(Some("c"), None, None), start);
        store.update_at("b", &state(Some("c"), None, None), start + Duration::from_secs(8));
        assert_eq!(store.len_at(start + Duration::from_secs(9)), 2);
        assert_eq!(store.len_at(start + Duration::from_secs(15)), 1);
        assert_eq!(store.entries.lock().len(), 1);
    }

    #[test]
    fn reset_removes_entry() {
        let store = ConversationStore::new(TTL);
        store.update("s", &state(Some("c"), None, None));
        assert!(store.reset("s"));
        assert!(!store.reset("s"));
        assert_eq!(store.get("s"), None);
    }
}
