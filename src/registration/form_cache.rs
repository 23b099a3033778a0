//! Durable form cache for in-flight registration drafts.
//!
//! Drafts live in a single storage slot tagged with the verification session
//! id they belong to. A draft is only handed back for the session that wrote
//! it; anything else found in the slot is purged. Edits are coalesced in
//! memory and written at most once per debounce window.
//!
//! Storage failures never reach callers: they are logged and treated as "no
//! data", so the registration flow degrades to an empty form instead of
//! failing.
//!
//! The cache also owns the fixed slot remembering the verification session
//! that is in progress, so it can be resumed after a reload.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{DraftPatch, RegistrationDraft};
use crate::backend::DurableStorage;

pub const DRAFT_KEY: &str = "sovs.registration.draft";
pub const SESSION_KEY: &str = "sovs.registration.session";

#[derive(Clone)]
pub struct FormCache {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn DurableStorage>,
    debounce: Duration,
    state: Mutex<CacheState>,
    // Serializes storage access so a clear can never be overtaken by a late write.
    io: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct CacheState {
    current: Option<RegistrationDraft>,
    dirty: bool,
    timer: Option<JoinHandle<()>>,
    // Latest cleared session; saves for it are dropped.
    cleared: Option<String>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write_pending(&self) {
        let _io = self.io.lock().await;

        let draft = {
            let mut state = self.lock_state();
            if !state.dirty {
                return;
            }
            state.dirty = false;
            state.current.clone()
        };

        let Some(draft) = draft else {
            return;
        };

        match serde_json::to_string(&draft) {
            Ok(encoded) => {
                if let Err(err) = self.storage.set(DRAFT_KEY, &encoded).await {
                    warn!("Failed to persist registration draft: {err}");
                } else {
                    debug!(session_id = %draft.session_id, "registration draft persisted");
                }
            }
            Err(err) => warn!("Failed to encode registration draft: {err}"),
        }
    }

    /// Read the stored draft for `session_id`, purging a draft that belongs to another session.
    async fn read_draft(&self, session_id: &str) -> Option<RegistrationDraft> {
        let _io = self.io.lock().await;

        let raw = match self.storage.get(DRAFT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to read registration draft: {err}");
                return None;
            }
        };

        match serde_json::from_str::<RegistrationDraft>(&raw) {
            Ok(draft) if draft.session_id == session_id => Some(draft),
            Ok(draft) => {
                debug!(
                    stored = %draft.session_id,
                    requested = %session_id,
                    "discarding draft from another session"
                );
                self.remove_draft().await;
                None
            }
            Err(err) => {
                warn!("Discarding unreadable registration draft: {err}");
                self.remove_draft().await;
                None
            }
        }
    }

    async fn remove_draft(&self) {
        if let Err(err) = self.storage.remove(DRAFT_KEY).await {
            warn!("Failed to remove registration draft: {err}");
        }
    }
}

impl FormCache {
    #[must_use]
    pub fn new(storage: Arc<dyn DurableStorage>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                debounce,
                state: Mutex::new(CacheState::default()),
                io: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Merge `patch` into the draft for `session_id` and schedule a write.
    pub async fn save(&self, session_id: &str, patch: DraftPatch) {
        let in_memory = {
            let state = self.inner.lock_state();
            if state.cleared.as_deref() == Some(session_id) {
                debug!(%session_id, "ignoring save for cleared session");
                return;
            }
            state
                .current
                .as_ref()
                .is_some_and(|draft| draft.session_id == session_id)
        };

        let stored = if in_memory {
            None
        } else {
            self.inner.read_draft(session_id).await
        };

        let mut state = self.inner.lock_state();
        if state.cleared.as_deref() == Some(session_id) {
            return;
        }

        let mut draft = match state.current.take() {
            Some(draft) if draft.session_id == session_id => draft,
            _ => stored.unwrap_or_else(|| RegistrationDraft::new(session_id)),
        };
        draft.apply(patch);
        state.current = Some(draft);
        state.dirty = true;

        if state.timer.as_ref().map_or(true, JoinHandle::is_finished) {
            state.timer = Some(self.arm_timer());
        }
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.lock_state().timer = None;
            inner.write_pending().await;
        })
    }

    /// Return the draft saved for `session_id`, if any.
    pub async fn load(&self, session_id: &str) -> Option<RegistrationDraft> {
        {
            let mut state = self.inner.lock_state();
            if state.cleared.as_deref() == Some(session_id) {
                return None;
            }
            match &state.current {
                Some(draft) if draft.session_id == session_id => return Some(draft.clone()),
                Some(_) => {
                    if let Some(timer) = state.timer.take() {
                        timer.abort();
                    }
                    state.current = None;
                    state.dirty = false;
                }
                None => {}
            }
        }

        let stored = self.inner.read_draft(session_id).await;

        let mut state = self.inner.lock_state();
        if state.cleared.as_deref() == Some(session_id) {
            return None;
        }
        if state.current.is_none() {
            state.current.clone_from(&stored);
        }
        stored
    }

    /// Write any pending edits now instead of waiting for the debounce window.
    pub async fn flush(&self) {
        if let Some(timer) = self.inner.lock_state().timer.take() {
            timer.abort();
        }
        self.inner.write_pending().await;
    }

    /// Remove the draft for `session_id`; later saves for it are ignored.
    pub async fn clear(&self, session_id: &str) {
        {
            let mut state = self.inner.lock_state();
            state.cleared = Some(session_id.to_string());
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if state
                .current
                .as_ref()
                .is_some_and(|draft| draft.session_id == session_id)
            {
                state.current = None;
                state.dirty = false;
            }
        }

        let _io = self.inner.io.lock().await;
        let belongs_to_session = match self.inner.storage.get(DRAFT_KEY).await {
            Ok(Some(raw)) => serde_json::from_str::<RegistrationDraft>(&raw)
                .map_or(true, |draft| draft.session_id == session_id),
            Ok(None) => false,
            Err(err) => {
                warn!("Failed to read registration draft before clearing: {err}");
                true
            }
        };
        if belongs_to_session {
            self.inner.remove_draft().await;
        }
        debug!(%session_id, "registration draft cleared");
    }

    /// Remember the verification session in progress.
    pub async fn remember_session(&self, session_id: &str) {
        if let Err(err) = self.inner.storage.set(SESSION_KEY, session_id).await {
            warn!("Failed to remember verification session: {err}");
        }
    }

    /// Verification session left in progress by a previous run, if any.
    pub async fn pending_session(&self) -> Option<String> {
        match self.inner.storage.get(SESSION_KEY).await {
            Ok(value) => value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            Err(err) => {
                warn!("Failed to read verification session: {err}");
                None
            }
        }
    }

    pub async fn forget_session(&self) {
        if let Err(err) = self.inner.storage.remove(SESSION_KEY).await {
            warn!("Failed to forget verification session: {err}");
        }
    }
}

impl std::fmt::Debug for FormCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormCache")
            .field("debounce", &self.inner.debounce)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryStorage;
    use anyhow::Result;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    fn cache() -> (Arc<MemoryStorage>, FormCache) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = FormCache::new(storage.clone(), DEBOUNCE);
        (storage, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_edits_coalesce_into_one_write() {
        let (storage, cache) = cache();

        for phone in ["+1", "+15", "+155", "+1555", "+15550000"] {
            cache
                .save("s-1", DraftPatch::contact(phone, "ada@example.com"))
                .await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(storage.writes(DRAFT_KEY), 0);

        tokio::time::sleep(DEBOUNCE).await;
        assert_eq!(storage.writes(DRAFT_KEY), 1);

        let stored = storage.value(DRAFT_KEY).unwrap_or_default();
        let draft: RegistrationDraft = serde_json::from_str(&stored).unwrap_or_else(|_| RegistrationDraft::new("broken"));
        assert_eq!(draft.session_id, "s-1");
        assert_eq!(draft.phone_number, "+15550000");
    }

    #[tokio::test(start_paused = true)]
    async fn load_never_returns_another_sessions_draft() {
        let (storage, cache) = cache();
        cache.save("s-1", DraftPatch::contact("+15550000", "")).await;
        cache.flush().await;
        assert!(storage.value(DRAFT_KEY).is_some());

        // A fresh cache, as after a reload.
        let reloaded = FormCache::new(storage.clone(), DEBOUNCE);
        assert!(reloaded.load("s-2").await.is_none());
        assert!(storage.value(DRAFT_KEY).is_none());
        assert!(reloaded.load("s-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unflushed_draft_is_isolated_too() {
        let (_storage, cache) = cache();
        cache.save("s-1", DraftPatch::contact("+15550000", "")).await;
        assert!(cache.load("s-2").await.is_none());
        assert!(cache.load("s-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn draft_survives_reload_for_same_session() {
        let (storage, cache) = cache();
        cache
            .save("s-1", DraftPatch::contact("+15550000", "ada@example.com"))
            .await;
        tokio::time::sleep(DEBOUNCE * 2).await;

        let reloaded = FormCache::new(storage, DEBOUNCE);
        let draft = reloaded.load("s-1").await;
        assert_eq!(
            draft.as_ref().map(|draft| draft.phone_number.as_str()),
            Some("+15550000")
        );
        assert_eq!(
            draft.and_then(|draft| draft.email),
            Some("ada@example.com".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_pending_write_and_is_final() {
        let (storage, cache) = cache();
        cache.save("s-1", DraftPatch::contact("+15550000", "")).await;
        cache.clear("s-1").await;

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(storage.writes(DRAFT_KEY), 0);

        cache.save("s-1", DraftPatch::contact("+15559999", "")).await;
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(storage.writes(DRAFT_KEY), 0);
        assert!(cache.load("s-1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_persisted_draft() {
        let (storage, cache) = cache();
        cache.save("s-1", DraftPatch::contact("+15550000", "")).await;
        cache.flush().await;
        cache.clear("s-1").await;
        assert!(storage.value(DRAFT_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failures_degrade_to_empty() {
        let storage = Arc::new(MemoryStorage::failing());
        let cache = FormCache::new(storage, DEBOUNCE);

        cache.save("s-1", DraftPatch::contact("+15550000", "")).await;
        cache.flush().await;
        cache.remember_session("s-1").await;

        assert!(cache.pending_session().await.is_none());
        // The in-memory copy is still served for the active session.
        assert!(cache.load("s-1").await.is_some());
        let reloaded = FormCache::new(Arc::new(MemoryStorage::failing()), DEBOUNCE);
        assert!(reloaded.load("s-1").await.is_none());
    }

    #[tokio::test]
    async fn session_slot_round_trip() -> Result<()> {
        let (storage, cache) = cache();
        assert!(cache.pending_session().await.is_none());

        cache.remember_session("s-1").await;
        assert_eq!(cache.pending_session().await.as_deref(), Some("s-1"));
        assert_eq!(storage.value(SESSION_KEY).as_deref(), Some("s-1"));

        cache.forget_session().await;
        assert!(cache.pending_session().await.is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_latest_cleared_session_is_tracked() {
        let (storage, cache) = cache();
        cache.clear("s-1").await;
        cache.clear("s-2").await;
        assert_eq!(cache.inner.lock_state().cleared.as_deref(), Some("s-2"));

        cache.save("s-2", DraftPatch::contact("+15550000", "")).await;
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(storage.writes(DRAFT_KEY), 0);
        assert!(cache.load("s-2").await.is_none());
    }
}
