//! Reconciles the verification provider's decision with the local flow.
//!
//! A session becomes active either from the return deep link or from the
//! session slot left by a previous run. The reconciler fetches its result once
//! right away, then polls at a fixed interval until the session reaches a
//! terminal status. Fetches never overlap: the next tick is only awaited after
//! the previous fetch returned.
//!
//! Outcomes are delivered as [`ReconcilerEvent`]s on a channel owned by the
//! returned [`PollHandle`]. At most one terminal event is produced per
//! session. Cancelling the handle stops polling and drops any result that is
//! still in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use super::error::RejectReason;
use super::form_cache::FormCache;
use super::types::{SessionStatus, VerifiedIdentity};
use super::verification::{session_id_from_callback, VerificationClient};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcilerEvent {
    Approved {
        session_id: String,
        identity: VerifiedIdentity,
    },
    Rejected {
        session_id: String,
        reason: RejectReason,
    },
}

impl ReconcilerEvent {
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Approved { session_id, .. } | Self::Rejected { session_id, .. } => session_id,
        }
    }
}

#[derive(Clone)]
pub struct CallbackReconciler {
    client: VerificationClient,
    cache: FormCache,
    poll_interval: Duration,
}

impl CallbackReconciler {
    #[must_use]
    pub fn new(client: VerificationClient, cache: FormCache, poll_interval: Duration) -> Self {
        Self {
            client,
            cache,
            poll_interval,
        }
    }

    /// Pick the session to resume.
    ///
    /// The id on the inbound callback wins over the cached one and replaces it
    /// in the session slot.
    pub async fn discover(&self, callback: Option<&Url>) -> Option<String> {
        let cached = self.cache.pending_session().await;

        match callback.and_then(session_id_from_callback) {
            Some(inbound) => {
                if cached.as_deref() != Some(inbound.as_str()) {
                    if let Some(cached) = &cached {
                        info!(%cached, %inbound, "callback session replaces cached session");
                    }
                    self.cache.remember_session(&inbound).await;
                }
                Some(inbound)
            }
            None => cached,
        }
    }

    /// Discover the active session and start polling it, if there is one.
    pub async fn mount(&self, callback: Option<&Url>) -> Option<PollHandle> {
        let session_id = self.discover(callback).await?;
        Some(self.spawn(session_id))
    }

    /// Start polling `session_id`.
    #[must_use]
    pub fn spawn(&self, session_id: String) -> PollHandle {
        let (events_tx, events_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let torn_down = Arc::new(AtomicBool::new(false));

        let poller = Poller {
            client: self.client.clone(),
            cache: self.cache.clone(),
            session_id: session_id.clone(),
            poll_interval: self.poll_interval,
            events: events_tx,
            torn_down: Arc::clone(&torn_down),
        };
        let task = tokio::spawn(poller.run(shutdown_rx));

        PollHandle {
            session_id,
            events: events_rx,
            shutdown: shutdown_tx,
            torn_down,
            task,
        }
    }
}

impl std::fmt::Debug for CallbackReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackReconciler")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

struct Poller {
    client: VerificationClient,
    cache: FormCache,
    session_id: String,
    poll_interval: Duration,
    events: mpsc::Sender<ReconcilerEvent>,
    torn_down: Arc<AtomicBool>,
}

impl Poller {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let session_id = self.session_id.as_str();

        // The first tick completes immediately, giving the resume fetch.
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.client.fetch_result(session_id) => result,
            };

            if self.torn_down.load(Ordering::SeqCst) {
                debug!(%session_id, "discarding result fetched after teardown");
                break;
            }

            let session = match result {
                Ok(session) => session,
                Err(err) => {
                    warn!(%session_id, "Failed to fetch verification result, will retry: {err}");
                    continue;
                }
            };

            let event = match session.status {
                SessionStatus::Created | SessionStatus::Pending => continue,
                SessionStatus::Approved => {
                    match session
                        .verified_fields
                        .as_ref()
                        .and_then(|fields| fields.complete(session_id))
                    {
                        Some(identity) => ReconcilerEvent::Approved {
                            session_id: session_id.to_string(),
                            identity,
                        },
                        None => {
                            warn!(%session_id, "approved session is missing identity fields");
                            self.reject(RejectReason::IncompleteIdentity).await
                        }
                    }
                }
                SessionStatus::Declined => self.reject(RejectReason::Declined).await,
                SessionStatus::Expired => self.reject(RejectReason::Expired).await,
            };

            if !self.torn_down.load(Ordering::SeqCst) && self.events.send(event).await.is_err() {
                debug!(%session_id, "event receiver dropped");
            }
            break;
        }

        debug!(%session_id, "verification polling stopped");
    }

    async fn reject(&self, reason: RejectReason) -> ReconcilerEvent {
        self.cache.forget_session().await;
        info!(session_id = %self.session_id, ?reason, "verification rejected");
        ReconcilerEvent::Rejected {
            session_id: self.session_id.clone(),
            reason,
        }
    }
}

/// Running poll loop for one session. Dropping it tears the loop down.
#[derive(Debug)]
pub struct PollHandle {
    session_id: String,
    events: mpsc::Receiver<ReconcilerEvent>,
    shutdown: watch::Sender<bool>,
    torn_down: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the terminal event. Returns `None` once cancelled or after the
    /// terminal event was consumed.
    pub async fn next_event(&mut self) -> Option<ReconcilerEvent> {
        if self.torn_down.load(Ordering::SeqCst) {
            return None;
        }
        let event = self.events.recv().await?;
        if self.torn_down.load(Ordering::SeqCst) {
            return None;
        }
        Some(event)
    }

    /// Stop polling and discard anything not yet delivered.
    pub fn cancel(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryStorage, MockVerificationProvider};
    use crate::registration::types::VerifiedFields;
    use anyhow::Result;

    const POLL: Duration = Duration::from_secs(3);

    fn fields() -> VerifiedFields {
        VerifiedFields {
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            date_of_birth: Some("1990-01-01".to_string()),
            document_number: Some("D123".to_string()),
        }
    }

    fn reconciler(provider: Arc<MockVerificationProvider>) -> (FormCache, CallbackReconciler) {
        let cache = FormCache::new(Arc::new(MemoryStorage::new()), Duration::from_millis(500));
        let client = VerificationClient::new(provider, cache.clone());
        (cache.clone(), CallbackReconciler::new(client, cache, POLL))
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_event_is_delivered_once() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.script("s-1", SessionStatus::Pending, None);
        provider.script("s-1", SessionStatus::Pending, None);
        provider.script("s-1", SessionStatus::Approved, Some(fields()));
        let (_cache, reconciler) = reconciler(provider.clone());

        let mut handle = reconciler.spawn("s-1".to_string());
        let event = handle.next_event().await;
        assert!(matches!(
            event,
            Some(ReconcilerEvent::Approved { ref identity, .. }) if identity.document_number == "D123"
        ));
        assert_eq!(provider.polls("s-1"), 3);

        // Terminal status is sticky at the provider, but polling has stopped.
        tokio::time::sleep(POLL * 5).await;
        assert_eq!(provider.polls("s-1"), 3);
        assert!(handle.next_event().await.is_none());
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_are_spaced_by_interval() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.script("s-1", SessionStatus::Pending, None);
        let (_cache, reconciler) = reconciler(provider.clone());

        let handle = reconciler.spawn("s-1".to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(provider.polls("s-1"), 1);

        tokio::time::sleep(POLL).await;
        assert_eq!(provider.polls("s-1"), 2);

        handle.cancel();
        tokio::time::sleep(POLL * 3).await;
        assert_eq!(provider.polls("s-1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_clears_session_slot() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.script("s-1", SessionStatus::Declined, None);
        let (cache, reconciler) = reconciler(provider);
        cache.remember_session("s-1").await;

        let mut handle = reconciler.spawn("s-1".to_string());
        assert_eq!(
            handle.next_event().await,
            Some(ReconcilerEvent::Rejected {
                session_id: "s-1".to_string(),
                reason: RejectReason::Declined,
            })
        );
        assert!(cache.pending_session().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn approved_without_document_number_is_rejected() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.script(
            "s-1",
            SessionStatus::Approved,
            Some(VerifiedFields {
                document_number: None,
                ..fields()
            }),
        );
        let (cache, reconciler) = reconciler(provider);
        cache.remember_session("s-1").await;

        let mut handle = reconciler.spawn("s-1".to_string());
        assert_eq!(
            handle.next_event().await,
            Some(ReconcilerEvent::Rejected {
                session_id: "s-1".to_string(),
                reason: RejectReason::IncompleteIdentity,
            })
        );
        assert!(cache.pending_session().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_errors_keep_polling() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.fail_next("s-1", "gateway timeout");
        provider.script("s-1", SessionStatus::Expired, None);
        let (_cache, reconciler) = reconciler(provider.clone());

        let mut handle = reconciler.spawn("s-1".to_string());
        let event = handle.next_event().await;
        assert_eq!(
            event.map(|event| event.session_id().to_string()),
            Some("s-1".to_string())
        );
        assert_eq!(provider.polls("s-1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_session_is_treated_as_expired() {
        let provider = Arc::new(MockVerificationProvider::new());
        let (cache, reconciler) = reconciler(provider.clone());
        cache.remember_session("gone").await;

        let mut handle = reconciler.spawn("gone".to_string());
        assert_eq!(
            handle.next_event().await,
            Some(ReconcilerEvent::Rejected {
                session_id: "gone".to_string(),
                reason: RejectReason::Expired,
            })
        );
        assert_eq!(provider.polls("gone"), 1);
        assert!(cache.pending_session().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_in_flight_result() {
        let provider = Arc::new(MockVerificationProvider::new());
        provider.set_latency(Duration::from_secs(2));
        provider.script("s-1", SessionStatus::Approved, Some(fields()));
        let (_cache, reconciler) = reconciler(provider.clone());

        let mut handle = reconciler.spawn("s-1".to_string());
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(handle.next_event().await.is_none());
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn callback_session_takes_precedence() -> Result<()> {
        let provider = Arc::new(MockVerificationProvider::new());
        let (cache, reconciler) = reconciler(provider);
        cache.remember_session("old").await;

        let callback = Url::parse("sovs://verify?session_id=new")?;
        assert_eq!(
            reconciler.discover(Some(&callback)).await.as_deref(),
            Some("new")
        );
        assert_eq!(cache.pending_session().await.as_deref(), Some("new"));

        assert_eq!(reconciler.discover(None).await.as_deref(), Some("new"));
        Ok(())
    }

    #[tokio::test]
    async fn nothing_to_mount_without_session() {
        let provider = Arc::new(MockVerificationProvider::new());
        let (_cache, reconciler) = reconciler(provider);
        assert!(reconciler.mount(None).await.is_none());
    }
}
