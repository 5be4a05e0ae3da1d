//! In-memory message source
//!
//! Single-process outbound bus for development, tests and the demo server.
//! Per-session mailboxes hold queued messages, pending correlated requests
//! and replies that have arrived but not yet been consumed.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::MessageSource;
use crate::error::Result;
use crate::types::{OutgoingMessage, PeerReply, PendingRequest, RequestId, SessionId};

#[derive(Debug, Default)]
struct Mailbox {
    outgoing: VecDeque<OutgoingMessage>,
    pending: IndexMap<RequestId, PendingRequest>,
    replies: HashMap<RequestId, PeerReply>,
}

impl Mailbox {
    fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.pending.is_empty() && self.replies.is_empty()
    }
}

/// Counters exposed for monitoring and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub queued: usize,
    pub pending: usize,
    pub replies: usize,
}

/// In-memory implementation of `MessageSource`
pub struct MemoryMessageSource {
    mailboxes: Mutex<HashMap<SessionId, Mailbox>>,
    next_request_id: AtomicI64,
}

impl Default for MemoryMessageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMessageSource {
    pub fn new() -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            next_request_id: AtomicI64::new(1),
        }
    }

    /// Allocate a request id for a server-to-client request
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a message for delivery to a session
    pub async fn enqueue(&self, session_id: &SessionId, message: OutgoingMessage) {
        let mut mailboxes = self.mailboxes.lock().await;
        mailboxes
            .entry(*session_id)
            .or_default()
            .outgoing
            .push_back(message);
    }

    /// Queue a correlated request and start tracking it as pending
    pub async fn send_request(
        &self,
        session_id: &SessionId,
        request_id: RequestId,
        payload: impl Into<String>,
        timeout: Duration,
    ) {
        let pending = PendingRequest::new(request_id.clone()).with_timeout(timeout);
        self.track_request(session_id, pending, payload).await;
    }

    /// Queue a correlated request with an explicit pending record
    ///
    /// Lets callers backdate the issue timestamp.
    pub async fn track_request(
        &self,
        session_id: &SessionId,
        pending: PendingRequest,
        payload: impl Into<String>,
    ) {
        let mut mailboxes = self.mailboxes.lock().await;
        let mailbox = mailboxes.entry(*session_id).or_default();
        mailbox.outgoing.push_back(OutgoingMessage::request(
            payload,
            pending.request_id.clone(),
        ));
        mailbox.pending.insert(pending.request_id.clone(), pending);
    }

    /// Record the peer's reply to a pending request
    ///
    /// Returns false, dropping the reply, when nothing is pending under
    /// that id for the session.
    pub async fn deliver_reply(
        &self,
        session_id: &SessionId,
        request_id: RequestId,
        reply: PeerReply,
    ) -> bool {
        let mut mailboxes = self.mailboxes.lock().await;
        match mailboxes.get_mut(session_id) {
            Some(mailbox) if mailbox.pending.contains_key(&request_id) => {
                mailbox.replies.insert(request_id, reply);
                true
            }
            _ => {
                tracing::debug!(
                    session_id = %session_id,
                    request_id = %request_id,
                    "Dropping reply for unknown request"
                );
                false
            }
        }
    }

    /// Forget everything held for a session; idempotent
    pub async fn clear_session(&self, session_id: &SessionId) -> bool {
        self.mailboxes.lock().await.remove(session_id).is_some()
    }

    /// Mailbox counters for a session
    pub async fn stats(&self, session_id: &SessionId) -> MailboxStats {
        let mailboxes = self.mailboxes.lock().await;
        mailboxes
            .get(session_id)
            .map(|m| MailboxStats {
                queued: m.outgoing.len(),
                pending: m.pending.len(),
                replies: m.replies.len(),
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageSource for MemoryMessageSource {
    async fn outgoing_messages(&self, session_id: &SessionId) -> Result<Vec<OutgoingMessage>> {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(session_id) else {
            return Ok(Vec::new());
        };
        let messages: Vec<OutgoingMessage> = mailbox.outgoing.drain(..).collect();
        if mailbox.is_empty() {
            mailboxes.remove(session_id);
        }
        Ok(messages)
    }

    async fn pending_requests(&self, session_id: &SessionId) -> Result<Vec<PendingRequest>> {
        let mailboxes = self.mailboxes.lock().await;
        Ok(mailboxes
            .get(session_id)
            .map(|m| m.pending.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn reply_for(
        &self,
        request_id: &RequestId,
        session_id: &SessionId,
    ) -> Result<Option<PeerReply>> {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(session_id) else {
            return Ok(None);
        };
        let reply = mailbox.replies.remove(request_id);
        if reply.is_some() {
            mailbox.pending.shift_remove(request_id);
        }
        if mailbox.is_empty() {
            mailboxes.remove(session_id);
        }
        Ok(reply)
    }

    async fn discard_request(&self, request_id: &RequestId, session_id: &SessionId) -> Result<()> {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(session_id) else {
            return Ok(());
        };
        mailbox.pending.shift_remove(request_id);
        mailbox.replies.remove(request_id);
        if mailbox.is_empty() {
            mailboxes.remove(session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageKind;

    #[tokio::test]
    async fn test_outgoing_drains_in_order() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();

        source.enqueue(&session, OutgoingMessage::notification("1")).await;
        source.enqueue(&session, OutgoingMessage::notification("2")).await;

        let drained = source.outgoing_messages(&session).await.unwrap();
        assert_eq!(
            drained.iter().map(|m| m.payload.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
        assert!(source.outgoing_messages(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let source = MemoryMessageSource::new();
        let a = SessionId::new();
        let b = SessionId::new();

        source.enqueue(&a, OutgoingMessage::notification("for-a")).await;

        assert!(source.outgoing_messages(&b).await.unwrap().is_empty());
        assert_eq!(source.outgoing_messages(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_request_queues_and_tracks() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();
        let id = source.next_request_id();

        source
            .send_request(&session, id.clone(), "{}", Duration::from_secs(5))
            .await;

        let queued = source.outgoing_messages(&session).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].context.kind, MessageKind::Request);
        assert_eq!(queued[0].context.correlation_id, Some(id.clone()));

        let pending = source.pending_requests(&session).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, id);
        assert_eq!(pending[0].timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reply_consumed_once() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();
        let id = source.next_request_id();
        source
            .send_request(&session, id.clone(), "{}", Duration::from_secs(5))
            .await;

        assert!(source.reply_for(&id, &session).await.unwrap().is_none());
        assert!(
            source
                .deliver_reply(&session, id.clone(), PeerReply::Result(serde_json::json!(1)))
                .await
        );

        let reply = source.reply_for(&id, &session).await.unwrap();
        assert_eq!(reply, Some(PeerReply::Result(serde_json::json!(1))));
        assert!(source.reply_for(&id, &session).await.unwrap().is_none());
        assert!(source.pending_requests(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_for_unknown_request_dropped() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();

        let accepted = source
            .deliver_reply(&session, RequestId::Number(42), PeerReply::Result(serde_json::json!(null)))
            .await;
        assert!(!accepted);
        assert_eq!(source.stats(&session).await, MailboxStats::default());
    }

    #[tokio::test]
    async fn test_discard_request_refuses_late_reply() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();
        let first = source.next_request_id();
        let second = source.next_request_id();
        source
            .send_request(&session, first.clone(), "{}", Duration::from_secs(5))
            .await;
        source
            .send_request(&session, second.clone(), "{}", Duration::from_secs(5))
            .await;
        source.outgoing_messages(&session).await.unwrap();

        source.discard_request(&first, &session).await.unwrap();

        let pending = source.pending_requests(&session).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, second);
        assert!(
            !source
                .deliver_reply(&session, first.clone(), PeerReply::Result(serde_json::json!(1)))
                .await
        );
        assert_eq!(source.stats(&session).await.replies, 0);
    }

    #[tokio::test]
    async fn test_discard_request_drops_stored_reply_and_empty_mailbox() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();
        let id = source.next_request_id();
        source
            .send_request(&session, id.clone(), "{}", Duration::from_secs(5))
            .await;
        source.outgoing_messages(&session).await.unwrap();
        assert!(
            source
                .deliver_reply(&session, id.clone(), PeerReply::Result(serde_json::json!(1)))
                .await
        );

        source.discard_request(&id, &session).await.unwrap();
        source.discard_request(&id, &session).await.unwrap();

        assert_eq!(source.stats(&session).await, MailboxStats::default());
        assert!(source.reply_for(&id, &session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_session_idempotent() {
        let source = MemoryMessageSource::new();
        let session = SessionId::new();
        source.enqueue(&session, OutgoingMessage::notification("x")).await;

        assert!(source.clear_session(&session).await);
        assert!(!source.clear_session(&session).await);
        assert!(source.outgoing_messages(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_ids_increment() {
        let source = MemoryMessageSource::new();
        assert_eq!(source.next_request_id(), RequestId::Number(1));
        assert_eq!(source.next_request_id(), RequestId::Number(2));
    }
}
