//! Tick scheduler, the only place suspended computations are resumed
//!
//! A periodic pass flushes queued messages into open streams, then advances
//! each registered session according to its wait-status. The tick loop runs
//! only while the registry is non-empty: `ensure_running` starts it on
//! registration and `maybe_stop` cancels it at the end of a tick that finds
//! nothing left to drive.

use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::registry::Session;
use crate::transport::{deliver, Transport, TransportState};
use crate::types::{ComputationStatus, RequestId, Resume, SessionId, WaitStatus};

/// What a tick decided to do with one session
enum Step {
    Finalize,
    Resume(Resume),
    ScanPending(HashSet<RequestId>),
    Idle,
}

impl Transport {
    /// Run one scheduler pass
    ///
    /// Streams are flushed before any resume is attempted; sessions are
    /// then advanced in registration order. Returns false once the tick
    /// loop has been stopped because no computation is registered.
    pub async fn tick(&self) -> bool {
        let mut state = self.lock_state().await;

        self.flush_streams(&mut state).await;

        for session_id in state.registry.session_ids() {
            self.advance(&mut state, &session_id).await;
        }

        !self.maybe_stop(&mut state)
    }

    /// Start the tick loop unless it is already running
    pub(crate) fn ensure_running(&self, state: &mut TransportState) {
        if state.ticker.as_ref().is_some_and(|ticker| !ticker.is_finished()) {
            return;
        }

        let period = self.config().tick_interval();
        tracing::info!(
            period_ms = period.as_millis() as u64,
            "First managed computation registered. Starting tick loop."
        );
        let transport = self.clone();
        state.ticker = Some(tokio::spawn(async move {
            transport.run_ticker(period).await;
        }));
    }

    /// Cancel the tick loop when the registry is empty; true if stopped
    pub(crate) fn maybe_stop(&self, state: &mut TransportState) -> bool {
        if !state.registry.is_empty() {
            return false;
        }
        if let Some(ticker) = state.ticker.take() {
            tracing::info!("No managed computations left. Stopping tick loop.");
            ticker.abort();
        }
        true
    }

    /// Whether the tick loop is currently scheduled
    pub async fn is_ticking(&self) -> bool {
        let state = self.lock_state().await;
        state.ticker.as_ref().is_some_and(|ticker| !ticker.is_finished())
    }

    async fn run_ticker(self, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !self.tick().await {
                break;
            }
        }
    }

    async fn flush_streams(&self, state: &mut TransportState) {
        for session_id in state.registry.writable_session_ids() {
            let messages = match self.source().outgoing_messages(&session_id).await {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to fetch outgoing messages");
                    continue;
                }
            };
            if messages.is_empty() {
                continue;
            }
            if let Some(session) = state.registry.get_mut(&session_id) {
                deliver(session, &session_id, &messages);
            }
        }
    }

    async fn advance(&self, state: &mut TransportState, session_id: &SessionId) {
        let step = match state.registry.get(session_id) {
            Some(session) => next_step(session),
            None => return,
        };

        match step {
            Step::Idle => {}
            Step::Finalize => self.finalize(state, session_id).await,
            Step::Resume(value) => self.resume(state, session_id, value).await,
            Step::ScanPending(timed_out) => {
                if let Some(value) = self.scan_pending(session_id, &timed_out).await {
                    if let Resume::TimedOut { request_id, .. } = &value {
                        if let Some(session) = state.registry.get_mut(session_id) {
                            session.timed_out.insert(request_id.clone());
                        }
                        if let Err(e) =
                            self.source().discard_request(request_id, session_id).await
                        {
                            tracing::warn!(
                                session_id = %session_id,
                                request_id = %request_id,
                                error = %e,
                                "Failed to discard timed-out request"
                            );
                        }
                    }
                    self.resume(state, session_id, value).await;
                }
            }
        }
    }

    /// First pending request with a reply or an expired budget
    ///
    /// At most one resume per session per tick; later requests are picked
    /// up on following ticks.
    async fn scan_pending(
        &self,
        session_id: &SessionId,
        timed_out: &HashSet<RequestId>,
    ) -> Option<Resume> {
        let pending = match self.source().pending_requests(session_id).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to fetch pending requests");
                return None;
            }
        };

        let now = Utc::now();
        for request in pending {
            if timed_out.contains(&request.request_id) {
                continue;
            }

            match self.source().reply_for(&request.request_id, session_id).await {
                Ok(Some(reply)) => {
                    tracing::debug!(
                        session_id = %session_id,
                        request_id = %request.request_id,
                        "Reply received, resuming computation"
                    );
                    return Some(Resume::Reply(reply));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        request_id = %request.request_id,
                        error = %e,
                        "Failed to check for reply"
                    );
                }
            }

            if request.is_expired(now) {
                tracing::warn!(
                    session_id = %session_id,
                    request_id = %request.request_id,
                    timeout_secs = request.timeout.as_secs(),
                    "Request timed out, resuming computation with error"
                );
                return Some(Resume::TimedOut {
                    request_id: request.request_id,
                    timeout: request.timeout,
                });
            }
        }

        None
    }

    async fn resume(&self, state: &mut TransportState, session_id: &SessionId, value: Resume) {
        let terminated = {
            let Some(session) = state.registry.get_mut(session_id) else {
                return;
            };
            if let Err(e) = session.computation.resume(value).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to resume computation");
            }
            session.wait = WaitStatus::None;
            session.computation.status() == ComputationStatus::Terminated
        };

        if terminated {
            self.finalize(state, session_id).await;
        }
    }

    /// Deliver the final result, unregister the session and end its stream
    async fn finalize(&self, state: &mut TransportState, session_id: &SessionId) {
        let Some(session) = state.registry.get_mut(session_id) else {
            return;
        };
        let output = session.computation.take_output();

        // Messages queued before the computation returned go out first
        if session.has_writable_sink() {
            match self.source().outgoing_messages(session_id).await {
                Ok(messages) => deliver(session, session_id, &messages),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to flush before final result");
                }
            }
        }

        match output {
            Some(Ok(value)) if !value.is_null() => match serde_json::to_string(&value) {
                Ok(encoded) => {
                    let written = session
                        .sink
                        .as_ref()
                        .filter(|sink| sink.is_writable())
                        .is_some_and(|sink| sink.write_event(&encoded));
                    if !written {
                        tracing::warn!(
                            session_id = %session_id,
                            "Event stream closed before final result could be delivered"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Failed to encode final computation result");
                }
            },
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Computation ended with an error");
            }
            _ => {}
        }

        state.registry.remove(session_id);
        tracing::info!(session_id = %session_id, "Computation finished, session unregistered");
    }
}

fn next_step(session: &Session) -> Step {
    match session.computation.status() {
        ComputationStatus::Terminated => Step::Finalize,
        ComputationStatus::Running => Step::Idle,
        ComputationStatus::Suspended => match session.wait {
            WaitStatus::None => Step::Idle,
            WaitStatus::AwaitingNotificationResume => Step::Resume(Resume::Continue),
            WaitStatus::AwaitingResponse => Step::ScanPending(session.timed_out.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::continuation::TaskContinuation;
    use crate::error::Result;
    use crate::sink::decode_events;
    use crate::source::memory::MemoryMessageSource;
    use crate::source::{InboundOutcome, MessageSource, ProtocolHandler};
    use crate::transport::OutgoingReply;
    use crate::types::{OutgoingMessage, PeerReply, PendingRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct NoopHandler;

    #[async_trait]
    impl ProtocolHandler for NoopHandler {
        async fn handle_message(
            &self,
            _body: Bytes,
            _session_id: Option<SessionId>,
            _transport: &Transport,
        ) -> Result<InboundOutcome> {
            Ok(InboundOutcome::default())
        }

        async fn end_session(&self, _session_id: &SessionId) -> Result<()> {
            Ok(())
        }
    }

    fn transport_over(bus: &Arc<MemoryMessageSource>) -> Transport {
        let config = TransportConfig {
            tick_interval_ms: 3_600_000,
            ..Default::default()
        };
        Transport::new(config, bus.clone(), Arc::new(NoopHandler))
    }

    async fn open_stream(transport: &Transport, session: &SessionId) -> UnboundedReceiver<Bytes> {
        match transport.route_outgoing(session).await.unwrap() {
            OutgoingReply::Stream(rx) => rx,
            other => panic!("expected event stream, got {:?}", other),
        }
    }

    fn received(rx: &mut UnboundedReceiver<Bytes>) -> Vec<String> {
        let mut raw = String::new();
        while let Ok(frame) = rx.try_recv() {
            raw.push_str(std::str::from_utf8(&frame).unwrap());
        }
        decode_events(&raw).into_iter().map(|e| e.data).collect()
    }

    async fn sampling_task(bus: &Arc<MemoryMessageSource>, session: SessionId) -> TaskContinuation {
        let bus = bus.clone();
        TaskContinuation::start(move |mut s| async move {
            let id = bus.next_request_id();
            bus.send_request(&session, id, r#"{"method":"sample"}"#, Duration::from_secs(60))
                .await;
            let reply = s.suspend().await?.into_result();
            Ok(json!({ "final": reply.is_ok() }))
        })
        .await
    }

    #[tokio::test]
    async fn test_request_parks_until_reply() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();

        transport
            .register_suspendable(sampling_task(&bus, session).await, session)
            .await;
        let mut rx = open_stream(&transport, &session).await;
        assert_eq!(
            transport.wait_status(&session).await,
            Some(WaitStatus::AwaitingResponse)
        );

        assert!(transport.tick().await);
        assert!(transport.is_registered(&session).await);
        assert_eq!(
            transport.wait_status(&session).await,
            Some(WaitStatus::AwaitingResponse)
        );

        assert!(
            bus.deliver_reply(&session, RequestId::Number(1), PeerReply::Result(json!("ok")))
                .await
        );
        assert!(!transport.tick().await);
        assert!(!transport.is_registered(&session).await);

        let events = received(&mut rx);
        assert_eq!(events, vec![r#"{"method":"sample"}"#, r#"{"final":true}"#]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_request_queued_after_resume_sets_wait_on_next_flush() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();

        let task_bus = bus.clone();
        let task = TaskContinuation::start(move |mut s| async move {
            task_bus
                .enqueue(&session, OutgoingMessage::notification("progress"))
                .await;
            s.suspend().await?;
            task_bus
                .send_request(&session, RequestId::Number(5), "ask", Duration::from_secs(60))
                .await;
            s.suspend().await?;
            Ok(())
        })
        .await;
        transport.register_suspendable(task, session).await;
        let mut rx = open_stream(&transport, &session).await;
        assert_eq!(
            transport.wait_status(&session).await,
            Some(WaitStatus::AwaitingNotificationResume)
        );

        // Resumed with Continue; the request it queued is not flushed yet
        transport.tick().await;
        assert_eq!(transport.wait_status(&session).await, Some(WaitStatus::None));

        transport.tick().await;
        assert_eq!(
            transport.wait_status(&session).await,
            Some(WaitStatus::AwaitingResponse)
        );
        assert_eq!(received(&mut rx), vec!["progress", "ask"]);
    }

    #[tokio::test]
    async fn test_timeout_resumes_exactly_once() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();
        let resumes = Arc::new(AtomicUsize::new(0));

        let mut expired = PendingRequest::new(RequestId::Number(1)).with_timeout(Duration::from_secs(1));
        expired.timestamp = Utc::now() - chrono::Duration::seconds(2);
        bus.track_request(&session, expired, "first").await;

        let task_bus = bus.clone();
        let task_resumes = resumes.clone();
        let task = TaskContinuation::start(move |mut s| async move {
            let first = s.suspend().await?;
            task_resumes.fetch_add(1, Ordering::SeqCst);
            let timed_out = first.into_result().unwrap_err();
            assert_eq!(timed_out.id, Some(RequestId::Number(1)));
            assert_eq!(timed_out.error.message, "Request timed out after 1 seconds");

            task_bus
                .send_request(&session, RequestId::Number(2), "second", Duration::from_secs(60))
                .await;
            s.suspend().await?;
            task_resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        transport.register_suspendable(task, session).await;
        let _rx = open_stream(&transport, &session).await;

        transport.tick().await;
        assert_eq!(resumes.load(Ordering::SeqCst), 1);

        // The expired request is gone from the bus; only the second is pending
        let pending = bus.pending_requests(&session).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, RequestId::Number(2));

        // A late reply to the expired request is refused
        assert!(
            !bus.deliver_reply(&session, RequestId::Number(1), PeerReply::Result(json!("late")))
                .await
        );

        for _ in 0..3 {
            transport.tick().await;
        }
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.wait_status(&session).await,
            Some(WaitStatus::AwaitingResponse)
        );
        assert_eq!(bus.stats(&session).await.pending, 1);
        assert_eq!(bus.stats(&session).await.replies, 0);
    }

    #[tokio::test]
    async fn test_sessions_advance_independently_within_one_tick() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let a = SessionId::new();
        let b = SessionId::new();

        transport
            .register_suspendable(sampling_task(&bus, a).await, a)
            .await;
        let mut rx_a = open_stream(&transport, &a).await;

        let task_bus = bus.clone();
        let task = TaskContinuation::start(move |mut s| async move {
            task_bus.enqueue(&b, OutgoingMessage::notification("note")).await;
            s.suspend().await?;
            Ok("b done")
        })
        .await;
        transport.register_suspendable(task, b).await;
        let mut rx_b = open_stream(&transport, &b).await;

        bus.deliver_reply(&a, RequestId::Number(1), PeerReply::Result(json!({})))
            .await;
        assert!(!transport.tick().await);

        assert_eq!(transport.session_count().await, 0);
        assert_eq!(received(&mut rx_a).last().unwrap(), r#"{"final":true}"#);
        assert_eq!(received(&mut rx_b), vec!["note", r#""b done""#]);
    }

    #[tokio::test]
    async fn test_null_output_writes_no_final_event() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();

        let task_bus = bus.clone();
        let task = TaskContinuation::start(move |mut s| async move {
            task_bus.enqueue(&session, OutgoingMessage::notification("n")).await;
            s.suspend().await?;
            task_bus.enqueue(&session, OutgoingMessage::notification("last")).await;
            Ok(())
        })
        .await;
        transport.register_suspendable(task, session).await;
        let mut rx = open_stream(&transport, &session).await;

        transport.tick().await;
        // Queued before returning, flushed ahead of finalization
        assert_eq!(received(&mut rx), vec!["n", "last"]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_while_awaiting_then_late_reply() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();

        transport
            .register_suspendable(sampling_task(&bus, session).await, session)
            .await;
        let mut rx = open_stream(&transport, &session).await;

        transport.terminate_session(&session).await.unwrap();
        transport.terminate_session(&session).await.unwrap();
        assert!(!transport.is_registered(&session).await);
        received(&mut rx);
        assert!(rx.recv().await.is_none());

        bus.deliver_reply(&session, RequestId::Number(1), PeerReply::Result(json!(1)))
            .await;
        assert!(!transport.tick().await);
    }

    #[tokio::test]
    async fn test_ticker_starts_on_register_and_stops_when_empty() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        assert!(!transport.is_ticking().await);

        let session = SessionId::new();
        let task = TaskContinuation::start(|_s| async move { Ok(json!({"done": true})) }).await;
        transport.register_suspendable(task, session).await;
        assert!(transport.is_ticking().await);

        assert!(!transport.tick().await);
        assert!(!transport.is_ticking().await);
    }

    #[tokio::test]
    async fn test_final_result_dropped_without_stream() {
        let bus = Arc::new(MemoryMessageSource::new());
        let transport = transport_over(&bus);
        let session = SessionId::new();

        let task = TaskContinuation::start(|_s| async move { Ok(json!({"lost": true})) }).await;
        transport.register_suspendable(task, session).await;

        assert!(!transport.tick().await);
        assert!(!transport.is_registered(&session).await);
    }
}
