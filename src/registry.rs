//! Session registry
//!
//! Owns every session that has a registered suspendable computation,
//! together with its wait-status and its open stream, if any. Iteration
//! follows registration order.

use indexmap::IndexMap;
use std::collections::HashSet;

use crate::continuation::Continuation;
use crate::sink::StreamSink;
use crate::types::{RequestId, SessionId, WaitStatus};

/// One registered session
pub struct Session {
    pub(crate) computation: Box<dyn Continuation>,
    pub(crate) wait: WaitStatus,
    pub(crate) sink: Option<StreamSink>,
    /// Requests already resolved by timeout; never resumed again
    pub(crate) timed_out: HashSet<RequestId>,
}

impl Session {
    fn new(computation: Box<dyn Continuation>) -> Self {
        Self {
            computation,
            wait: WaitStatus::None,
            sink: None,
            timed_out: HashSet::new(),
        }
    }

    pub fn wait_status(&self) -> WaitStatus {
        self.wait
    }

    pub fn has_writable_sink(&self) -> bool {
        self.sink.as_ref().is_some_and(StreamSink::is_writable)
    }

    /// End and drop the attached stream, if any
    pub(crate) fn close_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.end();
        }
    }
}

/// Session id → registered session, in registration order
#[derive(Default)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a computation, replacing any previous one for the session
    ///
    /// Wait-status is reset; an attached stream is kept. Returns true when
    /// a previous computation was replaced.
    pub fn register(&mut self, session_id: SessionId, computation: Box<dyn Continuation>) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.computation = computation;
                session.wait = WaitStatus::None;
                session.timed_out.clear();
                true
            }
            None => {
                self.sessions.insert(session_id, Session::new(computation));
                false
            }
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Unregister a session, closing its stream; idempotent
    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        match self.sessions.shift_remove(session_id) {
            Some(mut session) => {
                session.close_sink();
                true
            }
            None => false,
        }
    }

    /// Attach a stream, ending any stream it replaces
    ///
    /// Returns the sink back when the session is not registered.
    pub fn attach_sink(&mut self, session_id: &SessionId, sink: StreamSink) -> Result<(), StreamSink> {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.close_sink();
                session.sink = Some(sink);
                Ok(())
            }
            None => Err(sink),
        }
    }

    /// Detach and end the session's stream if it is still `sink_id`
    pub fn detach_sink(&mut self, session_id: &SessionId, sink_id: u64) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) if session.sink.as_ref().map(StreamSink::id) == Some(sink_id) => {
                session.close_sink();
                true
            }
            _ => false,
        }
    }

    /// Registered session ids in registration order
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Ids of sessions whose stream can still be written to
    pub fn writable_session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.has_writable_sink())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Unregister everything, closing all streams
    pub fn clear(&mut self) {
        for (_, mut session) in self.sessions.drain(..) {
            session.close_sink();
        }
    }
}
