use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    resolve_visit, MemoryAggregateSink, VisitOutcome, VisitPolicy, VisitorPointer,
    VisitorSession, VisitorStore, VisitorTelemetry,
};
use crate::error::StoreError;
use crate::types::Timestamp;

#[derive(Debug, Default)]
struct State {
    pointers: HashMap<String, VisitorPointer>,
    sessions: HashMap<String, VisitorSession>,
    aggregates: MemoryAggregateSink,
}

/// In-process [`VisitorStore`]; one lock covers pointer, session and
/// counters, so concurrent requests from one visitor are fully serialized.
#[derive(Debug, Default)]
pub struct MemoryVisitorStore {
    state: Mutex<State>,
}

impl MemoryVisitorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pointer(&self, visitor_id: &str) -> Option<VisitorPointer> {
        self.state.lock().await.pointers.get(visitor_id).cloned()
    }

    pub async fn session(&self, session_id: &str) -> Option<VisitorSession> {
        self.state.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn sessions_for(&self, visitor_id: &str) -> Vec<VisitorSession> {
        self.state
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.visitor_id == visitor_id)
            .cloned()
            .collect()
    }

    pub async fn aggregates(&self) -> MemoryAggregateSink {
        self.state.lock().await.aggregates.clone()
    }
}

#[async_trait]
impl VisitorStore for MemoryVisitorStore {
    async fn record_visit(
        &self,
        telemetry: &VisitorTelemetry,
        now: Timestamp,
        policy: &VisitPolicy,
    ) -> Result<VisitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let pointer = state.pointers.get(&telemetry.visitor_id).cloned();
        let session = pointer
            .as_ref()
            .and_then(|p| p.current_session_id.as_ref())
            .and_then(|id| state.sessions.get(id))
            .cloned();

        let resolution = resolve_visit(telemetry, pointer, session, now, policy);
        if let Some(session) = resolution.session {
            state.sessions.insert(session.session_id.clone(), session);
        }
        if let Some(pointer) = resolution.pointer {
            state.pointers.insert(pointer.visitor_id.clone(), pointer);
        }
        if let Some(delta) = &resolution.delta {
            state.aggregates.apply(delta);
        }

        Ok(VisitOutcome {
            session_id: resolution.session_id,
            path: resolution.path,
        })
    }

    async fn delete_expired_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.pointers.len() + state.sessions.len();
        state.pointers.retain(|_, p| p.expires_at >= cutoff);
        state.sessions.retain(|_, s| s.expires_at >= cutoff);
        Ok((before - state.pointers.len() - state.sessions.len()) as u64)
    }
}
