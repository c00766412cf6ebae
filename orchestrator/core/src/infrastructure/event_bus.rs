// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Typed Pub/Sub per Event Category
//
// One tokio broadcast channel per category. Publishers never block; a
// subscriber that falls behind loses the oldest buffered events and is told
// how many it missed on its next receive.
//
// In-memory only: events are lost on restart.

use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{AgentEvent, ExecutionEvent, WorkflowRunEvent};
use crate::domain::execution::ExecutionId;

/// Broadcast bus for a single event category
#[derive(Debug)]
pub struct EventBus<E> {
    sender: Arc<broadcast::Sender<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<E> EventBus<E>
where
    E: Clone + Debug + Send + 'static,
{
    /// Capacity is the number of events buffered per subscriber before the
    /// oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: E) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver<E> {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E> Default for EventBus<E>
where
    E: Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl EventBus<ExecutionEvent> {
    /// Subscribe to the events of a single execution
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionEventReceiver {
        ExecutionEventReceiver {
            inner: self.subscribe(),
            execution_id,
        }
    }
}

pub struct EventReceiver<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: Clone> EventReceiver<E> {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<E, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<E, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for execution-specific events (filtered)
pub struct ExecutionEventReceiver {
    inner: EventReceiver<ExecutionEvent>,
    execution_id: ExecutionId,
}

impl ExecutionEventReceiver {
    pub async fn recv(&mut self) -> Result<ExecutionEvent, EventBusError> {
        loop {
            let event = self.inner.recv().await?;
            if event.execution_id() == &self.execution_id {
                return Ok(event);
            }
        }
    }
}

/// All event buses of the control plane
#[derive(Debug, Clone)]
pub struct EventHub {
    pub agents: EventBus<AgentEvent>,
    pub executions: EventBus<ExecutionEvent>,
    pub runs: EventBus<WorkflowRunEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            agents: EventBus::new(capacity),
            executions: EventBus::new(capacity),
            runs: EventBus::new(capacity),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, StatusSource};
    use crate::domain::execution::RunId;
    use chrono::Utc;

    fn started(id: &str) -> ExecutionEvent {
        ExecutionEvent::ExecutionStarted {
            execution_id: ExecutionId::from(id),
            run_id: RunId::from("run-1"),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus: EventBus<AgentEvent> = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.publish(AgentEvent::AgentOnline {
            agent_id: AgentId::from("agent-a"),
            source: StatusSource::Heartbeat,
            at: Utc::now(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.agent_id().as_str(), "agent-a");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus: EventBus<ExecutionEvent> = EventBus::new(1);
        for i in 0..10 {
            bus.publish(started(&format!("exec-{}", i)));
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_what_it_missed() {
        let bus: EventBus<ExecutionEvent> = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for i in 0..5 {
            bus.publish(started(&format!("exec-{}", i)));
        }

        assert_eq!(receiver.try_recv().unwrap_err(), EventBusError::Lagged(3));
        // oldest dropped, newest two still buffered
        assert_eq!(receiver.try_recv().unwrap().execution_id().as_str(), "exec-3");
        assert_eq!(receiver.try_recv().unwrap().execution_id().as_str(), "exec-4");
        assert_eq!(receiver.try_recv().unwrap_err(), EventBusError::Empty);
    }

    #[tokio::test]
    async fn test_execution_filter() {
        let bus: EventBus<ExecutionEvent> = EventBus::new(10);
        let mut receiver = bus.subscribe_execution(ExecutionId::from("wanted"));

        bus.publish(started("other"));
        bus.publish(started("wanted"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.execution_id().as_str(), "wanted");
    }
}
