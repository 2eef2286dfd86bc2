//! Bounded in-process event bus
//!
//! Fan-out bus carrying [`BusMessage`]s from every worker to every
//! subscriber. Publishing never blocks: each source (a service label for
//! state updates, a subsystem for log entries) owns a bounded FIFO queue, and
//! a dispatcher task drains the queues into per-subscriber channels.
//!
//! ## Drop policy
//!
//! When a source queue overflows, the oldest *non-terminal* state update for
//! that label is dropped and a [`BusMessage::BackpressureNotification`] is
//! queued in its place (coalesced, one pending notification per label).
//! Updates in `{Failed, Stopped, Running}` are never dropped. Log queues drop
//! their oldest entry silently; log entries never preempt state updates
//! because the queues are separate. A subscriber that falls a full channel
//! behind is detached, again with a bus-visible notification.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::stream;
use tokio::sync::{Notify, mpsc};

use envctl_domain::constants::{
    LOG_QUEUE_CAPACITY, STATE_QUEUE_CAPACITY, SUBSCRIBER_CHANNEL_CAPACITY,
};
use envctl_domain::events::BusMessage;
use envctl_domain::ports::{BusStream, EventBus};
use envctl_domain::value_objects::{ServiceLabel, ServiceState};

/// Queue identity: one per state label, one per log subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SourceKey {
    State(ServiceLabel),
    Log(String),
}

struct SourceQueue {
    /// Messages tagged with their global arrival sequence; batches are merged
    /// by it so delivery follows publish order across sources too.
    deque: VecDeque<(u64, BusMessage)>,
    capacity: usize,
}

struct BusInner {
    queues: Vec<SourceQueue>,
    key_index: HashMap<SourceKey, usize>,
    subscribers: Vec<mpsc::Sender<BusMessage>>,
    next_seq: u64,
    /// Labels with a backpressure notification already queued but not yet
    /// dispatched; prevents notification storms under sustained overflow.
    pending_backpressure: HashSet<ServiceLabel>,
}

/// Process-wide bounded event bus
pub struct BoundedBus {
    inner: Arc<Mutex<BusInner>>,
    notify: Arc<Notify>,
}

impl BoundedBus {
    /// Create the bus and spawn its dispatcher task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let bus = Arc::new(Self {
            inner: Arc::new(Mutex::new(BusInner {
                queues: Vec::new(),
                key_index: HashMap::new(),
                subscribers: Vec::new(),
                next_seq: 0,
                pending_backpressure: HashSet::new(),
            })),
            notify: Arc::new(Notify::new()),
        });
        let dispatcher = Arc::clone(&bus);
        tokio::spawn(async move {
            loop {
                dispatcher.notify.notified().await;
                dispatcher.dispatch();
            }
        });
        bus
    }

    /// Drain every source queue and deliver to all live subscribers.
    fn dispatch(&self) {
        loop {
            let (batch, senders) = {
                let mut inner = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let mut tagged = Vec::new();
                for queue in &mut inner.queues {
                    while let Some(entry) = queue.deque.pop_front() {
                        tagged.push(entry);
                    }
                }
                if tagged.is_empty() {
                    return;
                }
                // Merge back into global publish order; per-source FIFO is a
                // consequence (sequences increase within each queue).
                tagged.sort_unstable_by_key(|(seq, _)| *seq);
                let batch: Vec<BusMessage> =
                    tagged.into_iter().map(|(_, msg)| msg).collect();
                for msg in &batch {
                    if let BusMessage::BackpressureNotification { label, .. } = msg {
                        inner.pending_backpressure.remove(label);
                    }
                }
                (batch, inner.subscribers.clone())
            };

            // Deliver outside the lock; per-source FIFO holds because each
            // queue was drained front to back and we walk the batch in order.
            let mut slow = Vec::new();
            let mut gone = Vec::new();
            for (pos, sender) in senders.iter().enumerate() {
                for msg in &batch {
                    match sender.try_send(msg.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            slow.push(pos);
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            gone.push(pos);
                            break;
                        }
                    }
                }
            }

            if !slow.is_empty() || !gone.is_empty() {
                let was_slow = !slow.is_empty();
                let mut detach: Vec<usize> = slow;
                detach.extend(gone);
                detach.sort_unstable();
                let mut inner = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                // Walk in reverse so earlier removals do not shift later ones.
                for pos in detach.into_iter().rev() {
                    if pos < inner.subscribers.len() {
                        inner.subscribers.remove(pos);
                    }
                }
                drop(inner);
                // A dropped receiver (subscriber task ended or panicked) is
                // detached silently; only a full channel is worth reporting.
                if was_slow {
                    self.publish(BusMessage::BackpressureNotification {
                        label: ServiceLabel::system("bus"),
                        dropped_state: None,
                        reason: "subscriber too slow".to_owned(),
                        ts: Utc::now(),
                    });
                }
            }
        }
    }
}

impl BusInner {
    fn queue_for(&mut self, key: SourceKey, capacity: usize) -> &mut SourceQueue {
        let idx = match self.key_index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.queues.push(SourceQueue {
                    deque: VecDeque::new(),
                    capacity,
                });
                let idx = self.queues.len() - 1;
                self.key_index.insert(key, idx);
                idx
            }
        };
        &mut self.queues[idx]
    }

    /// Apply the overflow policy for one state queue. Returns the dropped
    /// state, if an update was dropped.
    fn shed_state_queue(queue: &mut SourceQueue) -> Option<ServiceState> {
        if queue.deque.len() <= queue.capacity {
            return None;
        }
        let droppable = queue.deque.iter().position(|(_, msg)| {
            matches!(
                msg,
                BusMessage::ServiceStateChanged { snapshot, .. }
                    if !snapshot.state.is_preserved_under_backpressure()
            )
        });
        match droppable {
            Some(pos) => match queue.deque.remove(pos) {
                Some((_, BusMessage::ServiceStateChanged { snapshot, .. })) => {
                    Some(snapshot.state)
                }
                _ => None,
            },
            // Only preserved updates and notifications remain; let the queue
            // overflow rather than lose a terminal transition.
            None => None,
        }
    }
}

impl EventBus for BoundedBus {
    fn publish(&self, msg: BusMessage) {
        let is_state_update = matches!(msg, BusMessage::ServiceStateChanged { .. });
        let (key, capacity) = match &msg {
            BusMessage::ServiceStateChanged { snapshot, .. } => (
                SourceKey::State(snapshot.label.clone()),
                STATE_QUEUE_CAPACITY,
            ),
            BusMessage::LogEntry(entry) => {
                (SourceKey::Log(entry.subsystem.clone()), LOG_QUEUE_CAPACITY)
            }
            // Bus-produced notifications ride the label's state queue and are
            // never shed.
            BusMessage::BackpressureNotification { label, .. } => {
                (SourceKey::State(label.clone()), STATE_QUEUE_CAPACITY)
            }
        };

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        match key {
            SourceKey::State(label) if is_state_update => {
                let queue =
                    inner.queue_for(SourceKey::State(label.clone()), capacity);
                queue.deque.push_back((seq, msg));
                let dropped = BusInner::shed_state_queue(queue);
                if let Some(dropped_state) = dropped
                    && inner.pending_backpressure.insert(label.clone())
                {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    let queue =
                        inner.queue_for(SourceKey::State(label.clone()), capacity);
                    queue.deque.push_back((
                        seq,
                        BusMessage::BackpressureNotification {
                            label,
                            dropped_state: Some(dropped_state),
                            reason: "state queue overflow".to_owned(),
                            ts: Utc::now(),
                        },
                    ));
                }
            }
            SourceKey::State(label) => {
                let queue = inner.queue_for(SourceKey::State(label), capacity);
                queue.deque.push_back((seq, msg));
            }
            SourceKey::Log(subsystem) => {
                let queue = inner.queue_for(SourceKey::Log(subsystem), capacity);
                queue.deque.push_back((seq, msg));
                if queue.deque.len() > queue.capacity {
                    queue.deque.pop_front();
                }
            }
        }
        drop(inner);
        self.notify.notify_one();
    }

    fn subscribe(&self) -> BusStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.subscribers.push(tx);
        }
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }))
    }
}
