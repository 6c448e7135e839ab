use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::Notify,
    time::{Instant, timeout_at},
};

use crate::{
    error::{LedgerError, Result},
    events::Fields,
    log::{ConsumerGroups, EventLog, ReadFrom, StreamEntry},
    position::{GroupStart, LogPosition, contains, now_millis},
};

/// Process-local event log with consumer groups.
///
/// Blocking group reads park on a [`Notify`] that every append wakes, so a
/// waiting consumer never spins.
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<LogPosition, Fields>,
    last: LogPosition,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    last_delivered: LogPosition,
    pending: BTreeMap<LogPosition, Pending>,
}

struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends with a caller-chosen position, which must be past the last one.
    pub fn append_at(&self, stream: &str, position: LogPosition, fields: Fields) -> Result<()> {
        {
            let mut streams = self.lock();
            let state = streams.entry(stream.to_string()).or_default();

            if position <= state.last {
                return Err(LedgerError::InvalidPosition(position.to_string()));
            }

            state.last = position;
            state.entries.insert(position, fields);
        }

        self.appended.notify_waiters();
        Ok(())
    }

    /// Entries delivered to the group and not yet acknowledged.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.lock()
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group| group.pending.len())
            .unwrap_or(0)
    }

    /// How many times the entry has been handed out, if it is pending.
    pub fn delivery_count(&self, stream: &str, group: &str, position: LogPosition) -> Option<u32> {
        self.lock()
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .and_then(|group| group.pending.get(&position))
            .map(|pending| pending.deliveries)
    }

    /// The group's cursor: the newest entry ever delivered to it.
    pub fn last_delivered(&self, stream: &str, group: &str) -> Option<LogPosition> {
        self.lock()
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group| group.last_delivered)
    }

    fn deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.lock();
        let unknown = || LedgerError::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };

        let state = streams.get_mut(stream).ok_or_else(unknown)?;
        let entries = &state.entries;
        let group_state = state.groups.get_mut(group).ok_or_else(unknown)?;
        let now = Instant::now();

        let mut batch = Vec::new();

        match from {
            ReadFrom::Pending(after) => {
                let mine = group_state
                    .pending
                    .range((Bound::Excluded(after), Bound::Unbounded))
                    .filter(|(_, pending)| pending.consumer == consumer)
                    .map(|(position, _)| *position)
                    .take(count)
                    .collect::<Vec<_>>();

                for position in mine {
                    if let Some(pending) = group_state.pending.get_mut(&position) {
                        pending.delivered_at = now;
                        pending.deliveries += 1;
                    }
                    if let Some(fields) = entries.get(&position) {
                        batch.push(StreamEntry {
                            position,
                            fields: fields.clone(),
                        });
                    }
                }
            }
            ReadFrom::New => {
                let fresh = entries
                    .range((Bound::Excluded(group_state.last_delivered), Bound::Unbounded))
                    .take(count);

                for (position, fields) in fresh {
                    group_state.last_delivered = *position;
                    group_state.pending.insert(
                        *position,
                        Pending {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                            deliveries: 1,
                        },
                    );
                    batch.push(StreamEntry {
                        position: *position,
                        fields: fields.clone(),
                    });
                }
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, stream: &str, fields: &Fields) -> Result<LogPosition> {
        let position = {
            let mut streams = self.lock();
            let state = streams.entry(stream.to_string()).or_default();

            let position = state.last.successor(now_millis());
            state.last = position;
            state.entries.insert(position, fields.clone());
            position
        };

        self.appended.notify_waiters();
        Ok(position)
    }

    async fn range(
        &self,
        stream: &str,
        from: Bound<LogPosition>,
        to: Bound<LogPosition>,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let streams = self.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };

        Ok(state
            .entries
            .iter()
            .filter(|(position, _)| contains(from.as_ref(), to.as_ref(), position))
            .take(count)
            .map(|(position, fields)| StreamEntry {
                position: *position,
                fields: fields.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ConsumerGroups for MemoryLog {
    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<bool> {
        let mut streams = self.lock();
        let state = streams.entry(stream.to_string()).or_default();

        if state.groups.contains_key(group) {
            return Ok(false);
        }

        let last_delivered = match start {
            GroupStart::Beginning => LogPosition::MIN,
            GroupStart::Tail => state.last,
            GroupStart::After(position) => position,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );

        Ok(true)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        if from != ReadFrom::New || block.is_zero() {
            return self.deliver(stream, group, consumer, from, count);
        }

        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.deliver(stream, group, consumer, from, count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.lock();
        let unknown = || LedgerError::UnknownGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };

        let state = streams.get_mut(stream).ok_or_else(unknown)?;
        let entries = &state.entries;
        let group_state = state.groups.get_mut(group).ok_or_else(unknown)?;
        let now = Instant::now();

        let mut claimed = Vec::new();
        for (position, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if pending.consumer == consumer || now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }

            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.deliveries += 1;

            if let Some(fields) = entries.get(position) {
                claimed.push(StreamEntry {
                    position: *position,
                    fields: fields.clone(),
                });
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, position: LogPosition) -> Result<bool> {
        let mut streams = self.lock();

        Ok(streams
            .get_mut(stream)
            .and_then(|state| state.groups.get_mut(group))
            .map(|group| group.pending.remove(&position).is_some())
            .unwrap_or(false))
    }
}
