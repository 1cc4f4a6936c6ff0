//! Broker seam
//!
//! Handles talk to a single broker node through [`Broker`]. The crate ships an
//! in-process implementation; network clients plug in behind the same trait.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ForgeError, Result};

/// One record read from a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Live subscription of one group member
#[derive(Debug)]
pub struct Subscription {
    pub member_id: u64,
    pub records: mpsc::UnboundedReceiver<BrokerRecord>,
}

/// Single-node broker operations
pub trait Broker: Send + Sync {
    /// Check reachability
    fn ping(&self) -> Result<()>;

    /// Append a payload and return its offset once it is acknowledged
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<u64>;

    /// Join `group` on `topic`
    fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription>;

    /// Acknowledge `offset` as processed by `group`
    fn commit(&self, topic: &str, group: &str, offset: u64) -> Result<()>;

    /// Leave the group
    fn unsubscribe(&self, topic: &str, group: &str, member_id: u64) -> Result<()>;
}

pub type SharedBroker = Arc<dyn Broker>;

// =============================================================================
// In-process broker
// =============================================================================

#[derive(Default)]
struct GroupState {
    /// Every offset below this one has been acknowledged
    committed: u64,
    /// Acknowledged offsets at or above `committed`
    acked: BTreeSet<u64>,
    /// Next offset never handed to a member
    dispatched: u64,
    /// Handed out and not yet acknowledged, with the holding member
    in_flight: BTreeMap<u64, u64>,
    /// Taken back from departed members, handed out before new records
    redeliver: BTreeSet<u64>,
    members: Vec<(u64, mpsc::UnboundedSender<BrokerRecord>)>,
    next_member: usize,
}

impl GroupState {
    /// Drop members whose receivers are gone and take back their records
    fn prune_members(&mut self) {
        let closed: Vec<u64> = self
            .members
            .iter()
            .filter(|(_, tx)| tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for member_id in closed {
            self.remove_member(member_id);
        }
    }

    fn remove_member(&mut self, member_id: u64) {
        self.members.retain(|(id, _)| *id != member_id);
        let held: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, holder)| **holder == member_id)
            .map(|(offset, _)| *offset)
            .collect();
        for offset in held {
            self.in_flight.remove(&offset);
            self.redeliver.insert(offset);
        }
    }

    fn acknowledge(&mut self, offset: u64) {
        if offset < self.committed {
            return;
        }
        self.in_flight.remove(&offset);
        self.redeliver.remove(&offset);
        self.acked.insert(offset);
        while self.acked.remove(&self.committed) {
            self.committed += 1;
        }
    }

    /// Next offset to hand out: taken-back records first, then the log tail
    fn next_offset(&self, log_len: usize) -> Option<u64> {
        self.redeliver
            .iter()
            .next()
            .copied()
            .or_else(|| ((self.dispatched as usize) < log_len).then_some(self.dispatched))
    }
}

#[derive(Default)]
struct TopicState {
    log: Vec<Vec<u8>>,
    groups: BTreeMap<String, GroupState>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    available: bool,
    next_member_id: u64,
}

/// In-process single-node broker with consumer groups
///
/// Records are delivered round-robin across a group's live members. Each
/// record stays owned by the member it was handed to until that member
/// acknowledges it; when a member leaves, its unacknowledged records go to the
/// remaining (or next) members.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                ..BrokerState::default()
            })),
        }
    }

    pub fn shared() -> SharedBroker {
        Arc::new(Self::new())
    }

    /// Simulate the node going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Number of records in a topic
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(|t| t.log.len()).unwrap_or(0)
    }

    /// Committed position of a group
    pub fn committed(&self, topic: &str, group: &str) -> u64 {
        self.lock()
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| g.committed)
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means another handle panicked mid-call; the log is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn locked_available(&self) -> Result<MutexGuard<'_, BrokerState>> {
        let state = self.lock();
        if state.available {
            Ok(state)
        } else {
            Err(ForgeError::BrokerUnavailable("in-memory broker is offline".to_string()))
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand pending records to members in turn
fn dispatch(topic: &str, log: &[Vec<u8>], group: &mut GroupState) {
    group.prune_members();
    while !group.members.is_empty() {
        let Some(offset) = group.next_offset(log.len()) else {
            break;
        };
        let slot = group.next_member % group.members.len();
        let member_id = group.members[slot].0;
        let record = BrokerRecord {
            topic: topic.to_string(),
            offset,
            payload: log[offset as usize].clone(),
        };
        if group.members[slot].1.send(record).is_err() {
            group.remove_member(member_id);
            continue;
        }
        if !group.redeliver.remove(&offset) {
            group.dispatched += 1;
        }
        group.in_flight.insert(offset, member_id);
        group.next_member = slot + 1;
    }
}

impl Broker for InMemoryBroker {
    fn ping(&self) -> Result<()> {
        self.locked_available().map(|_| ())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<u64> {
        let mut state = self.locked_available()?;
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        let offset = topic_state.log.len() as u64;
        topic_state.log.push(payload);

        let TopicState { log, groups } = topic_state;
        for group in groups.values_mut() {
            dispatch(topic, log, group);
        }
        Ok(offset)
    }

    fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription> {
        let mut state = self.locked_available()?;
        state.next_member_id += 1;
        let member_id = state.next_member_id;

        let topic_state = state.topics.entry(topic.to_string()).or_default();
        let TopicState { log, groups } = topic_state;
        let group_state = groups.entry(group.to_string()).or_default();

        group_state.prune_members();
        let (tx, rx) = mpsc::unbounded_channel();
        group_state.members.push((member_id, tx));
        dispatch(topic, log, group_state);

        debug!(topic, group, member_id, "Member joined group");
        Ok(Subscription {
            member_id,
            records: rx,
        })
    }

    fn commit(&self, topic: &str, group: &str, offset: u64) -> Result<()> {
        let mut state = self.locked_available()?;
        if let Some(group_state) = state
            .topics
            .get_mut(topic)
            .and_then(|t| t.groups.get_mut(group))
        {
            group_state.acknowledge(offset);
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, group: &str, member_id: u64) -> Result<()> {
        let mut state = self.lock();
        if let Some(topic_state) = state.topics.get_mut(topic) {
            let TopicState { log, groups } = topic_state;
            if let Some(group_state) = groups.get_mut(group) {
                group_state.remove_member(member_id);
                dispatch(topic, log, group_state);
            }
        }
        debug!(topic, group, member_id, "Member left group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<u64> {
        let mut offsets = Vec::new();
        while let Ok(record) = sub.records.try_recv() {
            offsets.push(record.offset);
        }
        offsets
    }

    #[test]
    fn test_publish_then_subscribe_replays_log() {
        let broker = InMemoryBroker::new();
        broker.publish("signups", b"a".to_vec()).unwrap();
        broker.publish("signups", b"b".to_vec()).unwrap();

        let mut sub = broker.subscribe("signups", "g1").unwrap();
        assert_eq!(drain(&mut sub), vec![0, 1]);

        broker.publish("signups", b"c".to_vec()).unwrap();
        assert_eq!(drain(&mut sub), vec![2]);
    }

    #[test]
    fn test_groups_are_independent() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("signups", "analytics").unwrap();
        let mut b = broker.subscribe("signups", "billing").unwrap();
        broker.publish("signups", b"x".to_vec()).unwrap();
        assert_eq!(drain(&mut a), vec![0]);
        assert_eq!(drain(&mut b), vec![0]);
    }

    #[test]
    fn test_round_robin_within_group() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("signups", "g").unwrap();
        let mut b = broker.subscribe("signups", "g").unwrap();
        for _ in 0..4 {
            broker.publish("signups", vec![1]).unwrap();
        }
        assert_eq!(drain(&mut a), vec![0, 2]);
        assert_eq!(drain(&mut b), vec![1, 3]);
    }

    #[test]
    fn test_uncommitted_records_are_redelivered() {
        let broker = InMemoryBroker::new();
        let mut first = broker.subscribe("signups", "g").unwrap();
        broker.publish("signups", vec![1]).unwrap();
        broker.publish("signups", vec![2]).unwrap();
        assert_eq!(drain(&mut first), vec![0, 1]);
        broker.commit("signups", "g", 0).unwrap();
        broker.unsubscribe("signups", "g", first.member_id).unwrap();

        let mut second = broker.subscribe("signups", "g").unwrap();
        assert_eq!(drain(&mut second), vec![1]);
        assert_eq!(broker.committed("signups", "g"), 1);
    }

    #[test]
    fn test_commit_only_advances_over_acknowledged_prefix() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("signups", "g").unwrap();
        let mut b = broker.subscribe("signups", "g").unwrap();
        for _ in 0..4 {
            broker.publish("signups", vec![1]).unwrap();
        }
        assert_eq!(drain(&mut a), vec![0, 2]);
        assert_eq!(drain(&mut b), vec![1, 3]);

        broker.commit("signups", "g", 1).unwrap();
        broker.commit("signups", "g", 3).unwrap();
        assert_eq!(broker.committed("signups", "g"), 0);

        broker.unsubscribe("signups", "g", a.member_id).unwrap();
        broker.unsubscribe("signups", "g", b.member_id).unwrap();

        let mut c = broker.subscribe("signups", "g").unwrap();
        assert_eq!(drain(&mut c), vec![0, 2]);
        broker.commit("signups", "g", 0).unwrap();
        broker.commit("signups", "g", 2).unwrap();
        assert_eq!(broker.committed("signups", "g"), 4);
    }

    #[test]
    fn test_departing_member_records_go_to_remaining_members() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("signups", "g").unwrap();
        let mut b = broker.subscribe("signups", "g").unwrap();
        for _ in 0..4 {
            broker.publish("signups", vec![1]).unwrap();
        }
        assert_eq!(drain(&mut a), vec![0, 2]);
        assert_eq!(drain(&mut b), vec![1, 3]);
        broker.commit("signups", "g", 2).unwrap();

        broker.unsubscribe("signups", "g", a.member_id).unwrap();
        assert_eq!(drain(&mut b), vec![0]);

        // Dropped receivers count as departed too
        let b_id = b.member_id;
        drop(b);
        let mut c = broker.subscribe("signups", "g").unwrap();
        assert_eq!(drain(&mut c), vec![0, 1, 3]);
        broker.unsubscribe("signups", "g", b_id).unwrap();
    }

    #[test]
    fn test_offline_broker() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let err = broker.publish("signups", vec![1]).unwrap_err();
        assert!(err.is_retryable());
        assert!(broker.ping().is_err());
        broker.set_available(true);
        assert!(broker.ping().is_ok());
    }
}
