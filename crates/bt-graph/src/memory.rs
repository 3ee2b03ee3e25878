//! In-process `GraphStore`.
//!
//! Holds the same node and relationship model as the Neo4j store. Used by
//! the `memory` backend and by tests, which can take it offline or make the
//! next writes fail.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bt_core::model::{EntityCounts, Event, Item};
use bt_core::store::{
    Direction, GraphMutation, GraphNode, GraphStore, ItemPredicate, NodeKey, Relation, TimeWindow,
};
use bt_core::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct GraphState {
    items: BTreeMap<String, Item>,
    events: BTreeMap<String, Event>,
    locations: BTreeSet<String>,
    /// `CONNECTS_TO` edges.
    legs: BTreeSet<(String, String)>,
}

impl GraphState {
    fn contains(&self, key: &NodeKey) -> bool {
        match key {
            NodeKey::Item(tag) => self.items.contains_key(tag),
            NodeKey::Event(id) => self.events.contains_key(id),
            NodeKey::Location(code) => self.locations.contains(code),
        }
    }

    fn node(&self, key: &NodeKey) -> Option<GraphNode> {
        match key {
            NodeKey::Item(tag) => self.items.get(tag).cloned().map(GraphNode::Item),
            NodeKey::Event(id) => self.events.get(id).cloned().map(GraphNode::Event),
            NodeKey::Location(code) => self
                .locations
                .contains(code)
                .then(|| GraphNode::Location(code.clone())),
        }
    }

    fn events_of<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.values().filter(move |e| e.tag == tag)
    }

    /// Keys one hop away, in a stable order.
    fn adjacent(&self, key: &NodeKey, relation: Relation, direction: Direction) -> Vec<NodeKey> {
        use Direction::{Incoming, Outgoing};

        let mut keys = match (key, relation, direction) {
            (NodeKey::Item(tag), Relation::HasEvent, Outgoing) => {
                let mut events: Vec<&Event> = self.events_of(tag).collect();
                events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                return events
                    .into_iter()
                    .map(|e| NodeKey::Event(e.event_id.clone()))
                    .collect();
            }
            (NodeKey::Event(id), Relation::HasEvent, Incoming) => self
                .events
                .get(id)
                .filter(|e| self.items.contains_key(&e.tag))
                .map(|e| vec![NodeKey::Item(e.tag.clone())])
                .unwrap_or_default(),
            (NodeKey::Event(id), Relation::At, Outgoing) => self
                .events
                .get(id)
                .map(|e| vec![NodeKey::Location(e.location.clone())])
                .unwrap_or_default(),
            (NodeKey::Location(code), Relation::At, Incoming) => self
                .events
                .values()
                .filter(|e| &e.location == code)
                .map(|e| NodeKey::Event(e.event_id.clone()))
                .collect(),
            (NodeKey::Item(tag), Relation::CurrentlyAt, Outgoing) => self
                .items
                .get(tag)
                .map(|i| vec![NodeKey::Location(i.current_location.clone())])
                .unwrap_or_default(),
            (NodeKey::Location(code), Relation::CurrentlyAt, Incoming) => self
                .items
                .values()
                .filter(|i| &i.current_location == code)
                .map(|i| NodeKey::Item(i.tag.clone()))
                .collect(),
            (NodeKey::Location(code), Relation::ConnectsTo, Outgoing) => self
                .legs
                .iter()
                .filter(|(from, _)| from == code)
                .map(|(_, to)| NodeKey::Location(to.clone()))
                .collect(),
            (NodeKey::Location(code), Relation::ConnectsTo, Incoming) => self
                .legs
                .iter()
                .filter(|(_, to)| to == code)
                .map(|(from, _)| NodeKey::Location(from.clone()))
                .collect(),
            _ => Vec::new(),
        };
        keys.dedup();
        keys
    }

    fn upsert_item(&mut self, item: &Item) {
        if let Some(existing) = self.items.get(&item.tag) {
            if existing.updated_at > item.updated_at {
                return;
            }
        }
        self.locations.insert(item.current_location.clone());
        self.locations.extend(item.routing.iter().cloned());
        for leg in item.routing.windows(2) {
            self.legs.insert((leg[0].clone(), leg[1].clone()));
        }
        self.items.insert(item.tag.clone(), item.clone());
    }

    fn upsert_event(&mut self, event: &Event) -> StoreResult<()> {
        if !self.items.contains_key(&event.tag) {
            return Err(StoreError::not_found("item", event.tag.as_str()));
        }
        self.locations.insert(event.location.clone());
        self.events.insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    fn delete_item(&mut self, tag: &str) {
        self.items.remove(tag);
        self.events.retain(|_, e| e.tag != tag);
    }
}

/// `GraphStore` kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    offline: AtomicBool,
    failing_writes: AtomicU32,
    applied: AtomicU64,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `n` mutations fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Mutations applied successfully so far.
    pub fn applied_mutations(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("graph store is offline".to_string()));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn apply(&self, mutation: &GraphMutation) -> StoreResult<()> {
        self.check_online()?;
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected graph write failure".to_string()));
        }

        let mut state = self.state.write().await;
        match mutation {
            GraphMutation::UpsertItem { item } => state.upsert_item(item),
            GraphMutation::UpsertEvent { event } => state.upsert_event(event)?,
            GraphMutation::DeleteItem { tag } => state.delete_item(tag),
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>> {
        self.check_online()?;
        Ok(self.state.read().await.items.get(tag).cloned())
    }

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        self.check_online()?;
        Ok(self.state.read().await.events.get(event_id).cloned())
    }

    async fn neighbors(
        &self,
        node: &NodeKey,
        relation: Relation,
        direction: Direction,
    ) -> StoreResult<Vec<GraphNode>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .adjacent(node, relation, direction)
            .iter()
            .filter_map(|key| state.node(key))
            .collect())
    }

    async fn shortest_path(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        relation: Relation,
    ) -> StoreResult<Option<Vec<NodeKey>>> {
        self.check_online()?;
        let state = self.state.read().await;
        if !state.contains(from) || !state.contains(to) {
            return Ok(None);
        }

        // Breadth-first search; the first visit to a node is along a shortest path.
        let mut parents: HashMap<NodeKey, Option<NodeKey>> = HashMap::new();
        let mut frontier = VecDeque::from([from.clone()]);
        parents.insert(from.clone(), None);

        while let Some(current) = frontier.pop_front() {
            if &current == to {
                let mut path = vec![current];
                while let Some(Some(parent)) = path.last().and_then(|k| parents.get(k)) {
                    path.push(parent.clone());
                }
                path.reverse();
                return Ok(Some(path));
            }
            for next in state.adjacent(&current, relation, Direction::Outgoing) {
                if !parents.contains_key(&next) {
                    parents.insert(next.clone(), Some(current.clone()));
                    frontier.push_back(next);
                }
            }
        }
        Ok(None)
    }

    async fn items_matching(
        &self,
        window: &TimeWindow,
        predicate: &ItemPredicate,
    ) -> StoreResult<Vec<Item>> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|item| window.contains(item.last_seen_at) && predicate.matches(item))
            .cloned()
            .collect())
    }

    async fn list_item_tags(&self) -> StoreResult<Vec<String>> {
        self.check_online()?;
        Ok(self.state.read().await.items.keys().cloned().collect())
    }

    async fn counts(&self) -> StoreResult<EntityCounts> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(EntityCounts {
            items: state.items.len() as u64,
            events: state.events.len() as u64,
        })
    }

    async fn last_write_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.check_online()?;
        let state = self.state.read().await;
        let items = state.items.values().map(|i| i.updated_at).max();
        let events = state.events.values().map(|e| e.recorded_at).max();
        Ok(items.max(events))
    }
}
