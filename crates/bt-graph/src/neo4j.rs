//! `GraphStore` backed by Neo4j.
//!
//! Nodes and relationships:
//! - (:Item)-[:HAS_EVENT]->(:Event)-[:AT]->(:Location)
//! - (:Item)-[:CURRENTLY_AT]->(:Location)
//! - (:Location)-[:CONNECTS_TO]->(:Location), one per routing leg
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so string
//! comparison in Cypher is chronological.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bt_core::config::GraphConfig;
use bt_core::model::{EntityCounts, Event, EventType, Item, ItemStatus};
use bt_core::store::{
    Direction, GraphMutation, GraphNode, GraphStore, ItemPredicate, NodeKey, Relation, TimeWindow,
};
use bt_core::{time, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use neo4rs::{Query, Row};
use tracing::debug;

use crate::client::GraphClient;

/// Longest `CONNECTS_TO` chain considered by path queries.
const MAX_PATH_HOPS: u32 = 25;

/// Neo4j-backed graph store.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    client: GraphClient,
    call_timeout: Duration,
}

impl Neo4jGraphStore {
    /// Build the store. No connection is made until the first call.
    pub async fn connect(config: &GraphConfig) -> StoreResult<Self> {
        let client = GraphClient::connect(config).await.map_err(classify)?;
        Ok(Self {
            client,
            call_timeout: config.acquire_timeout(),
        })
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.guarded("ping", self.client.ping()).await
    }

    /// Bound every call so pool exhaustion or a hung server surfaces as a
    /// transient error instead of a blocking wait.
    async fn guarded<T, F>(&self, what: &str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(StoreError::Transient(format!(
                "Neo4j {} timed out after {}ms",
                what,
                self.call_timeout.as_millis()
            ))),
        }
    }

    async fn rows(&self, what: &str, query: Query) -> StoreResult<Vec<Row>> {
        self.guarded(what, self.client.query(query)).await
    }

    async fn count(&self, cypher: &str) -> StoreResult<u64> {
        let count: Option<i64> = self
            .guarded("count", self.client.query_scalar(Query::new(cypher.to_string()), "count"))
            .await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn upsert_item(&self, item: &Item) -> StoreResult<()> {
        let node = Query::new(
            "MERGE (i:Item {tag: $tag})
             WITH i WHERE i.updated_at IS NULL OR i.updated_at <= $updated_at
             SET i.status = $status,
                 i.current_location = $current_location,
                 i.routing = $routing,
                 i.off_route = $off_route,
                 i.risk_score = $risk_score,
                 i.risk_updated_at = $risk_updated_at,
                 i.owner_ref = $owner_ref,
                 i.created_at = $created_at,
                 i.updated_at = $updated_at,
                 i.last_seen_at = $last_seen_at
             WITH i
             OPTIONAL MATCH (i)-[old:CURRENTLY_AT]->(:Location)
             DELETE old
             WITH DISTINCT i
             MERGE (l:Location {code: $current_location})
             MERGE (i)-[:CURRENTLY_AT]->(l)"
                .to_string(),
        )
        .param("tag", item.tag.as_str())
        .param("status", item.status.as_str())
        .param("current_location", item.current_location.as_str())
        .param("routing", item.routing.clone())
        .param("off_route", item.off_route)
        .param("risk_score", item.risk_score)
        .param("risk_updated_at", opt_ts(item.risk_updated_at))
        .param("owner_ref", item.owner_ref.as_deref().unwrap_or(""))
        .param("created_at", time::to_storage(&item.created_at))
        .param("updated_at", time::to_storage(&item.updated_at))
        .param("last_seen_at", time::to_storage(&item.last_seen_at));

        let legs = Query::new(
            "UNWIND $routing AS code
             MERGE (:Location {code: code})
             WITH count(*) AS stops
             UNWIND range(0, size($routing) - 2) AS idx
             MATCH (a:Location {code: $routing[idx]}), (b:Location {code: $routing[idx + 1]})
             MERGE (a)-[:CONNECTS_TO]->(b)"
                .to_string(),
        )
        .param("routing", item.routing.clone());

        self.guarded("upsert item", self.client.execute_in_txn(vec![node, legs]))
            .await?;
        debug!(tag = %item.tag, status = %item.status, "Upserted item node");
        Ok(())
    }

    async fn upsert_event(&self, event: &Event) -> StoreResult<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let query = Query::new(
            "MATCH (i:Item {tag: $tag})
             MERGE (e:Event {id: $id})
             SET e.tag = $tag,
                 e.event_type = $event_type,
                 e.location = $location,
                 e.timestamp = $timestamp,
                 e.payload = $payload,
                 e.out_of_order = $out_of_order,
                 e.recorded_at = $recorded_at
             MERGE (i)-[:HAS_EVENT]->(e)
             MERGE (l:Location {code: $location})
             MERGE (e)-[:AT]->(l)
             RETURN e.id AS id"
                .to_string(),
        )
        .param("tag", event.tag.as_str())
        .param("id", event.event_id.as_str())
        .param("event_type", event.event_type.as_str())
        .param("location", event.location.as_str())
        .param("timestamp", time::to_storage(&event.timestamp))
        .param("payload", payload)
        .param("out_of_order", event.out_of_order)
        .param("recorded_at", time::to_storage(&event.recorded_at));

        let rows = self.rows("upsert event", query).await?;
        if rows.is_empty() {
            return Err(StoreError::not_found("item", event.tag.as_str()));
        }
        debug!(event_id = %event.event_id, tag = %event.tag, "Upserted event node");
        Ok(())
    }

    async fn delete_item(&self, tag: &str) -> StoreResult<()> {
        let query = Query::new(
            "MATCH (i:Item {tag: $tag})
             OPTIONAL MATCH (i)-[:HAS_EVENT]->(e:Event)
             WITH i, collect(e) AS events
             FOREACH (ev IN events | DETACH DELETE ev)
             DETACH DELETE i"
                .to_string(),
        )
        .param("tag", tag);
        self.guarded("delete item", self.client.execute(query)).await?;
        debug!(tag, "Deleted item node");
        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn apply(&self, mutation: &GraphMutation) -> StoreResult<()> {
        match mutation {
            GraphMutation::UpsertItem { item } => self.upsert_item(item).await,
            GraphMutation::UpsertEvent { event } => self.upsert_event(event).await,
            GraphMutation::DeleteItem { tag } => self.delete_item(tag).await,
        }
    }

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>> {
        let query = Query::new(format!(
            "MATCH (i:Item {{tag: $tag}}) RETURN {}",
            item_projection("i")
        ))
        .param("tag", tag);
        let rows = self.rows("get item", query).await?;
        rows.first().map(row_to_item).transpose()
    }

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        let query = Query::new(format!(
            "MATCH (e:Event {{id: $id}}) RETURN {}",
            event_projection("e")
        ))
        .param("id", event_id);
        let rows = self.rows("get event", query).await?;
        rows.first().map(row_to_event).transpose()
    }

    async fn neighbors(
        &self,
        node: &NodeKey,
        relation: Relation,
        direction: Direction,
    ) -> StoreResult<Vec<GraphNode>> {
        let (source, target) = endpoints(relation, direction);
        if node.label() != source {
            return Ok(Vec::new());
        }
        let arrow = match direction {
            Direction::Outgoing => format!("-[:{}]->", relation.as_cypher()),
            Direction::Incoming => format!("<-[:{}]-", relation.as_cypher()),
        };
        let (projection, order) = match target {
            "Item" => (item_projection("m"), "tag"),
            "Event" => (event_projection("m"), "timestamp, id"),
            _ => ("m.code AS code".to_string(), "code"),
        };
        let query = Query::new(format!(
            "MATCH (n:{} {{{}: $key}}){}(m:{})
             RETURN DISTINCT {}
             ORDER BY {}",
            source,
            node.key_property(),
            arrow,
            target,
            projection,
            order
        ))
        .param("key", node.key());

        let rows = self.rows("neighbors", query).await?;
        rows.iter()
            .map(|row| match target {
                "Item" => row_to_item(row).map(GraphNode::Item),
                "Event" => row_to_event(row).map(GraphNode::Event),
                _ => Ok(GraphNode::Location(get_str(row, "code")?)),
            })
            .collect()
    }

    async fn shortest_path(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        relation: Relation,
    ) -> StoreResult<Option<Vec<NodeKey>>> {
        let query = Query::new(format!(
            "MATCH (a:{} {{{}: $from}}), (b:{} {{{}: $to}})
             MATCH p = shortestPath((a)-[:{}*0..{}]->(b))
             RETURN [n IN nodes(p) | labels(n)[0]] AS labels,
                    [n IN nodes(p) | CASE labels(n)[0]
                        WHEN 'Item' THEN n.tag
                        WHEN 'Event' THEN n.id
                        ELSE n.code END] AS keys",
            from.label(),
            from.key_property(),
            to.label(),
            to.key_property(),
            relation.as_cypher(),
            MAX_PATH_HOPS
        ))
        .param("from", from.key())
        .param("to", to.key());

        let rows = self.rows("shortest path", query).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let labels: Vec<String> = row.get("labels").map_err(decode_err)?;
        let keys: Vec<String> = row.get("keys").map_err(decode_err)?;
        labels
            .into_iter()
            .zip(keys)
            .map(|(label, key)| match label.as_str() {
                "Item" => Ok(NodeKey::Item(key)),
                "Event" => Ok(NodeKey::Event(key)),
                "Location" => Ok(NodeKey::Location(key)),
                other => Err(StoreError::Backend(format!("unexpected label '{}' on path", other))),
            })
            .collect::<StoreResult<Vec<_>>>()
            .map(Some)
    }

    async fn items_matching(
        &self,
        window: &TimeWindow,
        predicate: &ItemPredicate,
    ) -> StoreResult<Vec<Item>> {
        let statuses: Vec<String> = predicate
            .statuses
            .as_ref()
            .map(|s| s.iter().map(|st| st.as_str().to_string()).collect())
            .unwrap_or_default();
        let query = Query::new(format!(
            "MATCH (i:Item)
             WHERE i.last_seen_at >= $start AND i.last_seen_at <= $end
               AND ($any_status OR i.status IN $statuses)
               AND ($location = '' OR i.current_location = $location)
             RETURN {}
             ORDER BY tag",
            item_projection("i")
        ))
        .param("start", time::to_storage(&window.start))
        .param("end", time::to_storage(&window.end))
        .param("any_status", predicate.statuses.is_none())
        .param("statuses", statuses)
        .param("location", predicate.location.as_deref().unwrap_or(""));

        let rows = self.rows("items matching", query).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn list_item_tags(&self) -> StoreResult<Vec<String>> {
        let query = Query::new("MATCH (i:Item) RETURN i.tag AS tag ORDER BY tag".to_string());
        let rows = self.rows("list tags", query).await?;
        rows.iter().map(|row| get_str(row, "tag")).collect()
    }

    async fn counts(&self) -> StoreResult<EntityCounts> {
        Ok(EntityCounts {
            items: self.count("MATCH (i:Item) RETURN count(i) AS count").await?,
            events: self.count("MATCH (e:Event) RETURN count(e) AS count").await?,
        })
    }

    async fn last_write_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let query = Query::new(
            "OPTIONAL MATCH (i:Item)
             WITH max(i.updated_at) AS items
             OPTIONAL MATCH (e:Event)
             RETURN coalesce(items, '') AS items, coalesce(max(e.recorded_at), '') AS events"
                .to_string(),
        );
        let rows = self.rows("last write", query).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let latest = get_str(row, "items")?.max(get_str(row, "events")?);
        parse_opt_ts(&latest)
    }
}

/// Source and target labels of a relation walked in `direction`.
fn endpoints(relation: Relation, direction: Direction) -> (&'static str, &'static str) {
    let (from, to) = match relation {
        Relation::HasEvent => ("Item", "Event"),
        Relation::At => ("Event", "Location"),
        Relation::CurrentlyAt => ("Item", "Location"),
        Relation::ConnectsTo => ("Location", "Location"),
    };
    match direction {
        Direction::Outgoing => (from, to),
        Direction::Incoming => (to, from),
    }
}

fn item_projection(var: &str) -> String {
    format!(
        "{v}.tag AS tag, {v}.status AS status, {v}.current_location AS current_location,
         {v}.routing AS routing, {v}.off_route AS off_route, {v}.risk_score AS risk_score,
         {v}.risk_updated_at AS risk_updated_at, {v}.owner_ref AS owner_ref,
         {v}.created_at AS created_at, {v}.updated_at AS updated_at,
         {v}.last_seen_at AS last_seen_at",
        v = var
    )
}

fn event_projection(var: &str) -> String {
    format!(
        "{v}.id AS id, {v}.tag AS tag, {v}.event_type AS event_type, {v}.location AS location,
         {v}.timestamp AS timestamp, {v}.payload AS payload,
         {v}.out_of_order AS out_of_order, {v}.recorded_at AS recorded_at",
        v = var
    )
}

fn row_to_item(row: &Row) -> StoreResult<Item> {
    let status = get_str(row, "status")?;
    let owner_ref = get_str(row, "owner_ref")?;
    Ok(Item {
        tag: get_str(row, "tag")?,
        status: ItemStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown item status '{}'", status)))?,
        current_location: get_str(row, "current_location")?,
        routing: row.get("routing").map_err(decode_err)?,
        off_route: row.get("off_route").map_err(decode_err)?,
        risk_score: row.get("risk_score").map_err(decode_err)?,
        risk_updated_at: parse_opt_ts(&get_str(row, "risk_updated_at")?)?,
        owner_ref: (!owner_ref.is_empty()).then_some(owner_ref),
        created_at: parse_ts(&get_str(row, "created_at")?)?,
        updated_at: parse_ts(&get_str(row, "updated_at")?)?,
        last_seen_at: parse_ts(&get_str(row, "last_seen_at")?)?,
    })
}

fn row_to_event(row: &Row) -> StoreResult<Event> {
    let event_type = get_str(row, "event_type")?;
    let payload = get_str(row, "payload")?;
    Ok(Event {
        event_id: get_str(row, "id")?,
        tag: get_str(row, "tag")?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| StoreError::Backend(format!("unknown event type '{}'", event_type)))?,
        location: get_str(row, "location")?,
        timestamp: parse_ts(&get_str(row, "timestamp")?)?,
        payload: serde_json::from_str(&payload)?,
        out_of_order: row.get("out_of_order").map_err(decode_err)?,
        recorded_at: parse_ts(&get_str(row, "recorded_at")?)?,
    })
}

fn get_str(row: &Row, key: &str) -> StoreResult<String> {
    row.get::<String>(key).map_err(decode_err)
}

fn decode_err(err: impl std::fmt::Debug) -> StoreError {
    StoreError::Backend(format!("Failed to decode Neo4j row: {:?}", err))
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| time::to_storage(&t)).unwrap_or_default()
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    time::from_storage(raw)
        .map_err(|e| StoreError::Backend(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: &str) -> StoreResult<Option<DateTime<Utc>>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        parse_ts(raw).map(Some)
    }
}

/// Map a Neo4j failure onto the shared taxonomy.
///
/// neo4rs reports connection, pool and server-side transient failures with
/// distinct messages but no stable retry flag, so classification is textual.
pub fn classify(err: anyhow::Error) -> StoreError {
    let msg = format!("{:#}", err);
    if is_transient_message(&msg) {
        StoreError::Transient(msg)
    } else {
        StoreError::Backend(msg)
    }
}

fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "connection closed",
        "broken pipe",
        "pool",
        "io error",
        "unavailable",
        "transienterror",
        "deadlock",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}
