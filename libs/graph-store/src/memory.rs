//! Embedded in-memory graph engine.
//!
//! Adjacency maps behind a `parking_lot::RwLock`. Vertex ids are assigned
//! sequentially, and all "first match" lookups iterate ids ascending, which
//! is the deterministic backend order the repository contract asks for. No
//! lock is ever held across an await point.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::error::{GraphError, Result};
use crate::store::{labels, props, GraphStore, VersionedWrite};
use crate::types::{
    property_matches, unwrap_singleton, Direction, EdgeRecord, PropertyMap, Vertex, VertexId,
};

#[derive(Debug, Clone)]
struct StoredVertex {
    label: String,
    properties: PropertyMap,
}

#[derive(Default)]
struct GraphInner {
    next_id: VertexId,
    vertices: HashMap<VertexId, StoredVertex>,
    label_index: BTreeMap<String, BTreeSet<VertexId>>,
    /// out vertex -> (edge label, in vertex) -> edge properties
    out_adj: HashMap<VertexId, BTreeMap<(String, VertexId), PropertyMap>>,
    /// in vertex -> (edge label, out vertex)
    in_adj: HashMap<VertexId, BTreeSet<(String, VertexId)>>,
}

impl GraphInner {
    fn insert_vertex(&mut self, label: &str, properties: PropertyMap) -> VertexId {
        self.next_id += 1;
        let id = self.next_id;
        self.vertices.insert(
            id,
            StoredVertex {
                label: label.to_string(),
                properties,
            },
        );
        self.label_index
            .entry(label.to_string())
            .or_default()
            .insert(id);
        id
    }

    fn remove_vertex(&mut self, id: VertexId) -> bool {
        let Some(vertex) = self.vertices.remove(&id) else {
            return false;
        };
        if let Some(ids) = self.label_index.get_mut(&vertex.label) {
            ids.remove(&id);
            if ids.is_empty() {
                self.label_index.remove(&vertex.label);
            }
        }
        if let Some(out) = self.out_adj.remove(&id) {
            for (edge_label, in_vertex) in out.into_keys() {
                if let Some(set) = self.in_adj.get_mut(&in_vertex) {
                    set.remove(&(edge_label, id));
                }
            }
        }
        if let Some(incoming) = self.in_adj.remove(&id) {
            for (edge_label, out_vertex) in incoming {
                if let Some(map) = self.out_adj.get_mut(&out_vertex) {
                    map.remove(&(edge_label, id));
                }
            }
        }
        true
    }

    fn insert_edge(
        &mut self,
        label: &str,
        out_vertex: VertexId,
        in_vertex: VertexId,
        properties: PropertyMap,
    ) {
        self.out_adj
            .entry(out_vertex)
            .or_default()
            .insert((label.to_string(), in_vertex), properties);
        self.in_adj
            .entry(in_vertex)
            .or_default()
            .insert((label.to_string(), out_vertex));
    }

    fn materialize(&self, id: VertexId) -> Option<Vertex> {
        let stored = self.vertices.get(&id)?;
        let properties = stored
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), unwrap_singleton(v.clone())))
            .collect();
        Some(Vertex {
            id,
            label: stored.label.clone(),
            properties,
        })
    }

    fn label_ids(&self, label: &str) -> impl Iterator<Item = VertexId> + '_ {
        self.label_index
            .get(label)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    fn vertex_matches(&self, id: VertexId, key: &str, value: &str) -> bool {
        self.vertices
            .get(&id)
            .and_then(|v| v.properties.get(key))
            .map(|v| property_matches(v, value))
            .unwrap_or(false)
    }

    fn find_first(&self, label: &str, key: &str, value: &str) -> Option<VertexId> {
        self.label_ids(label)
            .find(|id| self.vertex_matches(*id, key, value))
    }

    fn current_of(&self, label: &str, fhir_id: &str) -> Option<VertexId> {
        self.label_ids(label).find(|id| {
            self.vertex_matches(*id, props::ID, fhir_id)
                && self.vertex_matches(*id, props::IS_CURRENT, "true")
        })
    }

    /// Every version vertex of `(label, fhirId)`: current and archives, but
    /// not placeholders (which carry no `versionId`).
    fn versions_of(&self, label: &str, fhir_id: &str) -> Vec<VertexId> {
        self.label_ids(label)
            .filter(|id| {
                self.vertex_matches(*id, props::ID, fhir_id)
                    && self
                        .vertices
                        .get(id)
                        .map(|v| v.properties.contains_key(props::VERSION_ID))
                        .unwrap_or(false)
            })
            .collect()
    }

    fn version_number(&self, id: VertexId) -> i64 {
        self.vertices
            .get(&id)
            .and_then(|v| v.properties.get(props::VERSION_ID))
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    fn last_updated(&self, id: VertexId) -> String {
        self.vertices
            .get(&id)
            .and_then(|v| v.properties.get(props::LAST_UPDATED))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn next_version_number(&self, label: &str, fhir_id: &str) -> i64 {
        self.versions_of(label, fhir_id)
            .into_iter()
            .map(|id| self.version_number(id))
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Newest-first ordering: `lastUpdated` desc, ties broken by `versionId`
    /// desc. RFC 3339 micros timestamps compare correctly as strings.
    fn sort_newest_first(&self, ids: &mut [VertexId]) {
        ids.sort_by(|a, b| {
            let key_a = (self.last_updated(*a), self.version_number(*a));
            let key_b = (self.last_updated(*b), self.version_number(*b));
            key_b.cmp(&key_a)
        });
    }

    /// Archive the current state (if any), keep the `supersedes` chain
    /// pointing newer→older, then write the new state onto the stable
    /// current vertex.
    fn write_version(
        &mut self,
        label: &str,
        fhir_id: &str,
        mut properties: PropertyMap,
        deleted: bool,
    ) -> VersionedWrite {
        let now = now_rfc3339();
        let next = self.next_version_number(label, fhir_id);

        let vertex_id = match self.current_of(label, fhir_id) {
            Some(current_id) => {
                let mut archived = self
                    .vertices
                    .get(&current_id)
                    .expect("current vertex exists")
                    .properties
                    .clone();
                archived.insert(props::IS_CURRENT.to_string(), JsonValue::Bool(false));
                let archive_id = self.insert_vertex(label, archived);

                // The archive inherits the predecessor link the current
                // vertex held, keeping the chain newer→older.
                let inherited = self.out_adj.get_mut(&current_id).and_then(|edges| {
                    let key = edges
                        .keys()
                        .find(|(l, _)| l == labels::SUPERSEDES)
                        .cloned()?;
                    let properties = edges.remove(&key)?;
                    Some((key.1, properties))
                });
                if let Some((predecessor, edge_props)) = inherited {
                    if let Some(set) = self.in_adj.get_mut(&predecessor) {
                        set.remove(&(labels::SUPERSEDES.to_string(), current_id));
                    }
                    self.insert_edge(labels::SUPERSEDES, archive_id, predecessor, edge_props);
                }
                self.insert_edge(labels::SUPERSEDES, current_id, archive_id, PropertyMap::new());
                current_id
            }
            None => {
                // A placeholder (or other unversioned vertex) for this key is
                // upgraded in place so reference edges keep their target.
                let unversioned = self.label_ids(label).find(|id| {
                    self.vertex_matches(*id, props::ID, fhir_id)
                        && !self
                            .vertices
                            .get(id)
                            .map(|v| v.properties.contains_key(props::VERSION_ID))
                            .unwrap_or(false)
                });
                match unversioned {
                    Some(id) => id,
                    None => self.insert_vertex(label, PropertyMap::new()),
                }
            }
        };

        properties.insert(props::ID.to_string(), JsonValue::String(fhir_id.to_string()));
        properties.insert(
            props::VERSION_ID.to_string(),
            JsonValue::String(next.to_string()),
        );
        properties.insert(
            props::LAST_UPDATED.to_string(),
            JsonValue::String(now.clone()),
        );
        properties.insert(props::IS_CURRENT.to_string(), JsonValue::Bool(true));
        properties.insert(props::IS_DELETED.to_string(), JsonValue::Bool(deleted));
        properties.remove(props::IS_PLACEHOLDER);
        self.vertices
            .get_mut(&vertex_id)
            .expect("vertex just resolved")
            .properties = properties;

        VersionedWrite {
            graph_id: vertex_id,
            version_id: next,
            last_updated: now,
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// In-memory [`GraphStore`] implementation.
#[derive(Default)]
pub struct MemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn add_vertex(&self, label: &str, properties: PropertyMap) -> Result<Vertex> {
        let mut g = self.inner.write();
        let id = g.insert_vertex(label, properties);
        Ok(g.materialize(id).expect("vertex just inserted"))
    }

    async fn add_vertex_and_return_id(
        &self,
        label: &str,
        properties: PropertyMap,
    ) -> Result<VertexId> {
        Ok(self.inner.write().insert_vertex(label, properties))
    }

    async fn get_vertex(&self, id: VertexId) -> Result<Option<Vertex>> {
        Ok(self.inner.read().materialize(id))
    }

    async fn update_vertex_properties(
        &self,
        id: VertexId,
        properties: PropertyMap,
    ) -> Result<bool> {
        let mut g = self.inner.write();
        match g.vertices.get_mut(&id) {
            Some(vertex) => {
                for (key, value) in properties {
                    vertex.properties.insert(key, value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_vertex(&self, id: VertexId) -> Result<bool> {
        Ok(self.inner.write().remove_vertex(id))
    }

    async fn count_vertices(&self) -> Result<u64> {
        Ok(self.inner.read().vertices.len() as u64)
    }

    async fn drop_all(&self) -> Result<u64> {
        let mut g = self.inner.write();
        let dropped = g.vertices.len() as u64;
        *g = GraphInner::default();
        Ok(dropped)
    }

    async fn upsert_vertex_by_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
        properties: PropertyMap,
    ) -> Result<VertexId> {
        let mut g = self.inner.write();
        match g.find_first(label, key, value) {
            Some(id) => {
                let vertex = g.vertices.get_mut(&id).expect("indexed vertex exists");
                for (k, v) in properties {
                    vertex.properties.insert(k, v);
                }
                Ok(id)
            }
            None => {
                let mut properties = properties;
                properties
                    .entry(key.to_string())
                    .or_insert_with(|| JsonValue::String(value.to_string()));
                Ok(g.insert_vertex(label, properties))
            }
        }
    }

    async fn get_vertex_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<Vertex>> {
        let g = self.inner.read();
        Ok(g.find_first(label, key, value).and_then(|id| g.materialize(id)))
    }

    async fn get_vertex_id_by_label_and_property(
        &self,
        label: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<VertexId>> {
        Ok(self.inner.read().find_first(label, key, value))
    }

    async fn add_edge(
        &self,
        label: &str,
        out_vertex: VertexId,
        in_vertex: VertexId,
        properties: PropertyMap,
    ) -> Result<()> {
        let mut g = self.inner.write();
        for endpoint in [out_vertex, in_vertex] {
            if !g.vertices.contains_key(&endpoint) {
                return Err(GraphError::VertexNotFound(endpoint));
            }
        }
        g.insert_edge(label, out_vertex, in_vertex, properties);
        Ok(())
    }

    async fn add_edge_by_property(
        &self,
        label: &str,
        out_label: &str,
        out_key: &str,
        out_value: &str,
        in_label: &str,
        in_key: &str,
        in_value: &str,
        properties: PropertyMap,
    ) -> Result<bool> {
        let mut g = self.inner.write();
        let out_vertex = g.find_first(out_label, out_key, out_value);
        let in_vertex = g.find_first(in_label, in_key, in_value);
        match (out_vertex, in_vertex) {
            (Some(out_vertex), Some(in_vertex)) => {
                g.insert_edge(label, out_vertex, in_vertex, properties);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn edge_exists(
        &self,
        label: &str,
        out_vertex: VertexId,
        in_vertex: VertexId,
    ) -> Result<bool> {
        let g = self.inner.read();
        Ok(g.out_adj
            .get(&out_vertex)
            .map(|edges| edges.contains_key(&(label.to_string(), in_vertex)))
            .unwrap_or(false))
    }

    async fn get_edges_for_vertex(&self, id: VertexId) -> Result<Vec<EdgeRecord>> {
        let g = self.inner.read();
        if !g.vertices.contains_key(&id) {
            return Err(GraphError::VertexNotFound(id));
        }
        let mut records = Vec::new();
        if let Some(out) = g.out_adj.get(&id) {
            for ((label, target), properties) in out {
                records.push(EdgeRecord {
                    direction: Direction::Out,
                    label: label.clone(),
                    target: *target,
                    properties: properties.clone(),
                });
            }
        }
        if let Some(incoming) = g.in_adj.get(&id) {
            for (label, source) in incoming {
                let properties = g
                    .out_adj
                    .get(source)
                    .and_then(|edges| edges.get(&(label.clone(), id)))
                    .cloned()
                    .unwrap_or_default();
                records.push(EdgeRecord {
                    direction: Direction::In,
                    label: label.clone(),
                    target: *source,
                    properties,
                });
            }
        }
        Ok(records)
    }

    async fn get_vertices_by_label(
        &self,
        label: &str,
        filters: &[(String, String)],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        Ok(g.label_ids(label)
            .filter(|id| {
                filters
                    .iter()
                    .all(|(key, value)| g.vertex_matches(*id, key, value))
            })
            .skip(offset)
            .take(limit)
            .filter_map(|id| g.materialize(id))
            .collect())
    }

    async fn count_vertices_by_label(
        &self,
        label: &str,
        filters: &[(String, String)],
    ) -> Result<u64> {
        let g = self.inner.read();
        Ok(g.label_ids(label)
            .filter(|id| {
                filters
                    .iter()
                    .all(|(key, value)| g.vertex_matches(*id, key, value))
            })
            .count() as u64)
    }

    async fn get_out_neighbors(
        &self,
        id: VertexId,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        Ok(g.out_adj
            .get(&id)
            .into_iter()
            .flat_map(|edges| edges.keys())
            .filter(|(label, _)| edge_label.map(|l| l == label).unwrap_or(true))
            .map(|(_, target)| *target)
            .take(limit)
            .filter_map(|target| g.materialize(target))
            .collect())
    }

    async fn get_in_neighbors(
        &self,
        id: VertexId,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        Ok(g.in_adj
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|(label, _)| edge_label.map(|l| l == label).unwrap_or(true))
            .map(|(_, source)| *source)
            .take(limit)
            .filter_map(|source| g.materialize(source))
            .collect())
    }

    async fn traverse(
        &self,
        start: VertexId,
        max_hops: usize,
        edge_label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        if !g.vertices.contains_key(&start) {
            return Err(GraphError::VertexNotFound(start));
        }

        let follow = |label: &str| match edge_label {
            Some(wanted) => label == wanted,
            None => label != labels::SUPERSEDES,
        };

        let mut visited: HashSet<VertexId> = HashSet::from([start]);
        let mut queue: VecDeque<(VertexId, usize)> = VecDeque::from([(start, 0)]);
        let mut reached = Vec::new();

        while let Some((vertex, depth)) = queue.pop_front() {
            if depth == max_hops {
                continue;
            }
            let outgoing = g
                .out_adj
                .get(&vertex)
                .into_iter()
                .flat_map(|edges| edges.keys())
                .filter(|(label, _)| follow(label))
                .map(|(_, target)| *target);
            let incoming = g
                .in_adj
                .get(&vertex)
                .into_iter()
                .flatten()
                .filter(|(label, _)| follow(label))
                .map(|(_, source)| *source);
            for neighbor in outgoing.chain(incoming).collect::<Vec<_>>() {
                if visited.insert(neighbor) {
                    if let Some(materialized) = g.materialize(neighbor) {
                        reached.push(materialized);
                        if reached.len() == limit {
                            return Ok(reached);
                        }
                    }
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        Ok(reached)
    }

    async fn get_current_version(&self, label: &str, fhir_id: &str) -> Result<Option<Vertex>> {
        let g = self.inner.read();
        Ok(g.current_of(label, fhir_id).and_then(|id| g.materialize(id)))
    }

    async fn get_version(
        &self,
        label: &str,
        fhir_id: &str,
        version_id: &str,
    ) -> Result<Option<Vertex>> {
        let g = self.inner.read();
        Ok(g.versions_of(label, fhir_id)
            .into_iter()
            .find(|id| g.vertex_matches(*id, props::VERSION_ID, version_id))
            .and_then(|id| g.materialize(id)))
    }

    async fn get_version_history(
        &self,
        label: &str,
        fhir_id: &str,
        limit: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        let mut ids = g.versions_of(label, fhir_id);
        g.sort_newest_first(&mut ids);
        ids.truncate(limit);
        Ok(ids.into_iter().filter_map(|id| g.materialize(id)).collect())
    }

    async fn get_type_history(&self, label: &str, limit: usize) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        let mut ids: Vec<VertexId> = g
            .label_ids(label)
            .filter(|id| {
                g.vertices
                    .get(id)
                    .map(|v| v.properties.contains_key(props::VERSION_ID))
                    .unwrap_or(false)
            })
            .collect();
        g.sort_newest_first(&mut ids);
        ids.truncate(limit);
        Ok(ids.into_iter().filter_map(|id| g.materialize(id)).collect())
    }

    async fn get_type_history_since(
        &self,
        label: &str,
        since: &str,
        limit: usize,
    ) -> Result<Vec<Vertex>> {
        let g = self.inner.read();
        let mut ids: Vec<VertexId> = g
            .label_ids(label)
            .filter(|id| {
                g.vertices
                    .get(id)
                    .map(|v| v.properties.contains_key(props::VERSION_ID))
                    .unwrap_or(false)
                    && g.last_updated(*id).as_str() >= since
            })
            .collect();
        g.sort_newest_first(&mut ids);
        ids.truncate(limit);
        Ok(ids.into_iter().filter_map(|id| g.materialize(id)).collect())
    }

    async fn get_next_version_number(&self, label: &str, fhir_id: &str) -> Result<i64> {
        Ok(self.inner.read().next_version_number(label, fhir_id))
    }

    async fn mark_version_non_current(&self, label: &str, fhir_id: &str) -> Result<bool> {
        let mut g = self.inner.write();
        match g.current_of(label, fhir_id) {
            Some(id) => {
                g.vertices
                    .get_mut(&id)
                    .expect("indexed vertex exists")
                    .properties
                    .insert(props::IS_CURRENT.to_string(), JsonValue::Bool(false));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_supersedes_edge(&self, newer: VertexId, older: VertexId) -> Result<()> {
        self.add_edge(labels::SUPERSEDES, newer, older, PropertyMap::new())
            .await
    }

    async fn create_versioned_vertex(
        &self,
        label: &str,
        fhir_id: &str,
        properties: PropertyMap,
    ) -> Result<VersionedWrite> {
        Ok(self
            .inner
            .write()
            .write_version(label, fhir_id, properties, false))
    }

    async fn create_tombstone(&self, label: &str, fhir_id: &str) -> Result<Option<VersionedWrite>> {
        let mut g = self.inner.write();
        if g.current_of(label, fhir_id).is_none() {
            return Ok(None);
        }
        let mut properties = PropertyMap::new();
        properties.insert(
            props::RESOURCE_TYPE.to_string(),
            JsonValue::String(label.to_string()),
        );
        Ok(Some(g.write_version(label, fhir_id, properties, true)))
    }

    async fn delete_all_versions(&self, label: &str, fhir_id: &str) -> Result<u64> {
        let mut g = self.inner.write();
        let ids: Vec<VertexId> = g
            .label_ids(label)
            .filter(|id| g.vertex_matches(*id, props::ID, fhir_id))
            .collect();
        let mut dropped = 0;
        for id in ids {
            if g.remove_vertex(id) {
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    async fn delete_version(&self, label: &str, fhir_id: &str, version_id: &str) -> Result<bool> {
        let mut g = self.inner.write();
        let Some(id) = g
            .versions_of(label, fhir_id)
            .into_iter()
            .find(|id| g.vertex_matches(*id, props::VERSION_ID, version_id))
        else {
            return Ok(false);
        };
        if g.vertex_matches(id, props::IS_CURRENT, "true") {
            return Err(GraphError::CurrentVersion {
                label: label.to_string(),
                fhir_id: fhir_id.to_string(),
                version_id: version_id.to_string(),
            });
        }
        Ok(g.remove_vertex(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pmap(value: JsonValue) -> PropertyMap {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn versioned_writes_form_dense_sequence_with_supersedes_chain() {
        let store = MemoryGraphStore::new();
        for i in 1..=4 {
            let write = store
                .create_versioned_vertex(
                    "Patient",
                    "p1",
                    pmap(json!({"resourceType": "Patient", "json": format!("v{i}")})),
                )
                .await
                .unwrap();
            assert_eq!(write.version_id, i);
        }

        let history = store.get_version_history("Patient", "p1", 100).await.unwrap();
        assert_eq!(history.len(), 4);
        let versions: Vec<String> = history
            .iter()
            .map(|v| v.property_str(props::VERSION_ID).unwrap())
            .collect();
        assert_eq!(versions, vec!["4", "3", "2", "1"]);
        assert!(history[0].property_bool(props::IS_CURRENT));
        assert!(!history[1].property_bool(props::IS_CURRENT));

        // N writes leave N-1 supersedes links (the first version has no
        // predecessor), chained newer→older.
        let mut supersedes = 0;
        for vertex in &history {
            let edges = store.get_edges_for_vertex(vertex.id).await.unwrap();
            supersedes += edges
                .iter()
                .filter(|e| e.direction == Direction::Out && e.label == labels::SUPERSEDES)
                .count();
        }
        assert_eq!(supersedes, 3);
    }

    #[tokio::test]
    async fn current_vertex_id_is_stable_across_updates() {
        let store = MemoryGraphStore::new();
        let first = store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "a"})))
            .await
            .unwrap();
        let second = store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "b"})))
            .await
            .unwrap();
        assert_eq!(first.graph_id, second.graph_id);

        let current = store.get_current_version("Patient", "p1").await.unwrap().unwrap();
        assert_eq!(current.id, first.graph_id);
        assert_eq!(current.property_str(props::JSON).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn placeholder_is_upgraded_in_place() {
        let store = MemoryGraphStore::new();
        let placeholder = store
            .upsert_vertex_by_property(
                "Patient",
                props::ID,
                "p1",
                pmap(json!({"resourceType": "Patient", "id": "p1", "isPlaceholder": true})),
            )
            .await
            .unwrap();

        let write = store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "{}"})))
            .await
            .unwrap();
        assert_eq!(write.graph_id, placeholder);
        assert_eq!(write.version_id, 1);

        let vertex = store.get_vertex(placeholder).await.unwrap().unwrap();
        assert!(!vertex.properties.contains_key(props::IS_PLACEHOLDER));
        assert!(vertex.property_bool(props::IS_CURRENT));
    }

    #[tokio::test]
    async fn tombstone_keeps_no_body_and_stays_current() {
        let store = MemoryGraphStore::new();
        store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "{}"})))
            .await
            .unwrap();
        let tombstone = store.create_tombstone("Patient", "p1").await.unwrap().unwrap();
        assert_eq!(tombstone.version_id, 2);

        let current = store.get_current_version("Patient", "p1").await.unwrap().unwrap();
        assert!(current.property_bool(props::IS_DELETED));
        assert!(!current.properties.contains_key(props::JSON));

        assert!(store.create_tombstone("Patient", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edge_identity_is_label_out_in() {
        let store = MemoryGraphStore::new();
        let a = store
            .add_vertex_and_return_id("Observation", pmap(json!({"id": "o1"})))
            .await
            .unwrap();
        let b = store
            .add_vertex_and_return_id("Patient", pmap(json!({"id": "p1"})))
            .await
            .unwrap();

        assert!(!store.edge_exists("fhir:ref:subject.reference", a, b).await.unwrap());
        store
            .add_edge("fhir:ref:subject.reference", a, b, pmap(json!({"path": "subject.reference"})))
            .await
            .unwrap();
        assert!(store.edge_exists("fhir:ref:subject.reference", a, b).await.unwrap());
        assert!(!store.edge_exists("fhir:ref:subject.reference", b, a).await.unwrap());

        // Re-adding coalesces onto the same identity.
        store
            .add_edge("fhir:ref:subject.reference", a, b, PropertyMap::new())
            .await
            .unwrap();
        let edges = store.get_edges_for_vertex(a).await.unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn traverse_skips_supersedes_and_bounds_hops() {
        let store = MemoryGraphStore::new();
        store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "{}"})))
            .await
            .unwrap();
        store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "{}"})))
            .await
            .unwrap();
        let patient = store.get_current_version("Patient", "p1").await.unwrap().unwrap();

        let obs = store
            .create_versioned_vertex("Observation", "o1", pmap(json!({"json": "{}"})))
            .await
            .unwrap();
        store
            .add_edge("fhir:ref:subject.reference", obs.graph_id, patient.id, PropertyMap::new())
            .await
            .unwrap();

        // Only the observation is reachable: the archived Patient version
        // hangs off a supersedes edge and must stay invisible.
        let reached = store.traverse(patient.id, 3, None, 100).await.unwrap();
        assert_eq!(reached.len(), 1);
        assert_eq!(reached[0].id, obs.graph_id);

        let zero_hops = store.traverse(patient.id, 0, None, 100).await.unwrap();
        assert!(zero_hops.is_empty());
    }

    #[tokio::test]
    async fn delete_version_refuses_current() {
        let store = MemoryGraphStore::new();
        store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "a"})))
            .await
            .unwrap();
        store
            .create_versioned_vertex("Patient", "p1", pmap(json!({"json": "b"})))
            .await
            .unwrap();

        assert!(store.delete_version("Patient", "p1", "1").await.unwrap());
        assert!(!store.delete_version("Patient", "p1", "7").await.unwrap());
        assert!(matches!(
            store.delete_version("Patient", "p1", "2").await,
            Err(GraphError::CurrentVersion { .. })
        ));

        assert_eq!(store.delete_all_versions("Patient", "p1").await.unwrap(), 1);
        assert!(store.get_current_version("Patient", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn property_lookups_and_edge_by_property() {
        let store = MemoryGraphStore::new();
        let a = store
            .add_vertex_and_return_id("Observation", pmap(json!({"id": "o1"})))
            .await
            .unwrap();
        store
            .add_vertex("Patient", pmap(json!({"id": "p1"})))
            .await
            .unwrap();

        assert!(store
            .update_vertex_properties(a, pmap(json!({"json": "{}"})))
            .await
            .unwrap());
        assert!(!store
            .update_vertex_properties(999, pmap(json!({"json": "{}"})))
            .await
            .unwrap());

        let fetched = store.get_vertex(a).await.unwrap().unwrap();
        assert_eq!(fetched.property_str("json").as_deref(), Some("{}"));

        let linked = store
            .add_edge_by_property(
                "fhir:ref:subject.reference",
                "Observation",
                "id",
                "o1",
                "Patient",
                "id",
                "p1",
                PropertyMap::new(),
            )
            .await
            .unwrap();
        assert!(linked);
        let missing = store
            .add_edge_by_property(
                "fhir:ref:subject.reference",
                "Observation",
                "id",
                "o1",
                "Patient",
                "id",
                "nope",
                PropertyMap::new(),
            )
            .await
            .unwrap();
        assert!(!missing);

        assert_eq!(store.count_vertices().await.unwrap(), 2);
        assert_eq!(store.drop_all().await.unwrap(), 2);
        assert_eq!(store.count_vertices().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn label_scoped_search_filters_and_paginates() {
        let store = MemoryGraphStore::new();
        for i in 0..5 {
            store
                .add_vertex(
                    "Patient",
                    pmap(json!({"id": format!("p{i}"), "isCurrent": true, "isDeleted": false})),
                )
                .await
                .unwrap();
        }
        store
            .add_vertex("Patient", pmap(json!({"id": "gone", "isCurrent": false})))
            .await
            .unwrap();

        let filters = vec![("isCurrent".to_string(), "true".to_string())];
        assert_eq!(store.count_vertices_by_label("Patient", &filters).await.unwrap(), 5);

        let page = store
            .get_vertices_by_label("Patient", &filters, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].property_str(props::ID).as_deref(), Some("p2"));

        let by_id = store
            .get_vertex_by_label_and_property("Patient", props::ID, "p3")
            .await
            .unwrap();
        assert!(by_id.is_some());
    }
}
