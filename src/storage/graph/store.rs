//! Native graph [`Store`].
//!
//! Assets are engine nodes keyed by [`IdentityKey::node_key`], relations are
//! edges labelled with the relation type, and an execution is a node of kind
//! `execution` whose provenance is a `logged` edge to each asset it found first.
//!
//! Writes are staged in a [`Batch`] and committed in one engine call. Until
//! the commit, staged nodes carry provisional negative ids.

use super::engine::{
    Batch, CommitOutcome, EdgeCondition, GraphEdge, GraphEngine, GraphNode, NewNode, NodeId,
    NodeRef,
};
use super::memory::MemoryGraphEngine;
use crate::config::{DEFAULT_OPERATION_TIMEOUT, DatabaseConfig};
use crate::identity::{IdentityKey, normalize_fqdn};
use crate::models::{
    Asset, AssetContent, AssetId, AssetType, Execution, ExecutionId, ExecutionLog, InsertInfo,
    NameAddrPair, Record, Relation, RelationType,
};
use crate::services::{self, AssetWriter, Insertion, Lookup};
use crate::storage::metrics::record_operation_metrics;
use crate::storage::traits::Store;
use crate::{Error, OperationContext, Result};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::instrument;

const BACKEND: &str = "graph";

/// Node kind of executions.
pub const EXECUTION_KIND: &str = "execution";

/// Edge predicate linking an execution to the assets it discovered.
pub const LOGGED_PREDICATE: &str = "logged";

/// Property of a `logged` edge naming the data source.
const SOURCE_PROPERTY: &str = "source";

/// Counts of a [`GraphStore::migrate`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Nodes copied that the target did not have.
    pub nodes_created: usize,
    /// Edges copied that the target did not have.
    pub edges_created: usize,
}

/// Asset store over a [`GraphEngine`].
pub struct GraphStore<E = MemoryGraphEngine> {
    engine: E,
    operation_timeout: Duration,
}

impl GraphStore<MemoryGraphEngine> {
    /// Creates a store over a fresh in-memory engine.
    #[must_use]
    pub fn in_memory(config: &DatabaseConfig) -> Self {
        Self::new(MemoryGraphEngine::new()).with_operation_timeout(config.operation_timeout)
    }
}

impl<E: GraphEngine> GraphStore<E> {
    /// Creates a store over `engine`.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Sets the upper bound on one store operation.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// The underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Merges every node, edge and execution of this store into `target`.
    ///
    /// Nodes merge by key, so running it twice copies nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns an error if either engine fails; the target is then unchanged.
    #[instrument(skip(self, target))]
    pub fn migrate<F: GraphEngine>(&self, target: &GraphStore<F>) -> Result<MigrationSummary> {
        let snapshot = self.engine.snapshot()?;

        let mut batch = Batch::new();
        let mut refs: HashMap<NodeId, NodeRef> = HashMap::with_capacity(snapshot.nodes.len());
        for node in snapshot.nodes {
            let node_ref = batch.add_node(NewNode {
                key: node.key,
                kind: node.kind,
                properties: node.properties,
            });
            refs.insert(node.id, node_ref);
        }
        for edge in snapshot.edges {
            if let (Some(&subject), Some(&object)) = (refs.get(&edge.subject), refs.get(&edge.object))
            {
                batch.add_edge_with(
                    subject,
                    edge.predicate,
                    object,
                    EdgeCondition::Always,
                    edge.properties,
                );
            }
        }

        let outcome = target.engine.commit(batch)?;
        let summary = MigrationSummary {
            nodes_created: outcome.nodes_created(),
            edges_created: outcome.edges_created,
        };
        tracing::info!(
            nodes_created = summary.nodes_created,
            edges_created = summary.edges_created,
            "Migrated graph"
        );
        Ok(summary)
    }

    fn timed<T>(
        &self,
        ctx: &OperationContext,
        operation: &'static str,
        f: impl FnOnce(&OperationContext) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let ctx = ctx.child_with_timeout(self.operation_timeout);
        let result = ctx.check(operation).and_then(|()| f(&ctx));
        record_operation_metrics(BACKEND, operation, start, &result);
        result
    }

    /// Stages `f`'s writes and commits them as one batch.
    ///
    /// Returns `f`'s value and the commit outcome for remapping provisional ids.
    fn write<T>(
        &self,
        info: &InsertInfo,
        operation: &'static str,
        f: impl FnOnce(&mut GraphWriter<'_, E>) -> Result<T>,
    ) -> Result<(T, CommitOutcome)> {
        self.timed(&info.context, operation, |ctx| {
            let mut writer = GraphWriter {
                engine: &self.engine,
                context: ctx,
                source: &info.source,
                batch: Batch::new(),
                staged: HashMap::new(),
            };
            let value = f(&mut writer)?;

            ctx.check(operation)?;
            let outcome = self.engine.commit(writer.batch)?;
            Ok((value, outcome))
        })
    }

    fn execution_node(&self, execution: ExecutionId) -> Result<Option<GraphNode>> {
        Ok(self
            .engine
            .node(execution.get())?
            .filter(|n| n.kind == EXECUTION_KIND))
    }

    fn asset_node_by_name(&self, name: &str) -> Result<Option<GraphNode>> {
        self.engine.node_by_key(&IdentityKey::fqdn(name).node_key())
    }

    fn logged_fqdns(&self, execution: ExecutionId) -> Result<Vec<String>> {
        if self.execution_node(execution)?.is_none() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for edge in self.engine.out_edges(execution.get(), Some(LOGGED_PREDICATE))? {
            if let Some(asset) = self.engine.node(edge.object)?.and_then(|n| to_asset(n).ok().flatten())
                && let AssetContent::Fqdn(fqdn) = asset.content
            {
                names.push((asset.id, fqdn.name));
            }
        }
        names.sort();
        Ok(names.into_iter().map(|(_, name)| name).collect())
    }
}

/// Decodes an asset node; `None` for nodes of other kinds.
fn to_asset(node: GraphNode) -> Result<Option<Asset>> {
    let Some(asset_type) = AssetType::parse(&node.kind) else {
        return Ok(None);
    };
    let content = AssetContent::from_json(asset_type, node.properties)
        .map_err(|e| Error::backend("decode_asset", format!("node {}: {e}", node.id)))?;
    Ok(Some(Asset {
        id: AssetId::new(node.id),
        content,
        created_at: node.created_at,
    }))
}

fn edge_source(edge: &GraphEdge) -> Option<&str> {
    edge.properties.get(SOURCE_PROPERTY)?.as_str()
}

/// Maps an id handed out by a [`GraphWriter`] to a node reference.
fn node_ref(id: AssetId) -> NodeRef {
    let raw = id.get();
    if raw < 0
        && let Some(index) = raw.checked_neg().and_then(|n| usize::try_from(n - 1).ok())
    {
        return NodeRef::Staged(index);
    }
    NodeRef::Existing(raw)
}

/// Provisional id of the staged node at `index`.
fn provisional_id(index: usize) -> Result<AssetId> {
    i64::try_from(index)
        .map(|i| AssetId::new(-(i + 1)))
        .map_err(|e| Error::backend("stage_node", e))
}

/// Stages writes against a [`GraphEngine`].
pub struct GraphWriter<'a, E> {
    engine: &'a E,
    context: &'a OperationContext,
    source: &'a str,
    batch: Batch,
    staged: HashMap<String, usize>,
}

impl<E: GraphEngine> AssetWriter for GraphWriter<'_, E> {
    fn context(&self) -> &OperationContext {
        self.context
    }

    fn lookup(&mut self, key: &IdentityKey) -> Result<Lookup> {
        let node_key = key.node_key();
        if let Some(&index) = self.staged.get(&node_key) {
            return provisional_id(index).map(Lookup::Found);
        }
        Ok(self
            .engine
            .node_by_key(&node_key)
            .map_err(|e| e.within(&format!("lookup_asset {key}")))?
            .map_or(Lookup::Absent, |n| Lookup::Found(AssetId::new(n.id))))
    }

    fn insert_if_absent(&mut self, content: &AssetContent) -> Result<Insertion> {
        let key = IdentityKey::of(content).node_key();
        if let Some(&index) = self.staged.get(&key) {
            return provisional_id(index).map(Insertion::Existing);
        }
        let NodeRef::Staged(index) = self.batch.add_node(NewNode {
            key: key.clone(),
            kind: content.asset_type().as_str().to_string(),
            properties: content.to_json(),
        }) else {
            return Err(Error::backend("stage_node", "batch returned a committed reference"));
        };
        self.staged.insert(key, index);
        provisional_id(index).map(Insertion::Inserted)
    }

    fn relate(&mut self, relation: RelationType, from: AssetId, to: AssetId) -> Result<()> {
        self.batch.add_edge(
            node_ref(from),
            relation.as_str(),
            node_ref(to),
            EdgeCondition::Always,
        );
        Ok(())
    }

    fn log_discovery(&mut self, execution: ExecutionId, asset: AssetId) -> Result<()> {
        let known = self
            .engine
            .node(execution.get())?
            .is_some_and(|n| n.kind == EXECUTION_KIND);
        if !known {
            return Err(Error::backend(
                "insert_execution_log",
                format!("execution {execution} does not exist"),
            ));
        }
        self.batch.add_edge_with(
            NodeRef::Existing(execution.get()),
            LOGGED_PREDICATE,
            node_ref(asset),
            EdgeCondition::ObjectCreated,
            serde_json::json!({ "source": self.source }),
        );
        Ok(())
    }
}

impl<E: GraphEngine> Store for GraphStore<E> {
    #[instrument(skip(self, info), fields(source = %info.source, execution_id = %info.execution_id))]
    fn upsert(&self, info: &InsertInfo, asset_type: AssetType, raw: &str) -> Result<AssetId> {
        let (id, outcome) = self.write(info, "upsert", |writer| {
            services::upsert(writer, info.execution_id, asset_type, raw)
        })?;
        outcome
            .resolve(node_ref(id))
            .map(AssetId::new)
            .ok_or_else(|| Error::backend("upsert", format!("staged node {id} was not committed")))
    }

    #[instrument(
        skip(self, info, record),
        fields(source = %info.source, execution_id = %info.execution_id, record = %record)
    )]
    fn insert_record(&self, info: &InsertInfo, record: &Record) -> Result<()> {
        self.write(info, "insert_record", |writer| {
            services::apply_record(writer, info.execution_id, record)
        })
        .map(|((), _)| ())
    }

    #[instrument(skip(self, ctx))]
    fn insert_execution(&self, ctx: &OperationContext, domains: &[String]) -> Result<ExecutionId> {
        self.timed(ctx, "insert_execution", |_| {
            let mut batch = Batch::new();
            let node = batch.add_node(NewNode {
                key: format!("{EXECUTION_KIND}:{}", uuid::Uuid::now_v7()),
                kind: EXECUTION_KIND.to_string(),
                properties: serde_json::json!({ "domains": domains }),
            });
            let outcome = self.engine.commit(batch)?;
            let id = outcome
                .resolve(node)
                .ok_or_else(|| Error::backend("insert_execution", "execution node not committed"))?;
            tracing::info!(execution_id = id, "Started execution");
            Ok(ExecutionId::new(id))
        })
    }

    #[instrument(skip(self, ctx))]
    fn is_cname_node(&self, ctx: &OperationContext, name: &str) -> Result<bool> {
        let Ok(fqdn) = normalize_fqdn(name) else {
            return Ok(false);
        };
        self.timed(ctx, "is_cname_node", |_| {
            let Some(node) = self.asset_node_by_name(&fqdn.name)? else {
                return Ok(false);
            };
            Ok(!self
                .engine
                .out_edges(node.id, Some(RelationType::CnameRecord.as_str()))?
                .is_empty())
        })
    }

    #[instrument(skip(self, ctx))]
    fn event_fqdns(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<Vec<String>> {
        self.timed(ctx, "event_fqdns", |_| self.logged_fqdns(execution))
    }

    #[instrument(skip(self, ctx, names), fields(names = names.len()))]
    fn names_to_addrs(
        &self,
        ctx: &OperationContext,
        execution: ExecutionId,
        names: &[String],
    ) -> Result<Vec<NameAddrPair>> {
        self.timed(ctx, "names_to_addrs", |ctx| {
            let names: Vec<String> = if names.is_empty() {
                self.logged_fqdns(execution)?
            } else {
                names
                    .iter()
                    .filter_map(|n| normalize_fqdn(n).ok().map(|f| f.name))
                    .collect()
            };

            let mut pairs = BTreeSet::new();
            for name in names {
                ctx.check("names_to_addrs")?;
                let Some(node) = self.asset_node_by_name(&name)? else {
                    continue;
                };
                for relation in RelationType::address_records() {
                    for edge in self.engine.out_edges(node.id, Some(relation.as_str()))? {
                        if let Some(Asset {
                            content: AssetContent::Ip(ip),
                            ..
                        }) = self.engine.node(edge.object)?.map(to_asset).transpose()?.flatten()
                        {
                            pairs.insert(NameAddrPair::new(name.clone(), ip.address.to_string()));
                        }
                    }
                }
            }
            Ok(pairs.into_iter().collect())
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn asset(&self, ctx: &OperationContext, id: AssetId) -> Result<Option<Asset>> {
        self.timed(ctx, "get_asset", |_| {
            Ok(self.engine.node(id.get())?.map(to_asset).transpose()?.flatten())
        })
    }

    #[instrument(skip(self, ctx))]
    fn assets_by_type(&self, ctx: &OperationContext, asset_type: AssetType) -> Result<Vec<Asset>> {
        self.timed(ctx, "assets_by_type", |_| {
            self.engine
                .nodes_of_kind(asset_type.as_str())?
                .into_iter()
                .filter_map(|n| to_asset(n).transpose())
                .collect()
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn relations_from(&self, ctx: &OperationContext, id: AssetId) -> Result<Vec<Relation>> {
        self.timed(ctx, "relations_from", |_| {
            Ok(self
                .engine
                .out_edges(id.get(), None)?
                .into_iter()
                .filter_map(|edge| {
                    RelationType::parse(&edge.predicate).map(|relation_type| Relation {
                        id: edge.id,
                        relation_type,
                        from_asset_id: AssetId::new(edge.subject),
                        to_asset_id: AssetId::new(edge.object),
                        created_at: edge.created_at,
                    })
                })
                .collect())
        })
    }

    #[instrument(skip(self, ctx), fields(execution_id = %id))]
    fn execution(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Option<Execution>> {
        self.timed(ctx, "get_execution", |_| {
            let Some(node) = self.execution_node(id)? else {
                return Ok(None);
            };
            let domains = node
                .properties
                .get("domains")
                .cloned()
                .map(serde_json::from_value::<Vec<String>>)
                .transpose()
                .map_err(|e| Error::backend("get_execution", format!("node {}: {e}", node.id)))?
                .unwrap_or_default();
            Ok(Some(Execution {
                id,
                domains,
                created_at: node.created_at,
            }))
        })
    }

    #[instrument(skip(self, ctx), fields(execution_id = %id))]
    fn execution_logs(&self, ctx: &OperationContext, id: ExecutionId) -> Result<Vec<ExecutionLog>> {
        self.timed(ctx, "execution_logs", |_| {
            if self.execution_node(id)?.is_none() {
                return Ok(Vec::new());
            }
            Ok(self
                .engine
                .out_edges(id.get(), Some(LOGGED_PREDICATE))?
                .into_iter()
                .map(|edge| ExecutionLog {
                    id: edge.id,
                    execution_id: id,
                    asset_id: AssetId::new(edge.object),
                    source: edge_source(&edge).unwrap_or_default().to_string(),
                    created_at: edge.created_at,
                })
                .collect())
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %asset, execution_id = %execution))]
    fn node_sources(
        &self,
        ctx: &OperationContext,
        asset: AssetId,
        execution: ExecutionId,
    ) -> Result<Vec<String>> {
        self.timed(ctx, "node_sources", |_| {
            if self.execution_node(execution)?.is_none() {
                return Ok(Vec::new());
            }
            let sources: BTreeSet<String> = self
                .engine
                .in_edges(asset.get(), Some(LOGGED_PREDICATE))?
                .iter()
                .filter(|edge| edge.subject == execution.get())
                .filter_map(edge_source)
                .filter(|source| !source.is_empty())
                .map(str::to_string)
                .collect();
            Ok(sources.into_iter().collect())
        })
    }

    #[instrument(skip(self, ctx))]
    fn delete_execution(&self, ctx: &OperationContext, execution: ExecutionId) -> Result<bool> {
        self.timed(ctx, "delete_execution", |_| {
            if self.execution_node(execution)?.is_none() {
                return Ok(false);
            }
            self.engine.remove_node(execution.get())
        })
    }

    #[instrument(skip(self, ctx), fields(asset_id = %id))]
    fn delete_asset(&self, ctx: &OperationContext, id: AssetId) -> Result<bool> {
        self.timed(ctx, "delete_asset", |_| {
            let is_asset = self
                .engine
                .node(id.get())?
                .is_some_and(|n| AssetType::parse(&n.kind).is_some());
            if !is_asset {
                return Ok(false);
            }
            self.engine.remove_node(id.get())
        })
    }
}
