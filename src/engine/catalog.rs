//! Catalog query operations: path-spec node resolution, resource lookups
//! and the singleton helpers the bootstrap path depends on.

use itertools::Itertools;
use serde::Serialize;

use crate::error::{RegistryError, Result};
use crate::model::{
    CatalogNode, Id, PathSpec, Property, ServiceHost, ServiceReference, CHILD_SEGMENT_MAXLEN,
    PARENT_PATH_MAXLEN, RESOURCE_ID_MAXLEN,
};
use crate::pool::{ContextPool, PoolContext};
use crate::store::{CatalogStore, HostStore};

/// Longest raw path a caller may submit: a full path plus a depth marker.
const RAW_PATH_MAXLEN: usize = PARENT_PATH_MAXLEN + CHILD_SEGMENT_MAXLEN + 2;

/// Result of a node or resource query: the matched nodes plus the service
/// references and extension properties hanging off their resources. The
/// caller joins references back to nodes by resource id.
#[derive(Debug, Clone, Serialize)]
pub struct NodeQueryResult {
    pub nodes: Vec<CatalogNode>,
    pub service_refs: Vec<ServiceReference>,
    pub properties: Vec<Property>,
}

/// Classifies and runs a set of raw path queries against one acquired
/// context: fetch per spec, union across specs, then the post-union type
/// filter. Empty output is a successful result.
pub(crate) async fn collect_nodes<S: CatalogStore>(
    store: &S,
    ctx: &PoolContext<'_>,
    raw_paths: &[String],
    type_filters: &[Id],
) -> Result<Vec<CatalogNode>> {
    // classification is pure string work, done before touching the store
    let mut specs = Vec::with_capacity(raw_paths.len());
    for raw in raw_paths {
        if raw.len() > RAW_PATH_MAXLEN {
            return Err(RegistryError::ParamTooLong(format!(
                "path spec exceeds {} characters",
                RAW_PATH_MAXLEN
            )));
        }
        specs.push(PathSpec::classify(raw));
    }

    let mut matched = Vec::new();
    for spec in &specs {
        matched.extend(store.fetch_nodes(ctx, spec).await?);
    }

    // a node matching via more than one spec is included once
    let unioned: Vec<CatalogNode> = matched
        .into_iter()
        .unique_by(|n| n.full_path())
        .collect();

    if type_filters.is_empty() {
        return Ok(unioned);
    }

    Ok(unioned
        .into_iter()
        .filter(|n| type_filters.contains(&n.resource.resource_type.id))
        .collect())
}

async fn resolve_details<S: CatalogStore>(
    store: &S,
    ctx: &PoolContext<'_>,
    nodes: Vec<CatalogNode>,
) -> Result<NodeQueryResult> {
    let resource_ids: Vec<Id> = nodes.iter().map(|n| n.resource.id.clone()).collect();
    let group_ids: Vec<i32> = nodes
        .iter()
        .map(|n| n.resource.property_group_id)
        .collect();

    let service_refs = store.fetch_service_refs(ctx, &resource_ids).await?;
    let properties = store.fetch_properties(ctx, &group_ids).await?;

    Ok(NodeQueryResult {
        nodes,
        service_refs,
        properties,
    })
}

/// The `QueryNodes` operation.
pub async fn query_nodes<S: CatalogStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    raw_paths: &[String],
    type_filters: &[Id],
) -> Result<NodeQueryResult> {
    let ctx = pool.acquire(tag).await;
    let nodes = collect_nodes(store, &ctx, raw_paths, type_filters).await?;
    resolve_details(store, &ctx, nodes).await
}

/// The `QueryResources` operation. Resource ids and resource-type ids are
/// mutually exclusive; ids win when both are present, neither is an error.
pub async fn query_resources<S: CatalogStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    resource_ids: &[Id],
    resource_type_ids: &[Id],
) -> Result<NodeQueryResult> {
    let (ids, by_type) = if !resource_ids.is_empty() {
        (resource_ids, false)
    } else if !resource_type_ids.is_empty() {
        (resource_type_ids, true)
    } else {
        return Err(RegistryError::BadParameter(
            "either resource ids or resource type ids must be supplied".to_string(),
        ));
    };

    for id in ids {
        if id.len() > RESOURCE_ID_MAXLEN {
            return Err(RegistryError::ParamTooLong(format!(
                "identifier exceeds {} characters",
                RESOURCE_ID_MAXLEN
            )));
        }
    }

    let ctx = pool.acquire(tag).await;
    let nodes = store.fetch_resources(&ctx, ids, by_type).await?;
    resolve_details(store, &ctx, nodes).await
}

/// Bootstrap helper: the unique node of `type_id` under `root_path`.
/// Unlike the plural queries, zero matches is an error here; the system
/// cannot start without the instance node.
pub async fn query_single_node<S: CatalogStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    root_path: &str,
    type_id: &str,
) -> Result<CatalogNode> {
    let paths = vec![format!("{}**", root_path)];
    let filters = vec![type_id.to_string()];

    let ctx = pool.acquire(tag).await;
    let nodes = collect_nodes(store, &ctx, &paths, &filters).await?;
    drop(ctx);

    nodes.into_iter().next().ok_or_else(|| {
        RegistryError::NotFound(format!(
            "no catalog node of type {} under {}",
            type_id, root_path
        ))
    })
}

/// Resolves one service host by id or name, used to validate a tenant host
/// before serving its traffic. Absence is an error.
pub async fn fetch_single_host<S: HostStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    id_or_name: &str,
) -> Result<ServiceHost> {
    if id_or_name.is_empty() {
        return Err(RegistryError::BadParameter(
            "host id or name must be supplied".to_string(),
        ));
    }

    let ctx = pool.acquire(tag).await;
    let host = store.fetch_host(&ctx, id_or_name).await?;
    drop(ctx);

    host.ok_or_else(|| RegistryError::NotFound(format!("service host {}", id_or_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, ResourceType};
    use crate::store::MemoryStore;

    fn node(parent: &str, child: &str, resource_id: &str, type_id: &str) -> CatalogNode {
        CatalogNode {
            parent_path: parent.to_string(),
            child_segment: child.to_string(),
            resource: Resource {
                id: resource_id.to_string(),
                resource_type: ResourceType {
                    id: type_id.to_string(),
                    display_name: "Type".to_string(),
                    description: None,
                },
                display_name: format!("Resource {}", resource_id),
                description: None,
                property_group_id: 0,
            },
            is_default: false,
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        // a three-level tree: root -> a -> (b, c); b -> d
        store.add_node(node("", "AAAA", "root", "t-root"));
        store.add_node(node("AAAA", "BBBB", "a", "t-folder"));
        store.add_node(node("AAAABBBB", "CCCC", "b", "t-folder"));
        store.add_node(node("AAAABBBB", "DDDD", "c", "t-leaf"));
        store.add_node(node("AAAABBBBCCCC", "EEEE", "d", "t-leaf"));
        store
    }

    fn pool() -> ContextPool {
        let pool = ContextPool::new(1).unwrap();
        pool.allocate("mem", None);
        pool
    }

    fn paths(nodes: &[CatalogNode]) -> Vec<String> {
        let mut out: Vec<String> = nodes.iter().map(|n| n.full_path()).collect();
        out.sort();
        out
    }

    #[tokio::test]
    async fn union_of_overlapping_specs_has_no_duplicates() {
        let store = seeded_store();
        let pool = pool();

        let both = query_nodes(
            &store,
            &pool,
            None,
            &["AAAA**".to_string(), "AAAABBBB*".to_string()],
            &[],
        )
        .await
        .unwrap();

        let subtree = query_nodes(&store, &pool, None, &["AAAA**".to_string()], &[])
            .await
            .unwrap();

        // every AAAABBBB* node is also reachable via AAAA**, so the union
        // equals the subtree query
        assert_eq!(paths(&both.nodes), paths(&subtree.nodes));
        assert_eq!(both.nodes.len(), 5);
    }

    #[tokio::test]
    async fn type_filter_is_applied_after_the_union() {
        let store = seeded_store();
        let pool = pool();

        let unfiltered = query_nodes(&store, &pool, None, &["AAAA**".to_string()], &[])
            .await
            .unwrap();
        let filtered = query_nodes(
            &store,
            &pool,
            None,
            &["AAAA**".to_string()],
            &["t-leaf".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(filtered.nodes.len(), 2);
        for n in &filtered.nodes {
            assert_eq!(n.resource.resource_type.id, "t-leaf");
            assert!(unfiltered
                .nodes
                .iter()
                .any(|u| u.full_path() == n.full_path()));
        }
    }

    #[tokio::test]
    async fn single_level_query_returns_immediate_children_only() {
        let store = seeded_store();
        let pool = pool();

        let result = query_nodes(&store, &pool, None, &["AAAABBBB*".to_string()], &[])
            .await
            .unwrap();
        assert_eq!(
            paths(&result.nodes),
            vec!["AAAABBBBCCCC".to_string(), "AAAABBBBDDDD".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_match_is_success_not_error() {
        let store = seeded_store();
        let pool = pool();

        let result = query_nodes(&store, &pool, None, &["ZZZZ**".to_string()], &[])
            .await
            .unwrap();
        assert!(result.nodes.is_empty());
    }

    #[tokio::test]
    async fn over_long_path_is_rejected() {
        let store = seeded_store();
        let pool = pool();

        let raw = "X".repeat(RAW_PATH_MAXLEN + 1);
        let err = query_nodes(&store, &pool, None, &[raw], &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ParamTooLong");
    }

    #[tokio::test]
    async fn query_resources_requires_a_filter() {
        let store = seeded_store();
        let pool = pool();

        let err = query_resources(&store, &pool, None, &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BadParameter");
    }

    #[tokio::test]
    async fn query_resources_ids_win_over_type_ids() {
        let store = seeded_store();
        let pool = pool();

        let result = query_resources(
            &store,
            &pool,
            None,
            &["a".to_string()],
            &["t-leaf".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].resource.id, "a");
    }

    #[tokio::test]
    async fn missing_singleton_node_is_fatal() {
        let store = MemoryStore::new();
        let pool = pool();

        let err = query_single_node(&store, &pool, None, "AAAA", "t-root")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[tokio::test]
    async fn missing_host_is_fatal() {
        let store = MemoryStore::new();
        let pool = pool();

        let err = fetch_single_host(&store, &pool, None, "nosuch")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }
}
