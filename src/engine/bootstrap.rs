//! Startup discovery: locate the server instance node, promote its id to
//! the pool's default tag and register per-tenant connection contexts.

use log::{info, warn};

use crate::error::{RegistryError, Result};
use crate::model::{
    CatalogNode, Property, ServiceHost, ORGANIZATION_ROOT, PROPERTY_INSTANCE_ID_NAME,
    RESOURCE_TYPE_SERVER_INSTANCE,
};
use crate::pool::{ContextPool, PoolContext};
use crate::store::{CatalogStore, HostStore};

use super::catalog::collect_nodes;

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub node: CatalogNode,
    pub instance_id: String,
}

/// Finds the unique server-instance node under the organizational root and
/// reads its instance id from the attached property group. Falls back to
/// the resource id when the property is absent.
pub async fn discover_instance<S: CatalogStore>(
    store: &S,
    ctx: &PoolContext<'_>,
) -> Result<InstanceInfo> {
    let paths = vec![format!("{}**", ORGANIZATION_ROOT)];
    let filters = vec![RESOURCE_TYPE_SERVER_INSTANCE.to_string()];

    let nodes = collect_nodes(store, ctx, &paths, &filters).await?;
    let node = nodes.into_iter().next().ok_or_else(|| {
        RegistryError::NotFound("no server instance node in the catalog".to_string())
    })?;

    let properties = store
        .fetch_properties(ctx, &[node.resource.property_group_id])
        .await?;
    let instance_id = Property::find_value(&properties, PROPERTY_INSTANCE_ID_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| node.resource.id.clone());

    Ok(InstanceInfo { node, instance_id })
}

/// Registers one tagged pool slot per tenant host parented to the instance.
/// A slot that cannot be added is logged and skipped; the server still comes
/// up with the tenants that fit.
pub fn attach_collection_hosts(pool: &ContextPool, hosts: &[ServiceHost]) {
    for host in hosts {
        if host.connection_string.is_empty() {
            warn!("host {} has no connection string, skipping", host.name);
            continue;
        }
        if pool.allocate(&host.connection_string, Some(&host.id)) {
            info!("attached host {} ({})", host.name, host.id);
        } else {
            warn!("pool exhausted, host {} not attached", host.name);
        }
    }
}

/// Runs the full startup sequence against a pool whose slots are still
/// untagged. Failure here is fatal to the caller; the service cannot
/// answer `Connect` without an instance identity.
pub async fn bootstrap<S: CatalogStore + HostStore>(
    store: &S,
    pool: &ContextPool,
) -> Result<InstanceInfo> {
    let instance = {
        let ctx = pool.acquire(None).await;
        discover_instance(store, &ctx).await?
    };
    info!("serving instance {}", instance.instance_id);

    if !pool.retag_default(&instance.instance_id) {
        return Err(RegistryError::Internal(
            "could not promote the instance id to the default pool tag".to_string(),
        ));
    }

    let hosts = {
        let ctx = pool.acquire(Some(&instance.instance_id)).await;
        store.fetch_hosts(&ctx, Some(&instance.instance_id)).await?
    };
    attach_collection_hosts(pool, &hosts);

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, ResourceType};
    use crate::store::MemoryStore;

    fn instance_node() -> CatalogNode {
        CatalogNode {
            parent_path: ORGANIZATION_ROOT.to_string(),
            child_segment: "InstanceChildSegment0001".to_string(),
            resource: Resource {
                id: "res-instance".to_string(),
                resource_type: ResourceType {
                    id: RESOURCE_TYPE_SERVER_INSTANCE.to_string(),
                    display_name: "Server Instance".to_string(),
                    description: None,
                },
                display_name: "Server".to_string(),
                description: None,
                property_group_id: 3,
            },
            is_default: false,
        }
    }

    fn host(id: &str, parent: &str, conn: &str) -> ServiceHost {
        ServiceHost {
            id: id.to_string(),
            parent_id: Some(parent.to_string()),
            name: format!("host-{}", id),
            description: None,
            virtual_directory: String::new(),
            resource_directory: String::new(),
            connection_string: conn.to_string(),
            status: 1,
            reason: String::new(),
            features: 0,
            resource_id: String::new(),
        }
    }

    #[tokio::test]
    async fn bootstrap_promotes_the_instance_id_and_attaches_hosts() {
        let store = MemoryStore::new();
        store.add_node(instance_node());
        store.add_property(
            3,
            Property {
                artifact_id: 3,
                version: 1,
                property_id: crate::model::PROPERTY_INSTANCE_ID,
                name: PROPERTY_INSTANCE_ID_NAME.to_string(),
                kind_id: 0,
                value: "the-instance".to_string(),
            },
        );
        store.add_host(host("col-a", "the-instance", "postgres://col-a"));
        store.add_host(host("col-b", "the-instance", "postgres://col-b"));

        let pool = ContextPool::new(4).unwrap();
        pool.allocate("postgres://config", None);

        let instance = bootstrap(&store, &pool).await.unwrap();
        assert_eq!(instance.instance_id, "the-instance");
        assert_eq!(pool.allocated(), 3);

        // the configuration slot now answers to the instance tag
        let ctx = pool.acquire(Some("the-instance")).await;
        assert_eq!(ctx.connection(), "postgres://config");
        drop(ctx);

        let ctx = pool.acquire(Some("col-b")).await;
        assert_eq!(ctx.connection(), "postgres://col-b");
    }

    #[tokio::test]
    async fn instance_id_falls_back_to_the_resource_id() {
        let store = MemoryStore::new();
        store.add_node(instance_node());

        let pool = ContextPool::new(1).unwrap();
        pool.allocate("postgres://config", None);

        let instance = bootstrap(&store, &pool).await.unwrap();
        assert_eq!(instance.instance_id, "res-instance");
    }

    #[tokio::test]
    async fn bootstrap_fails_on_an_empty_catalog() {
        let store = MemoryStore::new();
        let pool = ContextPool::new(1).unwrap();
        pool.allocate("postgres://config", None);

        let err = bootstrap(&store, &pool).await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }
}
