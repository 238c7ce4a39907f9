use crate::error::Result;
use crate::model::{
    AccessMapping, CatalogNode, Id, PathSpec, Property, ServiceDefinition, ServiceFilter,
    ServiceHost, ServiceReference,
};
use crate::pool::PoolContext;

/// Catalog-side query primitives. Every call routes through an acquired
/// pool context so it hits the store the context's tag points at. A failed
/// call aborts the whole engine operation; these never return partial data.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// All nodes whose full path satisfies one classified path spec.
    async fn fetch_nodes(
        &self,
        ctx: &PoolContext<'_>,
        spec: &PathSpec,
    ) -> Result<Vec<CatalogNode>>;

    /// Nodes filtered by resource id, or by resource-type id when `by_type`.
    async fn fetch_resources(
        &self,
        ctx: &PoolContext<'_>,
        ids: &[Id],
        by_type: bool,
    ) -> Result<Vec<CatalogNode>>;

    /// Every service reference bound to one of the given resources.
    async fn fetch_service_refs(
        &self,
        ctx: &PoolContext<'_>,
        resource_ids: &[Id],
    ) -> Result<Vec<ServiceReference>>;

    /// Key/value extension rows for the given property groups.
    async fn fetch_properties(
        &self,
        ctx: &PoolContext<'_>,
        group_ids: &[i32],
    ) -> Result<Vec<Property>>;
}

/// Location-side query primitives.
#[async_trait::async_trait]
pub trait LocationStore: Send + Sync {
    /// Service definitions matching any of the filters (all when empty).
    async fn fetch_services(
        &self,
        ctx: &PoolContext<'_>,
        filters: &[ServiceFilter],
    ) -> Result<Vec<ServiceDefinition>>;

    async fn fetch_access_mappings(&self, ctx: &PoolContext<'_>) -> Result<Vec<AccessMapping>>;

    /// Highest change id over the service registry, used for client cache
    /// freshness checks.
    async fn last_change_id(&self, ctx: &PoolContext<'_>) -> Result<i64>;
}

/// Service host lookups.
#[async_trait::async_trait]
pub trait HostStore: Send + Sync {
    /// Hosts parented by the given instance (all hosts when `None`).
    async fn fetch_hosts(
        &self,
        ctx: &PoolContext<'_>,
        parent_id: Option<&str>,
    ) -> Result<Vec<ServiceHost>>;

    /// One host by id or name; absence is `None`, not an error, so callers
    /// decide whether a missing host is fatal.
    async fn fetch_host(
        &self,
        ctx: &PoolContext<'_>,
        id_or_name: &str,
    ) -> Result<Option<ServiceHost>>;
}

pub trait Store: CatalogStore + LocationStore + HostStore + Send + Sync {}
