use parking_lot::RwLock;

use crate::error::Result;
use crate::model::{
    AccessMapping, CatalogNode, Id, PathSpec, Property, ServiceDefinition, ServiceFilter,
    ServiceHost, ServiceReference,
};
use crate::pool::PoolContext;
use crate::store::traits::{CatalogStore, HostStore, LocationStore, Store};

#[derive(Debug, Default)]
struct MemoryData {
    nodes: Vec<CatalogNode>,
    service_refs: Vec<ServiceReference>,
    services: Vec<ServiceDefinition>,
    access_mappings: Vec<AccessMapping>,
    hosts: Vec<ServiceHost>,
    /// (property group id, row)
    properties: Vec<(i32, Property)>,
    last_change: i64,
}

/// In-memory store used by the test suite and for local development
/// without a database. Ignores the pool context's routing (everything
/// lives in one catalog) but still requires one, so call sites exercise
/// the same acquire/release discipline as the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: CatalogNode) {
        self.data.write().nodes.push(node);
    }

    pub fn add_service(&self, service: ServiceDefinition) {
        let mut data = self.data.write();
        data.last_change += 1;
        data.services.push(service);
    }

    pub fn add_service_ref(&self, service_ref: ServiceReference) {
        self.data.write().service_refs.push(service_ref);
    }

    /// Adds a mapping, keeping the at-most-one-default invariant: a new
    /// default demotes any existing one.
    pub fn add_access_mapping(&self, mapping: AccessMapping) {
        let mut data = self.data.write();
        if mapping.is_default {
            for existing in &mut data.access_mappings {
                existing.is_default = false;
            }
        }
        data.access_mappings.push(mapping);
    }

    pub fn add_host(&self, host: ServiceHost) {
        self.data.write().hosts.push(host);
    }

    pub fn add_property(&self, group_id: i32, property: Property) {
        self.data.write().properties.push((group_id, property));
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn fetch_nodes(
        &self,
        _ctx: &PoolContext<'_>,
        spec: &PathSpec,
    ) -> Result<Vec<CatalogNode>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .iter()
            .filter(|n| spec.matches(&n.full_path(), &n.parent_path))
            .cloned()
            .collect())
    }

    async fn fetch_resources(
        &self,
        _ctx: &PoolContext<'_>,
        ids: &[Id],
        by_type: bool,
    ) -> Result<Vec<CatalogNode>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .iter()
            .filter(|n| {
                if by_type {
                    ids.contains(&n.resource.resource_type.id)
                } else {
                    ids.contains(&n.resource.id)
                }
            })
            .cloned()
            .collect())
    }

    async fn fetch_service_refs(
        &self,
        _ctx: &PoolContext<'_>,
        resource_ids: &[Id],
    ) -> Result<Vec<ServiceReference>> {
        let data = self.data.read();
        Ok(data
            .service_refs
            .iter()
            .filter(|r| resource_ids.contains(&r.resource_id))
            .cloned()
            .collect())
    }

    async fn fetch_properties(
        &self,
        _ctx: &PoolContext<'_>,
        group_ids: &[i32],
    ) -> Result<Vec<Property>> {
        let data = self.data.read();
        Ok(data
            .properties
            .iter()
            .filter(|(group, _)| group_ids.contains(group))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl LocationStore for MemoryStore {
    async fn fetch_services(
        &self,
        _ctx: &PoolContext<'_>,
        filters: &[ServiceFilter],
    ) -> Result<Vec<ServiceDefinition>> {
        let data = self.data.read();
        Ok(data
            .services
            .iter()
            .filter(|s| filters.is_empty() || filters.iter().any(|f| f.matches(s)))
            .cloned()
            .collect())
    }

    async fn fetch_access_mappings(&self, _ctx: &PoolContext<'_>) -> Result<Vec<AccessMapping>> {
        Ok(self.data.read().access_mappings.clone())
    }

    async fn last_change_id(&self, _ctx: &PoolContext<'_>) -> Result<i64> {
        Ok(self.data.read().last_change)
    }
}

#[async_trait::async_trait]
impl HostStore for MemoryStore {
    async fn fetch_hosts(
        &self,
        _ctx: &PoolContext<'_>,
        parent_id: Option<&str>,
    ) -> Result<Vec<ServiceHost>> {
        let data = self.data.read();
        Ok(data
            .hosts
            .iter()
            .filter(|h| match parent_id {
                Some(parent) => h.parent_id.as_deref() == Some(parent),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn fetch_host(
        &self,
        _ctx: &PoolContext<'_>,
        id_or_name: &str,
    ) -> Result<Option<ServiceHost>> {
        let data = self.data.read();
        Ok(data
            .hosts
            .iter()
            .find(|h| h.id == id_or_name || h.name == id_or_name)
            .cloned())
    }
}

impl Store for MemoryStore {}
