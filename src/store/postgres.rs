use std::collections::HashMap;

use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{RegistryError, Result};
use crate::model::{
    AccessMapping, CatalogNode, Depth, Id, PathSpec, Property, RelativeTo, Resource, ResourceType,
    ServiceDefinition, ServiceFilter, ServiceHost, ServiceReference,
};
use crate::pool::PoolContext;
use crate::store::traits::{CatalogStore, HostStore, LocationStore, Store};

/// PostgreSQL-backed store. Connections are keyed by the connection string
/// of the acquired pool context, so one store instance serves the global
/// instance database and every attached tenant database.
#[derive(Debug, Default)]
pub struct PostgresStore {
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves (lazily creating) the sqlx pool for the context's database.
    async fn pool_for(&self, ctx: &PoolContext<'_>) -> Result<PgPool> {
        if let Some(pool) = self.pools.lock().get(ctx.connection()) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(ctx.connection())
            .await
            .map_err(|e| {
                RegistryError::StoreFailure(format!(
                    "failed to connect to {}: {}",
                    ctx.connection(),
                    e
                ))
            })?;

        self.pools
            .lock()
            .insert(ctx.connection().to_string(), pool.clone());
        Ok(pool)
    }
}

fn relative_to_from_i32(value: i32) -> RelativeTo {
    match value {
        1 => RelativeTo::WebApplication,
        2 => RelativeTo::FullyQualified,
        _ => RelativeTo::Context,
    }
}

fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<CatalogNode> {
    let resource = Resource {
        id: row.get("resource_id"),
        resource_type: ResourceType {
            id: row.get("type_id"),
            display_name: row.get("type_name"),
            description: row.get("type_description"),
        },
        display_name: row.get("resource_name"),
        description: row.get("resource_description"),
        property_group_id: row.get("property_group_id"),
    };

    CatalogNode::new(
        row.get("parent_path"),
        row.get("child_segment"),
        resource,
        row.get("is_default"),
    )
}

fn service_from_row(row: &sqlx::postgres::PgRow) -> ServiceDefinition {
    ServiceDefinition {
        id: row.get("service_id"),
        service_type: row.get("service_type"),
        display_name: row.get("service_name"),
        relative_to: relative_to_from_i32(row.get("relative_to")),
        relative_path: row.get("relative_path"),
        singleton: row.get("singleton"),
        description: row.get("service_description"),
        tool_type: row.get("tool_type"),
    }
}

const NODE_COLUMNS: &str = "n.parent_path, n.child_segment, n.is_default, \
     r.id AS resource_id, r.display_name AS resource_name, \
     r.description AS resource_description, r.property_group_id, \
     t.id AS type_id, t.display_name AS type_name, t.description AS type_description";

const SERVICE_COLUMNS: &str = "sd.id AS service_id, sd.service_type, \
     sd.display_name AS service_name, sd.relative_to, sd.relative_path, \
     sd.singleton, sd.description AS service_description, sd.tool_type";

/// Paths are compared with plain string operations, never LIKE, so `%`,
/// `_` and `\` in a caller path match only themselves (base64url child
/// segments legitimately contain `_`).
fn depth_predicate(depth: Depth) -> &'static str {
    match depth {
        Depth::None => "n.parent_path || n.child_segment = $1",
        Depth::Single => "n.parent_path = $1",
        Depth::Full => "left(n.parent_path || n.child_segment, length($1)) = $1",
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresStore {
    async fn fetch_nodes(
        &self,
        ctx: &PoolContext<'_>,
        spec: &PathSpec,
    ) -> Result<Vec<CatalogNode>> {
        let pool = self.pool_for(ctx).await?;

        let predicate = depth_predicate(spec.depth);
        let sql = format!(
            "SELECT {NODE_COLUMNS} \
             FROM catalog_nodes n \
             JOIN catalog_resources r ON r.id = n.resource_id \
             JOIN catalog_resource_types t ON t.id = r.type_id \
             WHERE {predicate}"
        );

        let rows = sqlx::query(&sql).bind(&spec.path).fetch_all(&pool).await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn fetch_resources(
        &self,
        ctx: &PoolContext<'_>,
        ids: &[Id],
        by_type: bool,
    ) -> Result<Vec<CatalogNode>> {
        let pool = self.pool_for(ctx).await?;

        let predicate = if by_type {
            "t.id = ANY($1)"
        } else {
            "r.id = ANY($1)"
        };
        let sql = format!(
            "SELECT {NODE_COLUMNS} \
             FROM catalog_nodes n \
             JOIN catalog_resources r ON r.id = n.resource_id \
             JOIN catalog_resource_types t ON t.id = r.type_id \
             WHERE {predicate}"
        );

        let rows = sqlx::query(&sql)
            .bind(ids.to_vec())
            .fetch_all(&pool)
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn fetch_service_refs(
        &self,
        ctx: &PoolContext<'_>,
        resource_ids: &[Id],
    ) -> Result<Vec<ServiceReference>> {
        let pool = self.pool_for(ctx).await?;

        let sql = format!(
            "SELECT sr.resource_id AS ref_resource_id, sr.association_key, {SERVICE_COLUMNS} \
             FROM catalog_service_references sr \
             JOIN service_definitions sd ON sd.id = sr.service_id \
             WHERE sr.resource_id = ANY($1)"
        );

        let rows = sqlx::query(&sql)
            .bind(resource_ids.to_vec())
            .fetch_all(&pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ServiceReference {
                resource_id: row.get("ref_resource_id"),
                association_key: row.get("association_key"),
                service: service_from_row(row),
            })
            .collect())
    }

    async fn fetch_properties(
        &self,
        ctx: &PoolContext<'_>,
        group_ids: &[i32],
    ) -> Result<Vec<Property>> {
        let pool = self.pool_for(ctx).await?;

        let rows = sqlx::query(
            "SELECT artifact_id, version, property_id, name, kind_id, value \
             FROM properties WHERE artifact_id = ANY($1)",
        )
        .bind(group_ids.to_vec())
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Property {
                artifact_id: row.get("artifact_id"),
                version: row.get("version"),
                property_id: row.get("property_id"),
                name: row.get("name"),
                kind_id: row.get("kind_id"),
                value: row.get("value"),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl LocationStore for PostgresStore {
    async fn fetch_services(
        &self,
        ctx: &PoolContext<'_>,
        filters: &[ServiceFilter],
    ) -> Result<Vec<ServiceDefinition>> {
        let pool = self.pool_for(ctx).await?;

        let sql = format!("SELECT {SERVICE_COLUMNS} FROM service_definitions sd");
        let rows = sqlx::query(&sql).fetch_all(&pool).await?;

        // filter in process; service catalogs are small and the filter
        // grammar (wildcard types, optional ids) stays in one place
        Ok(rows
            .iter()
            .map(service_from_row)
            .filter(|s| filters.is_empty() || filters.iter().any(|f| f.matches(s)))
            .collect())
    }

    async fn fetch_access_mappings(&self, ctx: &PoolContext<'_>) -> Result<Vec<AccessMapping>> {
        let pool = self.pool_for(ctx).await?;

        let rows = sqlx::query(
            "SELECT moniker, display_name, access_point_uri, is_default FROM access_mappings",
        )
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AccessMapping {
                moniker: row.get("moniker"),
                display_name: row.get("display_name"),
                access_point_uri: row.get("access_point_uri"),
                is_default: row.get("is_default"),
            })
            .collect())
    }

    async fn last_change_id(&self, ctx: &PoolContext<'_>) -> Result<i64> {
        let pool = self.pool_for(ctx).await?;

        let row = sqlx::query("SELECT COALESCE(MAX(change_id), 0) AS change_id FROM service_definitions")
            .fetch_one(&pool)
            .await?;
        Ok(row.get("change_id"))
    }
}

#[async_trait::async_trait]
impl HostStore for PostgresStore {
    async fn fetch_hosts(
        &self,
        ctx: &PoolContext<'_>,
        parent_id: Option<&str>,
    ) -> Result<Vec<ServiceHost>> {
        let pool = self.pool_for(ctx).await?;

        let rows = match parent_id {
            Some(parent) => {
                sqlx::query(
                    "SELECT id, parent_id, name, description, virtual_directory, \
                     resource_directory, connection_string, status, reason, features, resource_id \
                     FROM service_hosts WHERE parent_id = $1",
                )
                .bind(parent)
                .fetch_all(&pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, parent_id, name, description, virtual_directory, \
                     resource_directory, connection_string, status, reason, features, resource_id \
                     FROM service_hosts",
                )
                .fetch_all(&pool)
                .await?
            }
        };

        Ok(rows.iter().map(host_from_row).collect())
    }

    async fn fetch_host(
        &self,
        ctx: &PoolContext<'_>,
        id_or_name: &str,
    ) -> Result<Option<ServiceHost>> {
        let pool = self.pool_for(ctx).await?;

        let row = sqlx::query(
            "SELECT id, parent_id, name, description, virtual_directory, resource_directory, \
             connection_string, status, reason, features, resource_id \
             FROM service_hosts WHERE id = $1 OR name = $1",
        )
        .bind(id_or_name)
        .fetch_optional(&pool)
        .await?;

        Ok(row.as_ref().map(host_from_row))
    }
}

fn host_from_row(row: &sqlx::postgres::PgRow) -> ServiceHost {
    ServiceHost {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        description: row.get("description"),
        virtual_directory: row.get("virtual_directory"),
        resource_directory: row.get("resource_directory"),
        connection_string: row.get("connection_string"),
        status: row.get("status"),
        reason: row.get("reason"),
        features: row.get("features"),
        resource_id: row.get("resource_id"),
    }
}

impl Store for PostgresStore {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match_avoids_like_metacharacters() {
        assert_eq!(
            depth_predicate(Depth::Full),
            "left(n.parent_path || n.child_segment, length($1)) = $1"
        );
        for depth in [Depth::None, Depth::Single, Depth::Full] {
            assert!(!depth_predicate(depth).contains("LIKE"));
        }
    }
}
