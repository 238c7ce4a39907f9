//! The `Connect` and `QueryServices` operations.

use serde::{Deserialize, Serialize};

use crate::engine::bootstrap::discover_instance;
use crate::error::{RegistryError, Result};
use crate::model::{
    find_default_moniker, AccessMapping, ServiceDefinition, ServiceFilter, SERVICE_TYPE_MAXLEN,
};
use crate::pool::{ContextPool, PoolContext};
use crate::store::{CatalogStore, LocationStore};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    /// Include the full service catalog in the reply.
    pub include_services: bool,
    /// The change id of the caller's cached catalog, 0 for none.
    pub last_change_id: i64,
    /// Restricts the returned services when `include_services` is set.
    pub service_filters: Vec<ServiceFilter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationServiceData {
    pub default_access_mapping_moniker: Option<String>,
    pub last_change_id: i64,
    /// True when the caller's cached catalog is still current; `services`
    /// is omitted in that case regardless of `include_services`.
    pub client_cache_fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceDefinition>>,
    pub access_mappings: Vec<AccessMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub authenticated_identity: String,
    pub instance_id: String,
    pub catalog_resource_id: String,
    pub location_data: LocationServiceData,
}

fn validate_filters(filters: &[ServiceFilter]) -> Result<()> {
    for filter in filters {
        if filter.service_type.is_empty() {
            return Err(RegistryError::BadParameter(
                "service filter type must not be empty".to_string(),
            ));
        }
        if filter.service_type.len() > SERVICE_TYPE_MAXLEN {
            return Err(RegistryError::ParamTooLong(format!(
                "service type exceeds {} characters",
                SERVICE_TYPE_MAXLEN
            )));
        }
    }
    Ok(())
}

async fn location_data<S: LocationStore>(
    store: &S,
    ctx: &PoolContext<'_>,
    options: &ConnectOptions,
) -> Result<LocationServiceData> {
    let last_change_id = store.last_change_id(ctx).await?;
    let client_cache_fresh = options.last_change_id > 0 && options.last_change_id == last_change_id;

    let services = if options.include_services && !client_cache_fresh {
        Some(store.fetch_services(ctx, &options.service_filters).await?)
    } else {
        None
    };

    let access_mappings = store.fetch_access_mappings(ctx).await?;
    let default_access_mapping_moniker = find_default_moniker(&access_mappings);

    Ok(LocationServiceData {
        default_access_mapping_moniker,
        last_change_id,
        client_cache_fresh,
        services,
        access_mappings,
    })
}

/// The `Connect` operation: the authenticated entry point that hands the
/// caller its instance identity and the location catalog in one round trip.
pub async fn connect<S: CatalogStore + LocationStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    identity: &str,
    options: &ConnectOptions,
) -> Result<ConnectResult> {
    if identity.is_empty() {
        return Err(RegistryError::AccessDenied(
            "connect requires an authenticated identity".to_string(),
        ));
    }
    validate_filters(&options.service_filters)?;

    let ctx = pool.acquire(tag).await;
    let instance = discover_instance(store, &ctx).await?;
    let location_data = location_data(store, &ctx, options).await?;

    Ok(ConnectResult {
        authenticated_identity: identity.to_string(),
        instance_id: instance.instance_id,
        catalog_resource_id: instance.node.resource.id.clone(),
        location_data,
    })
}

/// The `QueryServices` operation: the service catalog without the
/// connection handshake. An empty filter list means everything.
pub async fn query_services<S: LocationStore>(
    store: &S,
    pool: &ContextPool,
    tag: Option<&str>,
    filters: &[ServiceFilter],
) -> Result<Vec<ServiceDefinition>> {
    validate_filters(filters)?;

    let ctx = pool.acquire(tag).await;
    store.fetch_services(&ctx, filters).await
}
