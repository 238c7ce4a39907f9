use serde::{Deserialize, Serialize};

use crate::model::Id;

pub const SERVICE_TYPE_LOCATION: &str = "LocationService";
pub const SERVICE_TYPE_CATALOG: &str = "CatalogService";
pub const SERVICE_TYPE_REGISTRATION: &str = "RegistrationService";
pub const SERVICE_TYPE_STATUS: &str = "StatusService";

/// Wildcard accepted by service filters in place of a concrete type.
pub const SERVICE_FILTER_ANY_TYPE: &str = "*";

pub const MONIKER_MAXLEN: usize = 128;
pub const SERVICE_REL_PATH_MAXLEN: usize = 256;
pub const SERVICE_TYPE_MAXLEN: usize = 256;

/// How a service's relative path is resolved into a reachable URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelativeTo {
    Context,
    WebApplication,
    FullyQualified,
}

/// One reachable network endpoint kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: Id,
    pub service_type: String,
    pub display_name: String,
    pub relative_to: RelativeTo,
    pub relative_path: String,
    pub singleton: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tool_type: String,
}

/// Binding between a resource and a service definition, labelled with the
/// role the service plays for that resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReference {
    pub resource_id: Id,
    pub association_key: String,
    pub service: ServiceDefinition,
}

/// Caller-supplied filter for service queries. A `*` type matches all
/// types; an absent identifier matches every service of the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Id>,
}

impl ServiceFilter {
    pub fn matches(&self, service: &ServiceDefinition) -> bool {
        let type_ok = self.service_type == SERVICE_FILTER_ANY_TYPE
            || self.service_type == service.service_type;
        let id_ok = match &self.identifier {
            Some(id) => *id == service.id,
            None => true,
        };
        type_ok && id_ok
    }
}

/// Routable access point for a deployment. Exactly one mapping per catalog
/// may be the default; writes enforce that, reads trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessMapping {
    pub moniker: String,
    pub display_name: String,
    pub access_point_uri: String,
    pub is_default: bool,
}

/// Moniker of the default access mapping, if any mapping is flagged.
pub fn find_default_moniker(mappings: &[AccessMapping]) -> Option<String> {
    mappings
        .iter()
        .find(|m| m.is_default)
        .map(|m| m.moniker.clone())
}
