use serde::{Deserialize, Serialize};

use crate::model::Id;

pub const HOST_CONN_STR_MAXLEN: usize = 520;
pub const HOST_NAME_MAXLEN: usize = 128;

/// One deployed, independently-routable tenant or top-level instance. The
/// `connection_string` is the key used to allocate a pool context for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHost {
    pub id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub virtual_directory: String,
    pub resource_directory: String,
    pub connection_string: String,
    pub status: i32,
    pub reason: String,
    pub features: i32,
    /// Back-reference to the host's catalog resource.
    pub resource_id: Id,
}
