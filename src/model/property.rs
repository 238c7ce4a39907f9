use serde::{Deserialize, Serialize};

/// Well-known property id carrying a host's instance identifier on its
/// catalog node.
pub const PROPERTY_INSTANCE_ID: i32 = 10;
pub const PROPERTY_INSTANCE_ID_NAME: &str = "InstanceId";

pub const PROPERTY_NAME_MAXLEN: usize = 400;

/// Generic key/value extension row attached to a resource's property group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub artifact_id: i32,
    pub version: i32,
    pub property_id: i32,
    pub name: String,
    pub kind_id: i32,
    pub value: String,
}

impl Property {
    /// Picks the value of a named property out of a fetched set.
    pub fn find_value<'a>(props: &'a [Property], name: &str) -> Option<&'a str> {
        props
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}
