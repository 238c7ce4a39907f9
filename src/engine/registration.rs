//! The `GetRegistrationEntries` operation.
//!
//! Registration entries are the legacy discovery surface kept for older
//! clients. They are synthesized from the instance identity rather than
//! stored, so the operation is a pure function of its inputs.

use serde::Serialize;

use crate::error::{RegistryError, Result};
use crate::model::{SERVICE_TYPE_LOCATION, SERVICE_TYPE_REGISTRATION, SERVICE_TYPE_STATUS};

const TOOL_FRAMEWORK: &str = "Framework";
const TOOL_VSTFS: &str = "vstfs";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInterface {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDatabase {
    pub name: String,
    pub database_name: String,
    pub sql_server_name: String,
    pub excluded_from_backup: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationExtendedAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEntry {
    pub tool_type: String,
    pub service_interfaces: Vec<ServiceInterface>,
    pub databases: Vec<RegistrationDatabase>,
    pub registration_extended_attributes: Vec<RegistrationExtendedAttribute>,
}

fn interface(name: &str, path: &str) -> ServiceInterface {
    ServiceInterface {
        name: name.to_string(),
        url: path.to_string(),
    }
}

fn common_attributes(instance_id: &str, machine_name: &str) -> Vec<RegistrationExtendedAttribute> {
    vec![
        RegistrationExtendedAttribute {
            name: "InstalledUICulture".to_string(),
            value: "1033".to_string(),
        },
        RegistrationExtendedAttribute {
            name: "InstanceId".to_string(),
            value: instance_id.to_string(),
        },
        RegistrationExtendedAttribute {
            name: "ATMachineName".to_string(),
            value: machine_name.to_string(),
        },
    ]
}

fn vstfs_entry(instance_id: &str, machine_name: &str) -> RegistrationEntry {
    RegistrationEntry {
        tool_type: TOOL_VSTFS.to_string(),
        service_interfaces: vec![
            interface(SERVICE_TYPE_REGISTRATION, "/Services/v1.0/Registration.asmx"),
            interface(SERVICE_TYPE_STATUS, "/Services/v1.0/ServerStatus.asmx"),
            interface("Eventing", "/Services/v1.0/Eventing.asmx"),
        ],
        databases: Vec::new(),
        registration_extended_attributes: common_attributes(instance_id, machine_name),
    }
}

fn framework_entry(instance_id: &str, machine_name: &str) -> RegistrationEntry {
    RegistrationEntry {
        tool_type: TOOL_FRAMEWORK.to_string(),
        service_interfaces: vec![interface(
            SERVICE_TYPE_LOCATION,
            "/Services/v3.0/LocationService.asmx",
        )],
        databases: Vec::new(),
        registration_extended_attributes: common_attributes(instance_id, machine_name),
    }
}

/// Returns the registration entries for `tool_id`, or all known entries
/// when the filter is empty. Tool ids match case-insensitively; an unknown
/// tool id yields an empty list, not an error.
pub fn registration_entries(
    tool_id: &str,
    instance_id: &str,
    machine_name: &str,
) -> Result<Vec<RegistrationEntry>> {
    if instance_id.is_empty() {
        return Err(RegistryError::BadParameter(
            "instance id must not be empty".to_string(),
        ));
    }

    let all = [
        vstfs_entry(instance_id, machine_name),
        framework_entry(instance_id, machine_name),
    ];

    Ok(all
        .into_iter()
        .filter(|e| tool_id.is_empty() || e.tool_type.eq_ignore_ascii_case(tool_id))
        .collect())
}
