//! Local device identity

use uuid::Uuid;

use crate::specifics::DeviceType;

const MACHINE_TAG_PREFIX: &str = "session_sync";

pub trait DeviceInfoProvider: Send + Sync {
    /// Stable id of this sync client, the basis of the machine tag
    fn cache_guid(&self) -> String;

    /// Name shown for this device on other devices
    fn client_name(&self) -> String;

    fn device_type(&self) -> DeviceType {
        DeviceType::local()
    }
}

#[derive(Debug, Clone)]
pub struct LocalDeviceInfo {
    pub cache_guid: String,
    pub client_name: String,
    pub device_type: DeviceType,
}

impl LocalDeviceInfo {
    pub fn new(cache_guid: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            cache_guid: cache_guid.into(),
            client_name: client_name.into(),
            device_type: DeviceType::local(),
        }
    }
}

impl DeviceInfoProvider for LocalDeviceInfo {
    fn cache_guid(&self) -> String {
        self.cache_guid.clone()
    }

    fn client_name(&self) -> String {
        self.client_name.clone()
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }
}

/// Machine tag for a client; a random id stands in for a missing cache guid
pub fn build_machine_tag(cache_guid: &str) -> String {
    if cache_guid.is_empty() {
        format!("{}{}", MACHINE_TAG_PREFIX, Uuid::new_v4().simple())
    } else {
        format!("{}{}", MACHINE_TAG_PREFIX, cache_guid)
    }
}
