//! Row types for the SQLite schema. Timestamps are unix seconds (UTC).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An entryway controlled by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub name: String,
    pub calendar_url: Option<String>,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Approved,
    Rejected,
}

impl DeviceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown device status {other:?}")),
        }
    }
}

/// A scanning device known to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub client_ip: String,
    pub status: DeviceStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub approved_by: Option<String>,
}

/// Association between an approved device and an entryway.
///
/// Uniqueness holds on `(device_id, entry_id)` among rows where
/// `revoked_at IS NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedDevice {
    pub id: i64,
    pub device_id: String,
    pub entry_id: i64,
    pub approved_by: String,
    pub approved_at: i64,
    pub revoked_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_status_round_trips_through_text() {
        for status in [
            DeviceStatus::Pending,
            DeviceStatus::Approved,
            DeviceStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<DeviceStatus>(), Ok(status));
        }
        assert!("unknown".parse::<DeviceStatus>().is_err());
    }
}
