//! Device name type representing a domain/family/member triple

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid device names
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceNameError {
    #[error("device name must contain exactly two '/' separators")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("family cannot be empty")]
    EmptyFamily,

    #[error("member cannot be empty")]
    EmptyMember,

    #[error(
        "segment '{0}' contains invalid characters (must be lowercase alphanumeric with underscores and dashes, cannot start/end with a separator character)"
    )]
    InvalidSegmentChars(String),
}

/// Identifies a remote device (e.g., "tmc/central_node/0")
///
/// Device names consist of a domain, a family, and a member separated by
/// slashes. All segments must be lowercase alphanumeric with underscores
/// or dashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName {
    domain: String,
    family: String,
    member: String,
}

impl DeviceName {
    /// Create a new DeviceName from domain, family and member parts
    pub fn new(
        domain: impl Into<String>,
        family: impl Into<String>,
        member: impl Into<String>,
    ) -> Result<Self, DeviceNameError> {
        let domain = domain.into();
        let family = family.into();
        let member = member.into();

        if domain.is_empty() {
            return Err(DeviceNameError::EmptyDomain);
        }
        if family.is_empty() {
            return Err(DeviceNameError::EmptyFamily);
        }
        if member.is_empty() {
            return Err(DeviceNameError::EmptyMember);
        }
        for segment in [&domain, &family, &member] {
            if !Self::is_valid_segment(segment) {
                return Err(DeviceNameError::InvalidSegmentChars(segment.clone()));
            }
        }

        Ok(Self {
            domain,
            family,
            member,
        })
    }

    /// Get the domain part of the device name
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the family part of the device name
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Get the member part of the device name
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Check if a segment is valid (lowercase alphanumeric + underscore/dash,
    /// cannot start or end with either)
    fn is_valid_segment(s: &str) -> bool {
        if s.starts_with(['_', '-']) || s.ends_with(['_', '-']) {
            return false;
        }
        s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    }
}

impl FromStr for DeviceName {
    type Err = DeviceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(DeviceNameError::InvalidFormat);
        }
        Self::new(parts[0], parts[1], parts[2])
    }
}

impl TryFrom<String> for DeviceName {
    type Error = DeviceNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeviceName> for String {
    fn from(name: DeviceName) -> String {
        name.to_string()
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.family, self.member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_device_name() {
        let name = DeviceName::new("tmc", "central_node", "0").unwrap();
        assert_eq!(name.domain(), "tmc");
        assert_eq!(name.family(), "central_node");
        assert_eq!(name.member(), "0");
        assert_eq!(name.to_string(), "tmc/central_node/0");
    }

    #[test]
    fn test_parse_device_name() {
        let name: DeviceName = "csp-mid/subarray/01".parse().unwrap();
        assert_eq!(name.domain(), "csp-mid");
        assert_eq!(name.family(), "subarray");
        assert_eq!(name.member(), "01");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "no_separator".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::InvalidFormat
        );
        assert_eq!(
            "only/one".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::InvalidFormat
        );
        assert_eq!(
            "way/too/many/parts".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::InvalidFormat
        );
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            "/family/0".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::EmptyDomain
        );
        assert_eq!(
            "domain//0".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::EmptyFamily
        );
        assert_eq!(
            "domain/family/".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::EmptyMember
        );
    }

    #[test]
    fn test_invalid_chars() {
        assert_eq!(
            "TMC/central/0".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::InvalidSegmentChars("TMC".to_string())
        );
        assert_eq!(
            "tmc/central node/0".parse::<DeviceName>().unwrap_err(),
            DeviceNameError::InvalidSegmentChars("central node".to_string())
        );
    }

    #[test]
    fn test_separator_edge_rules() {
        // Leading underscore - invalid
        assert!("_tmc/central/0".parse::<DeviceName>().is_err());
        // Trailing dash - invalid
        assert!("tmc/central-/0".parse::<DeviceName>().is_err());
        // Middle underscores and dashes are fine
        assert!("mid-tmc/central_node/0".parse::<DeviceName>().is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let name = DeviceName::new("sdp", "subarray", "1").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"sdp/subarray/1\"");

        let parsed: DeviceName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }
}
