// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemeError};

pub const DEFAULT_MD_LEVEL: &str = "mirror";
pub const DEFAULT_MD_METADATA: &str = "default";

/// Software RAID array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Md {
    pub name: String,
    pub level: String,
    pub metadata: String,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub spares: Vec<String>,
    #[serde(default)]
    pub keep_data: bool,
}

impl Md {
    pub fn new(name: impl Into<String>, level: impl Into<String>, metadata: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            metadata: metadata.into(),
            devices: Vec::new(),
            spares: Vec::new(),
            keep_data: false,
        }
    }

    fn contains(&self, device: &str) -> bool {
        self.devices.iter().chain(self.spares.iter()).any(|d| d == device)
    }

    pub fn add_device(&mut self, device: &str) -> Result<()> {
        if self.contains(device) {
            return Err(SchemeError::MdDeviceDuplication {
                md: self.name.clone(),
                device: device.to_string(),
            });
        }
        self.devices.push(device.to_string());
        Ok(())
    }

    pub fn add_spare(&mut self, device: &str) -> Result<()> {
        if self.contains(device) {
            return Err(SchemeError::MdDeviceDuplication {
                md: self.name.clone(),
                device: device.to_string(),
            });
        }
        self.spares.push(device.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_cannot_be_added_twice() {
        let mut md = Md::new("/dev/md0", DEFAULT_MD_LEVEL, DEFAULT_MD_METADATA);
        md.add_device("/dev/sda3").expect("first member");
        md.add_spare("/dev/sdc3").expect("spare");

        assert!(matches!(
            md.add_device("/dev/sda3"),
            Err(SchemeError::MdDeviceDuplication { .. })
        ));
        assert!(md.add_device("/dev/sdc3").is_err());
        assert_eq!(md.devices, vec!["/dev/sda3"]);
    }
}
