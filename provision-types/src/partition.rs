// SPDX-License-Identifier: GPL-3.0-only

//! Partition table types
//!
//! A [`Parted`] describes the table to be written on one block device. Partition
//! names, numbers, offsets and types are derived from the partitions already
//! present in the table, so callers only provide sizes and markers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Disk label kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Gpt,
    Msdos,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    Primary,
    Extended,
    Logical,
}

impl PartitionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single partition, owned by exactly one [`Parted`].
///
/// Offsets are in MiB. Extended partitions have no name because they never
/// carry data of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: Option<String>,
    pub count: u32,
    pub device: String,
    pub begin: u64,
    pub end: u64,
    pub partition_type: PartitionType,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub configdrive: bool,
    #[serde(default)]
    pub keep_data: bool,
}

impl Partition {
    pub fn set_flag(&mut self, flag: &str) {
        if !self.flags.iter().any(|existing| existing == flag) {
            self.flags.push(flag.to_string());
        }
    }

    pub fn set_guid(&mut self, guid: impl Into<String>) {
        self.guid = Some(guid.into());
    }

    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }
}

/// Parameters for [`Parted::add_partition`].
#[derive(Debug, Clone, Default)]
pub struct PartitionRequest {
    pub size: u64,
    pub begin: Option<u64>,
    pub end: Option<u64>,
    pub partition_type: Option<PartitionType>,
    pub flags: Vec<String>,
    pub guid: Option<String>,
    pub configdrive: bool,
    pub keep_data: bool,
}

impl PartitionRequest {
    pub fn sized(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    pub fn guid(mut self, guid: Option<String>) -> Self {
        self.guid = guid;
        self
    }

    pub fn configdrive(mut self) -> Self {
        self.configdrive = true;
        self
    }

    pub fn keep_data(mut self, keep_data: bool) -> Self {
        self.keep_data = keep_data;
        self
    }
}

/// Partition table for one physical or multipath block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parted {
    pub name: String,
    pub label: Label,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub install_bootloader: bool,
}

impl Parted {
    pub fn new(name: impl Into<String>, label: Label) -> Self {
        Self {
            name: name.into(),
            label,
            partitions: Vec::new(),
            install_bootloader: false,
        }
    }

    pub fn add_partition(&mut self, request: PartitionRequest) -> &mut Partition {
        let next_type = self.next_type();
        let begin = request.begin.unwrap_or_else(|| self.next_begin());
        let end = request.end.unwrap_or(begin + request.size);
        let partition = Partition {
            name: self.next_name(),
            count: self.next_count(next_type),
            device: self.name.clone(),
            begin,
            end,
            partition_type: request.partition_type.unwrap_or(next_type),
            flags: request.flags,
            guid: request.guid,
            configdrive: request.configdrive,
            keep_data: request.keep_data,
        };
        self.partitions.push(partition);
        let last = self.partitions.len() - 1;
        &mut self.partitions[last]
    }

    pub fn logical(&self) -> impl Iterator<Item = &Partition> {
        self.partitions
            .iter()
            .filter(|p| p.partition_type == PartitionType::Logical)
    }

    pub fn primary(&self) -> impl Iterator<Item = &Partition> {
        self.partitions
            .iter()
            .filter(|p| p.partition_type == PartitionType::Primary)
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.partition_type == PartitionType::Extended)
    }

    /// Type the next created partition will get.
    ///
    /// On msdos the fourth slot becomes the extended container and everything
    /// after it is logical.
    pub fn next_type(&self) -> PartitionType {
        match self.label {
            Label::Gpt => PartitionType::Primary,
            Label::Msdos => {
                if self.extended().is_some() {
                    PartitionType::Logical
                } else if self.partitions.len() < 3 {
                    PartitionType::Primary
                } else if self.partitions.len() == 3 {
                    PartitionType::Extended
                } else {
                    PartitionType::Logical
                }
            }
        }
    }

    pub fn next_count(&self, next_type: PartitionType) -> u32 {
        match next_type {
            PartitionType::Logical => self.logical().count() as u32 + 5,
            _ => self.partitions.len() as u32 + 1,
        }
    }

    pub fn next_begin(&self) -> u64 {
        match self.partitions.last() {
            None => 1,
            Some(last) if last.partition_type == PartitionType::Extended => last.begin + 1,
            Some(last) => last.end + 1,
        }
    }

    pub fn next_name(&self) -> Option<String> {
        let next_type = self.next_type();
        if next_type == PartitionType::Extended {
            return None;
        }
        Some(format!(
            "{}{}{}",
            self.name,
            self.separator(),
            self.next_count(next_type)
        ))
    }

    /// Separator between the device name and the partition number.
    pub fn separator(&self) -> &'static str {
        const NUMBERED: [&str; 4] = ["cciss", "nvme", "loop", "md"];
        if NUMBERED.iter().any(|kind| self.name.contains(kind)) {
            "p"
        } else if self.name.contains("/dev/mapper") {
            "-part"
        } else {
            ""
        }
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }

    pub fn partition_by_name_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.partitions
            .iter_mut()
            .find(|p| p.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_partitions_are_primary_and_contiguous() {
        let mut parted = Parted::new("/dev/sda", Label::Gpt);
        for _ in 0..6 {
            parted.add_partition(PartitionRequest::sized(100));
        }

        assert!(
            parted
                .partitions
                .iter()
                .all(|p| p.partition_type == PartitionType::Primary)
        );
        assert_eq!(parted.partitions[0].begin, 1);
        assert_eq!(parted.partitions[0].end, 101);
        assert_eq!(parted.partitions[1].begin, 102);
        assert_eq!(parted.partitions[5].name.as_deref(), Some("/dev/sda6"));
    }

    #[test]
    fn msdos_switches_to_extended_then_logical() {
        let mut parted = Parted::new("/dev/sdb", Label::Msdos);
        for _ in 0..3 {
            parted.add_partition(PartitionRequest::sized(100));
        }
        let extended = parted.add_partition(PartitionRequest::sized(1000));
        assert_eq!(extended.partition_type, PartitionType::Extended);
        assert_eq!(extended.name, None);
        assert_eq!(extended.count, 4);
        let extended_begin = extended.begin;

        let first_logical = parted.add_partition(PartitionRequest::sized(100)).clone();
        let second_logical = parted.add_partition(PartitionRequest::sized(100)).clone();

        assert_eq!(first_logical.partition_type, PartitionType::Logical);
        assert_eq!(first_logical.count, 5);
        assert_eq!(first_logical.begin, extended_begin + 1);
        assert_eq!(first_logical.name.as_deref(), Some("/dev/sdb5"));
        assert_eq!(second_logical.count, 6);
        assert_eq!(parted.primary().count(), 3);
        assert_eq!(
            parted
                .partitions
                .iter()
                .filter(|p| p.partition_type == PartitionType::Extended)
                .count(),
            1
        );
    }

    #[test]
    fn separator_follows_device_naming() {
        assert_eq!(Parted::new("/dev/nvme0n1", Label::Gpt).separator(), "p");
        assert_eq!(Parted::new("/dev/loop3", Label::Gpt).separator(), "p");
        assert_eq!(Parted::new("/dev/md0", Label::Gpt).separator(), "p");
        assert_eq!(
            Parted::new("/dev/mapper/mpatha", Label::Gpt).separator(),
            "-part"
        );
        assert_eq!(Parted::new("/dev/sdc", Label::Gpt).separator(), "");

        let mut parted = Parted::new("/dev/mapper/mpatha", Label::Gpt);
        let partition = parted.add_partition(PartitionRequest::sized(10));
        assert_eq!(partition.name.as_deref(), Some("/dev/mapper/mpatha-part1"));
    }

    #[test]
    fn set_flag_is_deduplicated() {
        let mut parted = Parted::new("/dev/sda", Label::Gpt);
        let partition = parted.add_partition(PartitionRequest::sized(24).flag("bios_grub"));
        partition.set_flag("bios_grub");
        partition.set_flag("boot");
        assert_eq!(partition.flags, vec!["bios_grub", "boot"]);
    }

    #[test]
    fn parted_serde_roundtrip_preserves_layout() {
        let mut parted = Parted::new("/dev/sda", Label::Gpt);
        parted.install_bootloader = true;
        parted.add_partition(PartitionRequest::sized(24).flag("bios_grub"));
        parted.add_partition(
            PartitionRequest::sized(2048)
                .guid(Some("45b0969e-9b03-4f30-b4c6-b4b80ceff106".to_string())),
        );
        parted.add_partition(PartitionRequest::sized(20).configdrive());

        let json = serde_json::to_value(&parted).expect("serialize parted");
        let parsed: Parted = serde_json::from_value(json).expect("deserialize parted");
        assert_eq!(parsed, parted);
    }
}
