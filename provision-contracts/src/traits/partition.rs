// SPDX-License-Identifier: GPL-3.0-only

use provision_types::{Label, PartitionType};

use crate::Result;

pub trait PartitionOps: Send + Sync {
    fn make_label(&self, device: &str, label: Label) -> Result<()>;

    /// Create a partition between `begin` and `end` (MiB).
    fn make_partition(
        &self,
        device: &str,
        begin: u64,
        end: u64,
        partition_type: PartitionType,
        alignment: &str,
    ) -> Result<()>;

    fn set_partition_flag(&self, device: &str, count: u32, flag: &str) -> Result<()>;

    fn set_gpt_type(&self, device: &str, count: u32, guid: &str) -> Result<()>;
}
