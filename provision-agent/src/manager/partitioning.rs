// SPDX-License-Identifier: GPL-3.0-only

use provision_contracts::{ProvisionError, Result};
use provision_types::{Parted, SchemeError};

use super::{Manager, finish};

/// MiB zeroed around each partition boundary.
const WIPE_WINDOW: u64 = 5;
/// How far before a boundary the wipe starts.
const WIPE_LEAD: u64 = 3;

impl Manager {
    pub fn do_partitioning(&self) -> Result<()> {
        tracing::info!("--- Partitioning disks (do_partitioning) ---");
        let scheme = self.driver.partition_scheme();

        if scheme.skip_partitioning() {
            tracing::info!("Some data on a partition scheme must be kept, skipping partitioning");
            self.make_filesystems()?;
            tracing::info!("--- Partitioning disks END (do_partitioning) ---");
            return Ok(());
        }

        self.tools.logical.wipe_all(self.config.skip_md_containers)?;

        let mut plain = Vec::new();
        let mut multipath = Vec::new();
        for parted in &scheme.parteds {
            if self.tools.host.is_multipath_device(&parted.name)? {
                multipath.push(parted);
            } else {
                plain.push(parted);
            }
        }

        // Stale MD or LVM signatures near partition boundaries would be
        // picked up again once the table is rewritten.
        for parted in &scheme.parteds {
            for partition in &parted.partitions {
                self.tools.host.zero_range(
                    &partition.device,
                    partition.begin.saturating_sub(WIPE_LEAD),
                    WIPE_WINDOW,
                    false,
                )?;
                self.tools.host.zero_range(
                    &partition.device,
                    partition.end.saturating_sub(WIPE_LEAD),
                    WIPE_WINDOW,
                    true,
                )?;
            }
        }

        let blacklist = self.config.udev_blacklist();
        self.tools.host.blacklist_udev_rules(&blacklist)?;
        let created = self.make_partitions(&plain);
        finish(created, self.tools.host.unblacklist_udev_rules(&blacklist))?;

        // Multipath maps are only built by the rules blacklisted above.
        self.make_partitions(&multipath)?;

        self.tools.logical.wipe_all(self.config.skip_md_containers)?;

        if !multipath.is_empty() {
            self.tools.host.refresh_multipath()?;
        }

        for md in &scheme.mds {
            self.tools
                .logical
                .md_create(&md.name, &md.level, &md.devices, &md.metadata)?;
        }
        for pv in &scheme.pvs {
            self.tools
                .logical
                .pv_create(&pv.name, pv.metadatasize, pv.metadatacopies)?;
        }
        for vg in &scheme.vgs {
            self.tools.logical.vg_create(&vg.name, &vg.pvnames)?;
        }
        for lv in &scheme.lvs {
            self.tools.logical.lv_create(&lv.vgname, &lv.name, lv.size)?;
        }

        self.make_filesystems()?;
        tracing::info!("--- Partitioning disks END (do_partitioning) ---");
        Ok(())
    }

    fn make_partitions(&self, parteds: &[&Parted]) -> Result<()> {
        for parted in parteds {
            tracing::debug!("Writing {} label on {}", parted.label, parted.name);
            self.tools.partitions.make_label(&parted.name, parted.label)?;

            for partition in &parted.partitions {
                self.tools.partitions.make_partition(
                    &partition.device,
                    partition.begin,
                    partition.end,
                    partition.partition_type,
                    &self.config.partition_alignment,
                )?;
                self.tools.host.udev_settle_blocks()?;

                for flag in &partition.flags {
                    self.tools
                        .partitions
                        .set_partition_flag(&partition.device, partition.count, flag)?;
                }
                if let Some(guid) = &partition.guid {
                    self.tools
                        .partitions
                        .set_gpt_type(&partition.device, partition.count, guid)?;
                }

                if let Some(name) = &partition.name
                    && !self.tools.host.path_exists(name)
                {
                    tracing::error!("Partition {} not found after creation", name);
                    return Err(ProvisionError::PartitionNotFound(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Format everything that is neither preserved nor overwritten by an
    /// image.
    fn make_filesystems(&self) -> Result<()> {
        let scheme = self.driver.partition_scheme();
        let images = self.driver.image_scheme();

        for fs in &scheme.fss {
            if fs.keep_data {
                tracing::debug!("Keeping data on {}", fs.device);
                continue;
            }
            if images.targets(&fs.device) {
                tracing::debug!("{} will be written by an image", fs.device);
                continue;
            }
            let device = scheme.resolve_device(&fs.device).ok_or_else(|| {
                SchemeError::wrong_scheme(format!("device {} is not attached", fs.device))
            })?;
            self.tools
                .fs
                .make_fs(&fs.fs_type, &fs.options, fs.label.as_deref(), &device)?;
        }
        Ok(())
    }
}
