// SPDX-License-Identifier: GPL-3.0-only

//! Partition tables via parted and sgdisk

use std::sync::Arc;
use std::time::Duration;

use provision_contracts::{
    CommandExecutor, CommandSpec, PartitionOps, ProvisionError, Result, RetryPolicy,
};
use provision_types::{Label, PartitionType, SchemeError};

/// parted races udev on busy disks; every invocation gets a few tries.
const PARTED_RETRY: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(1));

#[derive(Debug, Clone, Copy, PartialEq)]
struct FreeRegion {
    begin: f64,
    end: f64,
}

fn parse_mib(value: &str) -> Option<f64> {
    value.trim().trim_end_matches("MiB").parse().ok()
}

/// Free regions from `parted -s -m <dev> unit MiB print free`.
fn parse_free_regions(output: &str) -> Vec<FreeRegion> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.trim().trim_end_matches(';').split(':').collect();
            if cols.len() < 5 || cols[4] != "free" {
                return None;
            }
            Some(FreeRegion {
                begin: parse_mib(cols[1])?,
                end: parse_mib(cols[2])?,
            })
        })
        .collect()
}

fn fits_free_space(regions: &[FreeRegion], begin: u64, end: u64) -> bool {
    regions
        .iter()
        .any(|region| begin as f64 >= region.begin.floor() && end as f64 <= region.end.ceil())
}

pub struct PartedTools {
    executor: Arc<dyn CommandExecutor>,
}

impl PartedTools {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn settle(&self) {
        if let Err(error) = self.executor.execute(&CommandSpec::new("udevadm").arg("settle")) {
            tracing::warn!("udevadm settle did not finish cleanly: {}", error);
        }
    }

    fn parted(&self, device: &str, args: &[&str]) -> Result<String> {
        self.settle();
        let spec = CommandSpec::new("parted")
            .args(["-s", device])
            .args(args.iter().copied())
            .retry(PARTED_RETRY);
        let output = crate::exec::capture(self.executor.as_ref(), &spec)?;
        self.settle();
        Ok(output)
    }
}

impl PartitionOps for PartedTools {
    fn make_label(&self, device: &str, label: Label) -> Result<()> {
        tracing::debug!("Creating {} label on {}", label, device);
        self.parted(device, &["mklabel", label.as_str()])?;
        Ok(())
    }

    fn make_partition(
        &self,
        device: &str,
        begin: u64,
        end: u64,
        partition_type: PartitionType,
        alignment: &str,
    ) -> Result<()> {
        if begin >= end {
            return Err(SchemeError::WrongInputData(format!(
                "partition begin {begin} must be lower than end {end} on {device}"
            ))
            .into());
        }

        let layout = crate::exec::capture(
            self.executor.as_ref(),
            &CommandSpec::new("parted").args(["-s", "-m", device, "unit", "MiB", "print", "free"]),
        )?;
        if !fits_free_space(&parse_free_regions(&layout), begin, end) {
            return Err(ProvisionError::Scheme(SchemeError::wrong_scheme(format!(
                "{begin}-{end} MiB does not fit free space on {device}"
            ))));
        }

        let begin = begin.to_string();
        let end = end.to_string();
        self.parted(
            device,
            &[
                "-a",
                alignment,
                "unit",
                "MiB",
                "mkpart",
                partition_type.as_str(),
                &begin,
                &end,
            ],
        )?;
        Ok(())
    }

    fn set_partition_flag(&self, device: &str, count: u32, flag: &str) -> Result<()> {
        let count = count.to_string();
        self.parted(device, &["set", &count, flag, "on"])?;
        Ok(())
    }

    fn set_gpt_type(&self, device: &str, count: u32, guid: &str) -> Result<()> {
        self.settle();
        crate::exec::capture(
            self.executor.as_ref(),
            &CommandSpec::new("sgdisk")
                .arg(format!("--typecode={count}:{guid}"))
                .arg(device),
        )?;
        Ok(())
    }
}
