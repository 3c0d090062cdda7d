use std::collections::{BTreeMap, HashMap};

use provision_contracts::CommandSpec;

#[derive(Debug, Clone)]
struct MdArrayScan {
    device: String,
    metadata: Option<String>,
    container: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MdstatState {
    members: Vec<String>,
}

/// An array scheduled for removal together with its member devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdCleanup {
    pub device: String,
    pub members: Vec<String>,
}

fn parse_mdadm_scan(output: &str) -> Vec<MdArrayScan> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || !line.starts_with("ARRAY ") {
                return None;
            }

            let mut parts = line.split_whitespace();
            let _array = parts.next()?;
            let device = parts.next()?.to_string();

            let mut metadata = None;
            let mut container = None;

            for token in parts {
                if let Some(value) = token.strip_prefix("metadata=") {
                    metadata = Some(value.to_string());
                }
                if let Some(value) = token.strip_prefix("container=") {
                    container = Some(value.to_string());
                }
            }

            Some(MdArrayScan {
                device,
                metadata,
                container,
            })
        })
        .collect()
}

fn parse_proc_mdstat(output: &str) -> HashMap<String, MdstatState> {
    let mut map = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("md") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[1] != ":" {
            continue;
        }
        let members = parts
            .iter()
            .filter(|part| part.contains('[') && part.contains(']'))
            .map(|part| part.split('[').next().unwrap_or(part).to_string())
            .collect();
        map.insert(parts[0].to_string(), MdstatState { members });
    }

    map
}

fn is_container(scan: &MdArrayScan) -> bool {
    scan.container.is_some()
        || scan
            .metadata
            .as_deref()
            .is_some_and(|metadata| matches!(metadata, "imsm" | "ddf"))
}

fn short_name(device: &str) -> String {
    device.rsplit('/').next().unwrap_or(device).to_string()
}

/// Arrays known to mdadm or the kernel, minus firmware RAID containers when
/// `skip_containers` is set.
pub fn arrays_to_clean(scan_output: &str, mdstat_output: &str, skip_containers: bool) -> Vec<MdCleanup> {
    let mut mdstat = parse_proc_mdstat(mdstat_output);
    let mut arrays = BTreeMap::new();

    for scan in parse_mdadm_scan(scan_output) {
        let name = short_name(&scan.device);
        let state = mdstat.remove(&name).unwrap_or_default();
        if skip_containers && is_container(&scan) {
            tracing::debug!("Skipping MD container {}", scan.device);
            continue;
        }
        arrays.insert(name, scan.device.clone());
        if !state.members.is_empty() {
            mdstat.insert(short_name(&scan.device), state);
        }
    }
    // inactive arrays show up only in /proc/mdstat
    for name in mdstat.keys() {
        arrays
            .entry(name.clone())
            .or_insert_with(|| format!("/dev/{name}"));
    }

    arrays
        .into_iter()
        .map(|(name, device)| MdCleanup {
            device,
            members: mdstat
                .get(&name)
                .map(|state| {
                    state
                        .members
                        .iter()
                        .map(|member| format!("/dev/{member}"))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

pub fn create_command(name: &str, level: &str, devices: &[String], metadata: &str) -> CommandSpec {
    CommandSpec::new("mdadm")
        .args(["--create", "--run", "--force", name, "-e", metadata])
        .arg(format!("--level={level}"))
        .arg(format!("--raid-devices={}", devices.len()))
        .args(devices.iter().cloned())
}
