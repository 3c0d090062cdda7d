use provision_contracts::CommandSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvRow {
    pub vg_name: String,
    pub lv_name: String,
}

impl LvRow {
    /// `vg/lv` form accepted by lvremove.
    pub fn path(&self) -> String {
        format!("{}/{}", self.vg_name, self.lv_name)
    }
}

fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

pub fn report_command(program: &str, fields: &str) -> CommandSpec {
    CommandSpec::new(program).args(["--noheadings", "-o", fields, "--separator", "\t"])
}

pub fn parse_lvs(output: &str) -> Vec<LvRow> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let cols = parse_tabbed_line(line);
            if cols.len() < 2 || cols[0].is_empty() || cols[1].is_empty() {
                return None;
            }
            Some(LvRow {
                vg_name: cols[0].clone(),
                lv_name: cols[1].clone(),
            })
        })
        .collect()
}

/// First column of a single-field report.
pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_tabbed_line(line).into_iter().next())
        .collect()
}

pub fn pvcreate_command(name: &str, metadatasize: u32, metadatacopies: u32) -> CommandSpec {
    CommandSpec::new("pvcreate")
        .args(["-ff", "-y", "--metadatacopies"])
        .arg(metadatacopies.to_string())
        .arg("--metadatasize")
        .arg(format!("{metadatasize}m"))
        .arg(name)
}
