/// Every system information item the data sink knows how to collect.
pub const SYSINFO_ALL: &[&str] = &[
    "block",
    "libvirt",
    "kernel_config",
    "security_mitigations",
    "sos",
    "topology",
    "ara",
    "stockpile",
    "insights",
];

/// Collected when `default` is requested.
pub const SYSINFO_DEFAULT: &[&str] = &[
    "block",
    "libvirt",
    "kernel_config",
    "security_mitigations",
    "sos",
    "topology",
];

/// Validate a `--sysinfo` argument.
///
/// Returns the comma separated list of items to collect (empty for none),
/// or the offending items.
pub fn verify_sysinfo(arg: Option<&str>) -> Result<String, Vec<String>> {
    let arg = match arg.map(str::trim) {
        None | Some("") | Some("none") => return Ok(String::new()),
        Some("default") => return Ok(SYSINFO_DEFAULT.join(",")),
        Some("all") => return Ok(SYSINFO_ALL.join(",")),
        Some(a) => a,
    };

    let mut items = Vec::new();
    let mut bad = Vec::new();
    for item in arg.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if SYSINFO_ALL.contains(&item) {
            if !items.contains(&item) {
                items.push(item);
            }
        } else {
            bad.push(item.to_string());
        }
    }
    if bad.is_empty() {
        Ok(items.join(","))
    } else {
        Err(bad)
    }
}
