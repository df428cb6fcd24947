use anyhow::{Result, bail};
use pkg_constants::addons;
use std::collections::HashSet;
use std::net::IpAddr;

use crate::cluster::ClusterSpec;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a colon-separated MAC address (`52:54:00:ab:cd:ef`).
pub fn validate_mac(mac: &str) -> Result<()> {
    let octets: Vec<&str> = mac.split(':').collect();
    if octets.len() != 6
        || !octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        bail!("'{}' is not a valid MAC address (expected xx:xx:xx:xx:xx:xx)", mac);
    }
    Ok(())
}

/// Validate an `address/prefix` CIDR.
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        bail!("'{}' is not a CIDR (missing prefix length)", cidr);
    };
    let addr: IpAddr = match addr.parse() {
        Ok(a) => a,
        Err(_) => bail!("'{}' has an invalid network address", cidr),
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    match prefix.parse::<u8>() {
        Ok(p) if p <= max => Ok(()),
        _ => bail!("'{}' has an invalid prefix length", cidr),
    }
}

/// Validate a whole cluster spec before anything is rendered or started.
pub fn validate_cluster_spec(spec: &ClusterSpec) -> Result<()> {
    validate_name(&spec.name)?;
    if spec.controllers.is_empty() {
        bail!("cluster '{}' needs at least one controller", spec.name);
    }
    if spec.kubernetes_version.trim().is_empty() {
        bail!("kubernetes version must not be empty");
    }
    validate_cidr(&spec.pod_cidr)?;
    validate_cidr(&spec.service_cidr)?;

    let mut names = HashSet::new();
    let mut ips = HashSet::new();
    let mut macs = HashSet::new();
    for (node, _) in spec.nodes() {
        validate_name(&node.name)?;
        validate_mac(&node.mac)?;
        if !names.insert(node.name.as_str()) {
            bail!("duplicate node name '{}'", node.name);
        }
        if !ips.insert(node.ip) {
            bail!("duplicate node ip {} (node '{}')", node.ip, node.name);
        }
        if !macs.insert(node.mac.to_ascii_lowercase()) {
            bail!("duplicate MAC {} (node '{}')", node.mac, node.name);
        }
    }
    if ips.contains(&spec.control_plane_vip) {
        bail!(
            "control-plane VIP {} collides with a node address",
            spec.control_plane_vip
        );
    }

    for (name, addon) in &spec.addons {
        if !addons::KNOWN_ADDONS.contains(&name.as_str()) {
            bail!(
                "unknown add-on '{}' (known: {})",
                name,
                addons::KNOWN_ADDONS.join(", ")
            );
        }
        if !addon.enabled {
            continue;
        }
        for dep in addons::dependencies_of(name) {
            if !spec.addon_enabled(dep) {
                bail!("add-on '{}' requires '{}' to be enabled", name, dep);
            }
        }
    }
    if spec.addon_enabled(addons::METALLB)
        && spec
            .addon(addons::METALLB)
            .and_then(|a| a.param_str("address_range"))
            .is_none()
    {
        bail!("add-on 'metallb' requires an address-range parameter");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{AddonConfig, NodeSpec};
    use std::collections::BTreeMap;

    fn node(name: &str, ip: &str, mac: &str) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            ip: ip.parse().unwrap(),
            mac: mac.to_string(),
        }
    }

    fn addon(enabled: bool) -> AddonConfig {
        AddonConfig {
            enabled,
            ..Default::default()
        }
    }

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "lab".to_string(),
            control_plane_vip: "10.0.0.10".parse().unwrap(),
            kubernetes_version: "v1.30.2".to_string(),
            pod_cidr: "10.244.0.0/16".to_string(),
            service_cidr: "10.96.0.0/12".to_string(),
            network: "flannel".to_string(),
            controllers: vec![node("cp-1", "10.0.0.11", "52:54:00:00:00:11")],
            workers: vec![node("worker-1", "10.0.0.21", "52:54:00:00:00:21")],
            addons: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("a-b-c-d").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("special!char").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn mac_addresses() {
        assert!(validate_mac("52:54:00:ab:CD:ef").is_ok());
        assert!(validate_mac("52:54:00:ab:cd").is_err());
        assert!(validate_mac("52-54-00-ab-cd-ef").is_err());
        assert!(validate_mac("52:54:00:ab:cd:eg").is_err());
        assert!(validate_mac("525:4:00:ab:cd:ef").is_err());
    }

    #[test]
    fn cidrs() {
        assert!(validate_cidr("10.244.0.0/16").is_ok());
        assert!(validate_cidr("fd00::/64").is_ok());
        assert!(validate_cidr("10.244.0.0").is_err());
        assert!(validate_cidr("10.244.0.0/33").is_err());
        assert!(validate_cidr("nope/8").is_err());
    }

    #[test]
    fn accepts_valid_spec() {
        assert!(validate_cluster_spec(&spec()).is_ok());
    }

    #[test]
    fn requires_a_controller() {
        let mut s = spec();
        s.controllers.clear();
        assert!(validate_cluster_spec(&s).is_err());
    }

    #[test]
    fn rejects_duplicate_nodes() {
        let mut s = spec();
        s.workers.push(node("cp-1", "10.0.0.22", "52:54:00:00:00:22"));
        assert!(validate_cluster_spec(&s).is_err());

        let mut s = spec();
        s.workers.push(node("worker-2", "10.0.0.22", "52:54:00:00:00:21"));
        assert!(validate_cluster_spec(&s).is_err());
    }

    #[test]
    fn rejects_unknown_addon() {
        let mut s = spec();
        s.addons.insert("istio".to_string(), addon(true));
        assert!(validate_cluster_spec(&s).is_err());
    }

    #[test]
    fn nebraska_requires_metallb() {
        let mut s = spec();
        s.addons.insert("nebraska".to_string(), addon(true));
        s.addons.insert("metallb".to_string(), addon(false));
        let err = validate_cluster_spec(&s).unwrap_err().to_string();
        assert!(err.contains("requires 'metallb'"), "{}", err);

        let mut metallb = addon(true);
        metallb.params.insert(
            "address-range".to_string(),
            serde_yaml::Value::String("10.0.0.200-10.0.0.250".to_string()),
        );
        s.addons.insert("metallb".to_string(), metallb);
        assert!(validate_cluster_spec(&s).is_ok());
    }

    #[test]
    fn metallb_requires_address_range() {
        let mut s = spec();
        s.addons.insert("metallb".to_string(), addon(true));
        assert!(validate_cluster_spec(&s).is_err());
    }
}
