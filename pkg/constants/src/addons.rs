//! Add-on names and the namespaces they install into.

pub const CERT_MANAGER: &str = "cert-manager";
pub const METALLB: &str = "metallb";
pub const ROOK_CEPH: &str = "rook-ceph";
pub const NEBRASKA: &str = "nebraska";

/// Every add-on the installer knows about, in declared order.
pub const KNOWN_ADDONS: &[&str] = &[CERT_MANAGER, METALLB, ROOK_CEPH, NEBRASKA];

/// Field manager name used for server-side apply.
pub const FIELD_MANAGER: &str = "metalboot";

/// Declared inter-add-on dependencies. Add-ons not listed have none.
pub const DEPENDENCIES: &[(&str, &[&str])] = &[(NEBRASKA, &[METALLB])];

/// Dependencies declared for `name`.
pub fn dependencies_of(name: &str) -> &'static [&'static str] {
    DEPENDENCIES
        .iter()
        .find(|(addon, _)| *addon == name)
        .map(|(_, deps)| *deps)
        .unwrap_or(&[])
}
