//! Compiled-in add-on catalog and install ordering.

use anyhow::{Result, bail};
use pkg_constants::addons::{CERT_MANAGER, METALLB, NEBRASKA, ROOK_CEPH};
use pkg_types::cluster::{AddonConfig, ClusterSpec};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::cluster::{ManifestSource, Workload, WorkloadKind};
use crate::error::BootstrapError;

/// Readiness check beyond workload rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// `ceph health` in the toolbox until it reports `HEALTH_OK`.
    CephHealth,
}

/// Inputs available when building an add-on's manifests.
pub struct AddonContext<'a> {
    pub version: &'a str,
    pub config: Option<&'a AddonConfig>,
    pub manifest_dir: &'a Path,
}

impl AddonContext<'_> {
    fn param(&self, key: &str) -> Option<String> {
        self.config.and_then(|c| c.param_str(key))
    }
}

/// One installable add-on.
pub struct AddonSpec {
    pub name: &'static str,
    pub depends_on: &'static [&'static str],
    pub default_version: &'static str,
    pub namespace: &'static str,
    /// Manifests applied in order.
    pub manifests: fn(&AddonContext) -> Vec<ManifestSource>,
    /// Workloads that must finish rolling out, in `namespace`.
    pub workloads: &'static [(WorkloadKind, &'static str)],
    pub probe: Option<ReadinessProbe>,
    /// Configuration that only makes sense once the add-on is healthy.
    pub post_ready: Option<fn(&AddonContext) -> Result<ManifestSource>>,
}

impl AddonSpec {
    pub fn workloads(&self) -> Vec<Workload> {
        self.workloads
            .iter()
            .map(|(kind, name)| Workload {
                kind: *kind,
                name: name.to_string(),
                namespace: self.namespace.to_string(),
            })
            .collect()
    }

    pub fn context<'a>(&self, spec: &'a ClusterSpec, manifest_dir: &'a Path) -> AddonContext<'a> {
        let config = spec.addon(self.name);
        let version = config
            .and_then(|c| c.version.as_deref())
            .filter(|v| !v.is_empty())
            .unwrap_or(self.default_version);
        AddonContext {
            version,
            config,
            manifest_dir,
        }
    }
}

/// Every add-on in declared order.
pub static CATALOG: &[AddonSpec] = &[
    AddonSpec {
        name: CERT_MANAGER,
        depends_on: &[],
        default_version: "v1.14.5",
        namespace: "cert-manager",
        manifests: cert_manager_manifests,
        workloads: &[
            (WorkloadKind::Deployment, "cert-manager"),
            (WorkloadKind::Deployment, "cert-manager-cainjector"),
            (WorkloadKind::Deployment, "cert-manager-webhook"),
        ],
        probe: None,
        post_ready: Some(cert_manager_issuer),
    },
    AddonSpec {
        name: METALLB,
        depends_on: &[],
        default_version: "v0.14.5",
        namespace: "metallb-system",
        manifests: metallb_manifests,
        workloads: &[
            (WorkloadKind::Deployment, "controller"),
            (WorkloadKind::DaemonSet, "speaker"),
        ],
        probe: None,
        post_ready: Some(metallb_pool),
    },
    AddonSpec {
        name: ROOK_CEPH,
        depends_on: &[],
        default_version: "v1.14.5",
        namespace: "rook-ceph",
        manifests: rook_ceph_manifests,
        workloads: &[
            (WorkloadKind::Deployment, "rook-ceph-operator"),
            (WorkloadKind::Deployment, "rook-ceph-tools"),
        ],
        probe: Some(ReadinessProbe::CephHealth),
        post_ready: Some(rook_ceph_storage_class),
    },
    AddonSpec {
        name: NEBRASKA,
        depends_on: &[METALLB],
        default_version: "latest",
        namespace: "nebraska",
        manifests: nebraska_manifests,
        workloads: &[(WorkloadKind::Deployment, "nebraska")],
        probe: None,
        post_ready: None,
    },
];

pub fn find(name: &str) -> Option<&'static AddonSpec> {
    CATALOG.iter().find(|a| a.name == name)
}

/// Enabled add-ons in install order: a stable topological sort of the
/// enabled subset, ties broken by catalog order.
pub fn install_order(spec: &ClusterSpec) -> Result<Vec<&'static AddonSpec>, BootstrapError> {
    let enabled: Vec<&'static AddonSpec> = CATALOG
        .iter()
        .filter(|a| spec.addon_enabled(a.name))
        .collect();
    order(&enabled)
}

/// Kahn's algorithm over `addons`; every dependency must be in the set.
pub fn order(addons: &[&'static AddonSpec]) -> Result<Vec<&'static AddonSpec>, BootstrapError> {
    let names: HashSet<&str> = addons.iter().map(|a| a.name).collect();
    for addon in addons {
        if let Some(dep) = addon.depends_on.iter().find(|d| !names.contains(*d)) {
            return Err(BootstrapError::UnmetDependency {
                addon: addon.name.to_string(),
                dependency: dep.to_string(),
            });
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(addons.len());
    while ordered.len() < addons.len() {
        let next = addons
            .iter()
            .find(|a| !placed.contains(a.name) && a.depends_on.iter().all(|d| placed.contains(d)));
        match next {
            Some(addon) => {
                placed.insert(addon.name);
                ordered.push(*addon);
            }
            None => {
                return Err(BootstrapError::Internal(anyhow::anyhow!(
                    "add-on dependency cycle among {:?}",
                    addons.iter().map(|a| a.name).collect::<Vec<_>>()
                )));
            }
        }
    }
    Ok(ordered)
}

// ─── Manifests ──────────────────────────────────────────────────

fn cert_manager_manifests(ctx: &AddonContext) -> Vec<ManifestSource> {
    vec![ManifestSource::Url(format!(
        "https://github.com/cert-manager/cert-manager/releases/download/{}/cert-manager.yaml",
        ctx.version
    ))]
}

fn metallb_manifests(ctx: &AddonContext) -> Vec<ManifestSource> {
    vec![ManifestSource::Url(format!(
        "https://raw.githubusercontent.com/metallb/metallb/{}/config/manifests/metallb-native.yaml",
        ctx.version
    ))]
}

fn rook_ceph_manifests(ctx: &AddonContext) -> Vec<ManifestSource> {
    let base = format!(
        "https://raw.githubusercontent.com/rook/rook/{}/deploy/examples",
        ctx.version
    );
    ["crds.yaml", "common.yaml", "operator.yaml", "cluster.yaml", "toolbox.yaml"]
        .iter()
        .map(|file| ManifestSource::Url(format!("{}/{}", base, file)))
        .collect()
}

fn nebraska_manifests(ctx: &AddonContext) -> Vec<ManifestSource> {
    vec![ManifestSource::Path(ctx.manifest_dir.join("nebraska.yaml"))]
}

// ─── Post-ready objects ─────────────────────────────────────────

fn to_yaml(docs: &[serde_json::Value]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out)
}

fn cert_manager_issuer(ctx: &AddonContext) -> Result<ManifestSource> {
    let name = ctx.param("issuer_name").unwrap_or_else(|| "selfsigned".to_string());
    let issuer = json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "ClusterIssuer",
        "metadata": { "name": name },
        "spec": { "selfSigned": {} }
    });
    Ok(ManifestSource::Inline {
        name: "cert-manager-issuer".to_string(),
        yaml: to_yaml(&[issuer])?,
    })
}

fn metallb_pool(ctx: &AddonContext) -> Result<ManifestSource> {
    let Some(range) = ctx.param("address_range") else {
        bail!("metallb needs an address-range parameter");
    };
    let pool = json!({
        "apiVersion": "metallb.io/v1beta1",
        "kind": "IPAddressPool",
        "metadata": { "name": "default", "namespace": "metallb-system" },
        "spec": { "addresses": [range] }
    });
    let advertisement = json!({
        "apiVersion": "metallb.io/v1beta1",
        "kind": "L2Advertisement",
        "metadata": { "name": "default", "namespace": "metallb-system" },
        "spec": { "ipAddressPools": ["default"] }
    });
    Ok(ManifestSource::Inline {
        name: "metallb-pool".to_string(),
        yaml: to_yaml(&[pool, advertisement])?,
    })
}

fn rook_ceph_storage_class(ctx: &AddonContext) -> Result<ManifestSource> {
    let replicas: u32 = match ctx.param("replicas") {
        Some(r) => r.parse()?,
        None => 3,
    };
    let pool = json!({
        "apiVersion": "ceph.rook.io/v1",
        "kind": "CephBlockPool",
        "metadata": { "name": "replicapool", "namespace": "rook-ceph" },
        "spec": { "failureDomain": "host", "replicated": { "size": replicas } }
    });
    let storage_class = json!({
        "apiVersion": "storage.k8s.io/v1",
        "kind": "StorageClass",
        "metadata": {
            "name": "rook-ceph-block",
            "annotations": { "storageclass.kubernetes.io/is-default-class": "true" }
        },
        "provisioner": "rook-ceph.rbd.csi.ceph.com",
        "parameters": {
            "clusterID": "rook-ceph",
            "pool": "replicapool",
            "imageFormat": "2",
            "imageFeatures": "layering",
            "csi.storage.k8s.io/provisioner-secret-name": "rook-csi-rbd-provisioner",
            "csi.storage.k8s.io/provisioner-secret-namespace": "rook-ceph",
            "csi.storage.k8s.io/controller-expand-secret-name": "rook-csi-rbd-provisioner",
            "csi.storage.k8s.io/controller-expand-secret-namespace": "rook-ceph",
            "csi.storage.k8s.io/node-stage-secret-name": "rook-csi-rbd-node",
            "csi.storage.k8s.io/node-stage-secret-namespace": "rook-ceph",
            "csi.storage.k8s.io/fstype": "ext4"
        },
        "reclaimPolicy": "Delete",
        "allowVolumeExpansion": true
    });
    Ok(ManifestSource::Inline {
        name: "rook-ceph-storageclass".to_string(),
        yaml: to_yaml(&[pool, storage_class])?,
    })
}

/// Ceph reports `HEALTH_OK` only when fully healthy.
pub fn ceph_healthy(output: &str) -> bool {
    output.trim_start().starts_with("HEALTH_OK")
}

/// Bound and interval for a readiness probe.
pub fn probe_timing(probe: ReadinessProbe, settings: &crate::settings::AddonSettings) -> (Duration, Duration) {
    match probe {
        ReadinessProbe::CephHealth => (settings.ceph_health_timeout, settings.ceph_health_interval),
    }
}
