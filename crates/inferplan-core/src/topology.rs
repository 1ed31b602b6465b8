//! Cluster topology: devices, nodes, and the per-device-type aggregation
//! used to bound the search space.
//!
//! Devices within one node bound tensor parallelism; each node holding a
//! device type contributes one unit toward pipeline parallelism.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broad device category; drives PP clamping and price fallbacks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    #[default]
    Cuda,
    Hpu,
}

/// Whether a device is exclusively owned or time-sliced with other workloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    /// Full performance modeling applies.
    #[default]
    Dedicated,
    /// Memory-only feasibility: no parallelism, no latency claims.
    Shared,
}

/// Known accelerator profile that determines hardware characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AcceleratorProfile {
    /// NVIDIA H100 SXM (80GB HBM3).
    H100Sxm,
    /// NVIDIA A100 SXM (80GB HBM2e).
    A100Sxm80,
    /// NVIDIA L40S (48GB GDDR6).
    L40S,
    /// Intel Gaudi2 (96GB HBM2e).
    Gaudi2,
    /// Generic CPU host (system RAM, no HBM).
    CpuHost,
    /// Custom profile with user-specified parameters.
    Custom {
        memory_gb: f64,
        hbm_bandwidth_gb_s: f64,
        peak_tflops: f64,
        purchase_price_usd: f64,
    },
}

impl AcceleratorProfile {
    /// Parse a device model name into a profile. Unknown names get `None`;
    /// callers then rely on explicitly supplied specs.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h100" | "h100-sxm" | "h100sxm" => Some(Self::H100Sxm),
            "a100" | "a100-sxm-80" | "a100sxm80" => Some(Self::A100Sxm80),
            "l40s" => Some(Self::L40S),
            "gaudi2" => Some(Self::Gaudi2),
            "cpu" | "cpu-host" => Some(Self::CpuHost),
            _ => None,
        }
    }

    /// Memory capacity in GB.
    pub fn memory_gb(&self) -> f64 {
        match self {
            Self::H100Sxm => 80.0,
            Self::A100Sxm80 => 80.0,
            Self::L40S => 48.0,
            Self::Gaudi2 => 96.0,
            Self::CpuHost => 256.0,
            Self::Custom { memory_gb, .. } => *memory_gb,
        }
    }

    /// HBM (or system memory) bandwidth in GB/s.
    pub fn hbm_bandwidth_gb_s(&self) -> f64 {
        match self {
            Self::H100Sxm => 3350.0,
            Self::A100Sxm80 => 2000.0,
            Self::L40S => 864.0,
            Self::Gaudi2 => 2450.0,
            Self::CpuHost => 300.0,
            Self::Custom {
                hbm_bandwidth_gb_s, ..
            } => *hbm_bandwidth_gb_s,
        }
    }

    /// Peak dense BF16 compute in TFLOPS.
    pub fn peak_tflops(&self) -> f64 {
        match self {
            Self::H100Sxm => 989.0,
            Self::A100Sxm80 => 312.0,
            Self::L40S => 362.0,
            Self::Gaudi2 => 432.0,
            Self::CpuHost => 4.0,
            Self::Custom { peak_tflops, .. } => *peak_tflops,
        }
    }

    /// Purchase price in USD, fed into cost amortization.
    pub fn purchase_price_usd(&self) -> f64 {
        match self {
            Self::H100Sxm => 30_000.0,
            Self::A100Sxm80 => 15_000.0,
            Self::L40S => 10_000.0,
            Self::Gaudi2 => 12_000.0,
            Self::CpuHost => 8_000.0,
            Self::Custom {
                purchase_price_usd, ..
            } => *purchase_price_usd,
        }
    }
}

/// An immutable device description supplied by the cluster provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device model name; keys the per-device-type grouping.
    pub name: String,
    pub kind: DeviceKind,
    /// Memory per device unit in GB.
    pub memory_gb: f64,
    /// HBM bandwidth in GB/s.
    pub hbm_bandwidth_gb_s: f64,
    /// Intra-node interconnect bandwidth in GB/s (NVLink-class).
    pub intra_node_bandwidth_gb_s: f64,
    /// Inter-node network bandwidth in GB/s.
    pub inter_node_bandwidth_gb_s: f64,
    /// Peak dense compute in TFLOPS.
    pub peak_tflops: f64,
    /// Purchase price in USD; zero means "look up by name".
    #[serde(default)]
    pub purchase_price_usd: f64,
    /// Units of this device available on the node.
    pub available_count: u32,
}

impl DeviceSpec {
    /// Build a spec from a catalog profile.
    pub fn from_profile(name: &str, profile: &AcceleratorProfile, count: u32) -> Self {
        let kind = match profile {
            AcceleratorProfile::CpuHost => DeviceKind::Cpu,
            AcceleratorProfile::Gaudi2 => DeviceKind::Hpu,
            _ => DeviceKind::Cuda,
        };
        Self {
            name: name.to_string(),
            kind,
            memory_gb: profile.memory_gb(),
            hbm_bandwidth_gb_s: profile.hbm_bandwidth_gb_s(),
            intra_node_bandwidth_gb_s: match kind {
                DeviceKind::Cpu => 50.0,
                _ => 450.0,
            },
            inter_node_bandwidth_gb_s: 25.0,
            peak_tflops: profile.peak_tflops(),
            purchase_price_usd: profile.purchase_price_usd(),
            available_count: count,
        }
    }
}

/// One node and the devices it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTopology {
    pub node: String,
    pub devices: Vec<DeviceSpec>,
}

/// Aggregated view of one device type across the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTypeGroup {
    /// Representative spec (first seen; specs of one type are uniform).
    pub device: DeviceSpec,
    /// Total units across all nodes.
    pub total_devices: u32,
    /// Largest unit count on any single node; bounds TP.
    pub max_devices_per_node: u32,
    /// Nodes carrying at least one unit; bounds PP.
    pub nodes_with_device: u32,
    /// Per-node unit counts, in node order.
    pub node_distribution: Vec<(String, u32)>,
}

/// The full cluster: nodes plus the device-type aggregation.
///
/// Built once per optimization run and read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub nodes: Vec<NodeTopology>,
    groups: BTreeMap<String, DeviceTypeGroup>,
}

impl ClusterTopology {
    /// Aggregate nodes into per-device-type groups.
    pub fn from_nodes(nodes: Vec<NodeTopology>) -> Self {
        let mut groups: BTreeMap<String, DeviceTypeGroup> = BTreeMap::new();
        for node in &nodes {
            for device in &node.devices {
                if device.available_count == 0 {
                    continue;
                }
                let entry = groups
                    .entry(device.name.clone())
                    .or_insert_with(|| DeviceTypeGroup {
                        device: device.clone(),
                        total_devices: 0,
                        max_devices_per_node: 0,
                        nodes_with_device: 0,
                        node_distribution: Vec::new(),
                    });
                entry.total_devices += device.available_count;
                entry.max_devices_per_node =
                    entry.max_devices_per_node.max(device.available_count);
                entry.nodes_with_device += 1;
                entry
                    .node_distribution
                    .push((node.node.clone(), device.available_count));
            }
        }
        Self { nodes, groups }
    }

    /// Device types present in the cluster, in deterministic (name) order.
    pub fn device_types(&self) -> impl Iterator<Item = (&String, &DeviceTypeGroup)> {
        self.groups.iter()
    }

    pub fn group(&self, device_type: &str) -> Option<&DeviceTypeGroup> {
        self.groups.get(device_type)
    }

    /// Total devices of any type across the cluster.
    pub fn total_devices(&self) -> u32 {
        self.groups.values().map(|g| g.total_devices).sum()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn two_node_cluster() -> ClusterTopology {
        let h100 = DeviceSpec::from_profile("h100", &AcceleratorProfile::H100Sxm, 8);
        let l40s = DeviceSpec::from_profile("l40s", &AcceleratorProfile::L40S, 4);
        ClusterTopology::from_nodes(vec![
            NodeTopology {
                node: "node-0".to_string(),
                devices: vec![h100.clone()],
            },
            NodeTopology {
                node: "node-1".to_string(),
                devices: vec![h100, l40s],
            },
        ])
    }

    #[test]
    fn test_profile_lookup() {
        assert_eq!(
            AcceleratorProfile::by_name("H100"),
            Some(AcceleratorProfile::H100Sxm)
        );
        assert!(AcceleratorProfile::by_name("tpu-v5").is_none());
    }

    #[test]
    fn test_profile_memory() {
        assert_eq!(AcceleratorProfile::H100Sxm.memory_gb(), 80.0);
        assert_eq!(AcceleratorProfile::L40S.memory_gb(), 48.0);
    }

    #[test]
    fn test_grouping() {
        let cluster = two_node_cluster();
        let h100 = cluster.group("h100").unwrap();
        assert_eq!(h100.total_devices, 16);
        assert_eq!(h100.max_devices_per_node, 8);
        assert_eq!(h100.nodes_with_device, 2);

        let l40s = cluster.group("l40s").unwrap();
        assert_eq!(l40s.total_devices, 4);
        assert_eq!(l40s.nodes_with_device, 1);
    }

    #[test]
    fn test_zero_count_devices_excluded() {
        let mut spec = DeviceSpec::from_profile("h100", &AcceleratorProfile::H100Sxm, 0);
        spec.available_count = 0;
        let cluster = ClusterTopology::from_nodes(vec![NodeTopology {
            node: "node-0".to_string(),
            devices: vec![spec],
        }]);
        assert!(cluster.group("h100").is_none());
        assert_eq!(cluster.total_devices(), 0);
    }

    #[test]
    fn test_device_types_ordered() {
        let cluster = two_node_cluster();
        let names: Vec<&String> = cluster.device_types().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["h100", "l40s"]);
    }

    #[test]
    fn test_cpu_kind_from_profile() {
        let spec = DeviceSpec::from_profile("cpu", &AcceleratorProfile::CpuHost, 2);
        assert_eq!(spec.kind, DeviceKind::Cpu);
    }
}
