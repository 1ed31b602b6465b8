//! TOML configuration parsing for inferplan.
//!
//! Defines the complete configuration schema for optimization runs:
//! model, workload shape, performance targets, search parameters, and
//! cluster inventory.

use crate::engine::EngineKind;
use crate::evaluate::{SearchTargets, WorkloadShape};
use crate::model::{ModelSpec, Precision};
use crate::orchestrator::OptimizeRequest;
use crate::topology::{
    AcceleratorProfile, ClusterTopology, DeviceSpec, HardwareMode, NodeTopology,
};
use inferplan_search::SearchLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Top-level optimization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub model: ModelSection,
    #[serde(default)]
    pub workload: WorkloadShape,
    #[serde(default)]
    pub targets: SearchTargets,
    #[serde(default)]
    pub search: SearchSection,
    pub cluster: ClusterSection,
}

/// Model selection: a preset name, or a fully custom architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Preset name ("llama-7b", "llama-13b", "llama-70b", "mistral-7b").
    pub preset: Option<String>,
    pub name: Option<String>,
    pub num_layers: Option<u32>,
    pub hidden_size: Option<u32>,
    pub num_heads: Option<u32>,
    pub num_kv_heads: Option<u32>,
    pub vocab_size: Option<u32>,
    pub intermediate_size: Option<u32>,
    pub max_seq_len: Option<u32>,
    #[serde(default)]
    pub precision: Precision,
}

/// Search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// Strategy name ("direct" or "evolution").
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Evaluation ceiling per (device type, engine) pair.
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: u64,
    /// Engines to consider.
    #[serde(default = "default_engines")]
    pub engines: Vec<String>,
    #[serde(default)]
    pub hardware_mode: HardwareMode,
    /// Directory holding regression artifacts; heuristic-only when unset.
    pub artifact_dir: Option<PathBuf>,
}

fn default_strategy() -> String {
    "direct".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_max_evaluations() -> u64 {
    200
}

fn default_engines() -> Vec<String> {
    vec!["vllm".to_string()]
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            seed: default_seed(),
            max_evaluations: default_max_evaluations(),
            engines: default_engines(),
            hardware_mode: HardwareMode::default(),
            artifact_dir: None,
        }
    }
}

/// Cluster inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    pub nodes: Vec<NodeSection>,
}

/// One node and the devices it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    pub name: String,
    pub devices: Vec<DeviceSection>,
}

/// One device entry: a known profile, or a fully custom accelerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Known profile name ("h100", "a100", "l40s", "gaudi2", "cpu").
    pub profile: Option<String>,
    /// Display name; defaults to the profile name.
    pub name: Option<String>,
    pub count: u32,
    pub memory_gb: Option<f64>,
    pub hbm_bandwidth_gb_s: Option<f64>,
    pub peak_tflops: Option<f64>,
    pub purchase_price_usd: Option<f64>,
}

impl PlanConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: PlanConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.preset.is_none() && self.model.num_layers.is_none() {
            return Err(ConfigError::Validation(
                "model needs either a preset or a full architecture".to_string(),
            ));
        }
        if let Some(preset) = &self.model.preset {
            if ModelSpec::preset(preset).is_none() {
                return Err(ConfigError::Validation(format!(
                    "unknown model preset: {preset}"
                )));
            }
        }
        if self.cluster.nodes.is_empty() {
            return Err(ConfigError::Validation(
                "cluster must define at least one node".to_string(),
            ));
        }
        for node in &self.cluster.nodes {
            for device in &node.devices {
                if device.count == 0 {
                    return Err(ConfigError::Validation(format!(
                        "device count on node {} must be > 0",
                        node.name
                    )));
                }
                match &device.profile {
                    Some(profile) if AcceleratorProfile::by_name(profile).is_none() => {
                        return Err(ConfigError::Validation(format!(
                            "unknown accelerator profile: {profile}"
                        )));
                    }
                    None if device.memory_gb.is_none()
                        || device.hbm_bandwidth_gb_s.is_none()
                        || device.peak_tflops.is_none()
                        || device.purchase_price_usd.is_none() =>
                    {
                        return Err(ConfigError::Validation(format!(
                            "custom device on node {} needs memory_gb, \
                             hbm_bandwidth_gb_s, peak_tflops, purchase_price_usd",
                            node.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        for engine in &self.search.engines {
            if EngineKind::by_name(engine).is_none() {
                return Err(ConfigError::Validation(format!(
                    "unknown engine: {engine}"
                )));
            }
        }
        if self.search.engines.is_empty() {
            return Err(ConfigError::Validation(
                "search needs at least one engine".to_string(),
            ));
        }
        if self.search.max_evaluations == 0 {
            return Err(ConfigError::Validation(
                "max_evaluations must be > 0".to_string(),
            ));
        }
        if self.targets.error_threshold < 0.0 {
            return Err(ConfigError::Validation(
                "error_threshold must be >= 0".to_string(),
            ));
        }
        if self.targets.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the model section to a concrete spec.
    pub fn model_spec(&self) -> Result<ModelSpec, ConfigError> {
        if let Some(preset) = &self.model.preset {
            return ModelSpec::preset(preset).ok_or_else(|| {
                ConfigError::Validation(format!("unknown model preset: {preset}"))
            });
        }
        let field = |value: Option<u32>, name: &str| {
            value.ok_or_else(|| ConfigError::Validation(format!("model.{name} is required")))
        };
        Ok(ModelSpec {
            name: self
                .model
                .name
                .clone()
                .unwrap_or_else(|| "custom".to_string()),
            num_layers: field(self.model.num_layers, "num_layers")?,
            hidden_size: field(self.model.hidden_size, "hidden_size")?,
            num_heads: field(self.model.num_heads, "num_heads")?,
            num_kv_heads: field(self.model.num_kv_heads, "num_kv_heads")?,
            vocab_size: field(self.model.vocab_size, "vocab_size")?,
            intermediate_size: field(self.model.intermediate_size, "intermediate_size")?,
            max_seq_len: self.model.max_seq_len.unwrap_or(8192),
        })
    }

    /// Build the cluster topology from the inventory section.
    pub fn cluster_topology(&self) -> Result<ClusterTopology, ConfigError> {
        let mut nodes = Vec::with_capacity(self.cluster.nodes.len());
        for node in &self.cluster.nodes {
            let mut devices = Vec::with_capacity(node.devices.len());
            for device in &node.devices {
                let spec = match &device.profile {
                    Some(profile) => {
                        let accel = AcceleratorProfile::by_name(profile).ok_or_else(|| {
                            ConfigError::Validation(format!(
                                "unknown accelerator profile: {profile}"
                            ))
                        })?;
                        let name = device.name.clone().unwrap_or_else(|| profile.clone());
                        DeviceSpec::from_profile(&name, &accel, device.count)
                    }
                    None => {
                        let custom = AcceleratorProfile::Custom {
                            memory_gb: device.memory_gb.unwrap_or_default(),
                            hbm_bandwidth_gb_s: device.hbm_bandwidth_gb_s.unwrap_or_default(),
                            peak_tflops: device.peak_tflops.unwrap_or_default(),
                            purchase_price_usd: device.purchase_price_usd.unwrap_or_default(),
                        };
                        let name = device
                            .name
                            .clone()
                            .unwrap_or_else(|| "custom".to_string());
                        DeviceSpec::from_profile(&name, &custom, device.count)
                    }
                };
                devices.push(spec);
            }
            nodes.push(NodeTopology {
                node: node.name.clone(),
                devices,
            });
        }
        Ok(ClusterTopology::from_nodes(nodes))
    }

    /// Assemble the orchestrator request from the parsed sections.
    pub fn optimize_request(&self) -> Result<OptimizeRequest, ConfigError> {
        let engines = self
            .search
            .engines
            .iter()
            .map(|name| {
                EngineKind::by_name(name)
                    .ok_or_else(|| ConfigError::Validation(format!("unknown engine: {name}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OptimizeRequest {
            model: self.model_spec()?,
            precision: self.model.precision,
            engines,
            targets: self.targets,
            workload: self.workload,
            mode: self.search.hardware_mode,
            strategy: self.search.strategy.clone(),
            seed: self.search.seed,
            limits: SearchLimits {
                max_evaluations: self.search.max_evaluations,
            },
            artifact_dir: self.search.artifact_dir.clone(),
        })
    }
}
