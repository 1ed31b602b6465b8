//! Serving-engine families and engine argument generation.
//!
//! Engines are a closed, tagged union rather than free-form key/value maps:
//! each variant knows its own capability flags and how to render an
//! [`EngineConfig`] into CLI arguments and environment variables, so a
//! missing required field is a compile error instead of a runtime surprise.

use crate::model::Precision;
use crate::topology::DeviceKind;
use serde::{Deserialize, Serialize};

/// Supported serving-engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Vllm,
    Sglang,
    LlamaCpp,
}

impl EngineKind {
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "vllm" => Some(Self::Vllm),
            "sglang" => Some(Self::Sglang),
            "llama-cpp" | "llamacpp" | "llama.cpp" => Some(Self::LlamaCpp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vllm => "vllm",
            Self::Sglang => "sglang",
            Self::LlamaCpp => "llama-cpp",
        }
    }

    /// Whether the engine can split layers across nodes.
    pub fn supports_pipeline_parallel(&self) -> bool {
        match self {
            Self::Vllm => true,
            Self::Sglang => false,
            Self::LlamaCpp => false,
        }
    }

    /// Device kinds the engine can drive.
    pub fn supports_device(&self, kind: DeviceKind) -> bool {
        match self {
            Self::Vllm => matches!(kind, DeviceKind::Cuda | DeviceKind::Cpu | DeviceKind::Hpu),
            Self::Sglang => matches!(kind, DeviceKind::Cuda),
            Self::LlamaCpp => matches!(kind, DeviceKind::Cuda | DeviceKind::Cpu),
        }
    }
}

/// One concrete serving configuration: the unit being searched and deployed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineKind,
    pub device_type: String,
    pub model_name: String,
    pub tensor_parallel: u32,
    pub pipeline_parallel: u32,
    pub concurrency: u32,
    pub precision: Precision,
    /// KV-cache block size in tokens.
    pub block_size: u32,
    pub scheduler_delay_factor: f64,
    pub enable_chunked_prefill: bool,
}

impl EngineConfig {
    /// Cache/dedup key: only the fields that affect feasibility and
    /// predicted performance.
    pub fn cache_key(&self) -> (u32, u32, u32) {
        (
            self.tensor_parallel,
            self.pipeline_parallel,
            self.concurrency,
        )
    }

    /// Render engine CLI arguments for this configuration.
    pub fn to_args(&self) -> Vec<String> {
        match self.engine {
            EngineKind::Vllm => {
                let mut args = vec![
                    "--model".to_string(),
                    self.model_name.clone(),
                    "--tensor-parallel-size".to_string(),
                    self.tensor_parallel.to_string(),
                    "--pipeline-parallel-size".to_string(),
                    self.pipeline_parallel.to_string(),
                    "--max-num-seqs".to_string(),
                    self.concurrency.to_string(),
                    "--block-size".to_string(),
                    self.block_size.to_string(),
                ];
                if self.scheduler_delay_factor > 0.0 {
                    args.push("--scheduler-delay-factor".to_string());
                    args.push(format!("{:.2}", self.scheduler_delay_factor));
                }
                if self.enable_chunked_prefill {
                    args.push("--enable-chunked-prefill".to_string());
                }
                if self.precision != Precision::Bf16 {
                    args.push("--quantization".to_string());
                    args.push(
                        match self.precision {
                            Precision::Int8 => "int8",
                            Precision::Int4 => "awq",
                            Precision::Bf16 => unreachable!(),
                        }
                        .to_string(),
                    );
                }
                args
            }
            EngineKind::Sglang => vec![
                "--model-path".to_string(),
                self.model_name.clone(),
                "--tp-size".to_string(),
                self.tensor_parallel.to_string(),
                "--max-running-requests".to_string(),
                self.concurrency.to_string(),
            ],
            EngineKind::LlamaCpp => vec![
                "--model".to_string(),
                self.model_name.clone(),
                "--parallel".to_string(),
                self.concurrency.to_string(),
                "--split-mode".to_string(),
                if self.tensor_parallel > 1 {
                    "row".to_string()
                } else {
                    "none".to_string()
                },
            ],
        }
    }

    /// Environment variables for this configuration.
    pub fn to_envs(&self) -> Vec<(String, String)> {
        match self.engine {
            EngineKind::Vllm => vec![(
                "VLLM_WORKER_MULTIPROC_METHOD".to_string(),
                "spawn".to_string(),
            )],
            EngineKind::Sglang => Vec::new(),
            EngineKind::LlamaCpp => vec![(
                "GGML_N_THREADS".to_string(),
                num_threads_hint(self.tensor_parallel).to_string(),
            )],
        }
    }
}

fn num_threads_hint(tensor_parallel: u32) -> u32 {
    8 * tensor_parallel.max(1)
}
