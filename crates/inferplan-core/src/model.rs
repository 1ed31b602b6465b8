//! Model architecture description and analytical cost modeling.
//!
//! [`analyze_model`] is a pure function from (model, precision) to parameter
//! counts, per-phase FLOPs, memory footprints, and parallelism communication
//! volumes. Both predictors and the memory validator derive their numbers
//! from it; nothing here holds mutable state.

use serde::{Deserialize, Serialize};

/// Numeric precision of the deployed weights.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Bf16,
    Int8,
    Int4,
}

impl Precision {
    /// Bytes per weight parameter.
    pub fn bytes_per_param(&self) -> f64 {
        match self {
            Precision::Bf16 => 2.0,
            Precision::Int8 => 1.0,
            Precision::Int4 => 0.5,
        }
    }

    /// Throughput gain relative to bf16. TTFT and end-to-end latency scale
    /// by the inverse.
    pub fn throughput_scale(&self) -> f64 {
        match self {
            Precision::Bf16 => 1.0,
            Precision::Int8 => 1.3,
            Precision::Int4 => 1.5,
        }
    }
}

/// Transformer architecture parameters for the model being served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub num_layers: u32,
    pub hidden_size: u32,
    pub num_heads: u32,
    /// Grouped-query attention KV head count (== num_heads for MHA).
    pub num_kv_heads: u32,
    pub vocab_size: u32,
    pub intermediate_size: u32,
    pub max_seq_len: u32,
}

impl ModelSpec {
    /// Look up a named architecture preset.
    pub fn preset(name: &str) -> Option<Self> {
        let (layers, hidden, heads, kv_heads, intermediate) =
            match name.to_ascii_lowercase().as_str() {
                "llama-7b" | "7b" => (32, 4096, 32, 32, 11008),
                "llama-13b" | "13b" => (40, 5120, 40, 40, 13824),
                "llama-70b" | "70b" => (80, 8192, 64, 8, 28672),
                "mistral-7b" => (32, 4096, 32, 8, 14336),
                _ => return None,
            };
        Some(Self {
            name: name.to_string(),
            num_layers: layers,
            hidden_size: hidden,
            num_heads: heads,
            num_kv_heads: kv_heads,
            vocab_size: 32_000,
            intermediate_size: intermediate,
            max_seq_len: 8192,
        })
    }

    pub fn head_dim(&self) -> u32 {
        self.hidden_size / self.num_heads.max(1)
    }

    /// Total parameter count from the architecture.
    ///
    /// Per layer: attention (q + o full, k + v at KV-head width) plus a
    /// gated MLP (3 projections), plus embeddings and the LM head.
    pub fn param_count(&self) -> u64 {
        let h = self.hidden_size as u64;
        let kv_h = (self.num_kv_heads as u64 * self.head_dim() as u64).max(1);
        let inter = self.intermediate_size as u64;
        let attn = h * h * 2 + h * kv_h * 2;
        let mlp = h * inter * 3;
        let per_layer = attn + mlp;
        let embeddings = 2 * self.vocab_size as u64 * h;
        self.num_layers as u64 * per_layer + embeddings
    }
}

/// Analytical cost summary for one (model, precision) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAnalysis {
    pub total_params: u64,
    /// Weight bytes at the chosen precision.
    pub weight_bytes: f64,
    /// KV-cache bytes per token per request (all layers, both K and V).
    pub kv_bytes_per_token: f64,
    /// Activation bytes per token in flight.
    pub activation_bytes_per_token: f64,
    /// FLOPs to process one prompt token in prefill.
    pub prefill_flops_per_token: f64,
    /// FLOPs to generate one token in decode.
    pub decode_flops_per_token: f64,
    /// Bytes exchanged per token by tensor-parallel all-reduce per device.
    pub tp_comm_bytes_per_token: f64,
    /// Bytes crossing each pipeline-stage boundary per token.
    pub pp_comm_bytes_per_token: f64,
}

/// Pure analytical model; results are cheap enough that callers cache at the
/// evaluation level, not here.
pub fn analyze_model(model: &ModelSpec, precision: Precision) -> ModelAnalysis {
    let params = model.param_count();
    let weight_bytes = params as f64 * precision.bytes_per_param();

    // KV cache stays at 16-bit regardless of weight precision.
    let kv_bytes_per_token =
        2.0 * model.num_layers as f64 * model.num_kv_heads as f64 * model.head_dim() as f64 * 2.0;

    // Hidden state plus the MLP intermediate, 2 bytes each.
    let activation_bytes_per_token =
        (model.hidden_size as f64 + model.intermediate_size as f64) * 2.0;

    // The usual 2 FLOPs per parameter per token approximation.
    let flops_per_token = 2.0 * params as f64;

    // Two all-reduces (attention out, MLP out) of the hidden state per layer.
    let tp_comm_bytes_per_token = 2.0 * model.num_layers as f64 * model.hidden_size as f64 * 2.0;

    // One hidden-state transfer per stage boundary.
    let pp_comm_bytes_per_token = model.hidden_size as f64 * 2.0;

    ModelAnalysis {
        total_params: params,
        weight_bytes,
        kv_bytes_per_token,
        activation_bytes_per_token,
        prefill_flops_per_token: flops_per_token,
        decode_flops_per_token: flops_per_token,
        tp_comm_bytes_per_token,
        pp_comm_bytes_per_token,
    }
}
