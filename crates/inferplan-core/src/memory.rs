//! Memory feasibility validation.
//!
//! Decides whether a (TP, PP, concurrency) configuration fits in device
//! memory, returning a weights / KV-cache / activations breakdown. TP shards
//! the whole footprint across devices; PP replicates each stage's weights
//! and KV on its node and only pipelines activations, so only the activation
//! component divides by PP.

use crate::model::{analyze_model, ModelAnalysis, ModelSpec, Precision};
use serde::{Deserialize, Serialize};

/// Fraction of post-buffer memory a config may occupy.
const HEADROOM: f64 = 0.95;
/// Safety buffer in GB for small configurations (required <= 10 GB).
const SMALL_BUFFER_GB: f64 = 1.0;
/// Safety buffer in GB for larger configurations.
const LARGE_BUFFER_GB: f64 = 2.0;

/// Per-device memory footprint components, in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub weights_gb: f64,
    pub kv_cache_gb: f64,
    pub activations_gb: f64,
}

/// Result of a memory feasibility check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCheck {
    pub valid: bool,
    /// Required per-device memory in GB.
    pub total_memory_gb: f64,
    pub breakdown: MemoryBreakdown,
    pub message: String,
}

/// The deployment shape being checked.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRequest {
    pub seq_len: u32,
    pub batch_size: u32,
    pub tensor_parallel: u32,
    pub pipeline_parallel: u32,
    pub available_memory_gb: f64,
    pub precision: Precision,
}

/// Stateless memory validator.
pub struct MemoryValidator;

impl MemoryValidator {
    /// Check whether the configuration fits in per-device memory.
    pub fn validate(model: &ModelSpec, req: &MemoryRequest) -> MemoryCheck {
        let analysis = analyze_model(model, req.precision);
        Self::validate_analysis(&analysis, req)
    }

    /// Same check from a precomputed analysis.
    pub fn validate_analysis(analysis: &ModelAnalysis, req: &MemoryRequest) -> MemoryCheck {
        Self::check(analysis, req, 0.0)
    }

    fn check(analysis: &ModelAnalysis, req: &MemoryRequest, extra_weight_gb: f64) -> MemoryCheck {
        let tp = req.tensor_parallel.max(1) as f64;
        let pp = req.pipeline_parallel.max(1) as f64;
        let tokens = req.seq_len as f64 * req.batch_size as f64;

        let weights_total_gb = analysis.weight_bytes / 1e9 + extra_weight_gb;
        let kv_total_gb = analysis.kv_bytes_per_token * tokens / 1e9;
        let activations_total_gb = analysis.activation_bytes_per_token * tokens / 1e9;

        let breakdown = MemoryBreakdown {
            weights_gb: weights_total_gb / tp,
            kv_cache_gb: kv_total_gb / tp,
            activations_gb: activations_total_gb / (tp * pp),
        };
        let required =
            breakdown.weights_gb + breakdown.kv_cache_gb + breakdown.activations_gb;

        let buffer = if required <= 10.0 {
            SMALL_BUFFER_GB
        } else {
            LARGE_BUFFER_GB
        };
        let usable = (req.available_memory_gb - buffer) * HEADROOM;
        let valid = required < usable;

        let message = if valid {
            format!(
                "fits: {:.1} GB required of {:.1} GB usable",
                required, usable
            )
        } else {
            format!(
                "insufficient memory: {:.1} GB required, {:.1} GB usable \
                 ({:.1} GB available minus {:.0} GB buffer at {:.0}% headroom)",
                required,
                usable,
                req.available_memory_gb,
                buffer,
                HEADROOM * 100.0
            )
        };

        MemoryCheck {
            valid,
            total_memory_gb: required,
            breakdown,
            message,
        }
    }

    /// Largest number of concurrently loadable LoRA adapters, via binary
    /// search between `min_guess` and `initial_guess`.
    ///
    /// Returns `initial_guess` unchanged when it already fits (no search
    /// needed) and `None` when even `min_guess` does not fit, meaning the
    /// configuration is unusable for LoRA serving.
    pub fn find_optimal_max_loras(
        model: &ModelSpec,
        req: &MemoryRequest,
        max_lora_rank: u32,
        initial_guess: u32,
        min_guess: u32,
    ) -> Option<u32> {
        let analysis = analyze_model(model, req.precision);
        let adapter_gb = Self::lora_adapter_gb(model, max_lora_rank);
        let fits =
            |count: u32| Self::check(&analysis, req, count as f64 * adapter_gb).valid;

        // A floor above the ceiling would break the lo < hi invariant of
        // the bisection below.
        let initial_guess = initial_guess.max(min_guess);
        if fits(initial_guess) {
            return Some(initial_guess);
        }
        if !fits(min_guess) {
            return None;
        }

        // Invariant: lo fits, hi does not.
        let mut lo = min_guess;
        let mut hi = initial_guess;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Some(lo)
    }

    /// Memory for one adapter: rank-decomposed A/B pairs on the four
    /// attention projections of every layer, 16-bit.
    fn lora_adapter_gb(model: &ModelSpec, rank: u32) -> f64 {
        let per_projection = 2.0 * model.hidden_size as f64 * rank as f64;
        4.0 * model.num_layers as f64 * per_projection * 2.0 / 1e9
    }
}
