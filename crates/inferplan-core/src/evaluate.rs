//! Candidate evaluation: memory gate, performance prediction, scoring.
//!
//! [`Evaluator`] is the bridge between the search strategies and the
//! domain: it turns a bare candidate into an [`EngineConfig`], rejects it
//! if the memory check fails, predicts performance, prices the result,
//! and scores it against the targets. Every verdict is cached by
//! `(tensor_parallel, pipeline_parallel, concurrency)` so strategies that
//! revisit a point pay nothing.

use crate::cost::cost_per_million_tokens;
use crate::engine::{EngineConfig, EngineKind};
use crate::memory::{MemoryBreakdown, MemoryRequest, MemoryValidator};
use crate::model::{ModelSpec, Precision};
use crate::predict::{PerformancePredictor, Prediction};
use crate::topology::{DeviceSpec, HardwareMode};
use inferplan_search::{CandidateConfig, CandidateEvaluator, Evaluation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Service-level objectives the search optimizes toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchTargets {
    /// Time to first token, milliseconds.
    #[serde(default = "default_ttft_ms")]
    pub ttft_ms: f64,
    /// Decode tokens per second per user.
    #[serde(default = "default_throughput")]
    pub throughput_per_user: f64,
    /// End-to-end request latency, seconds.
    #[serde(default = "default_e2e_s")]
    pub e2e_latency_s: f64,
    /// Mean relative overshoot tolerated before a config misses targets.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
    /// Upper bound on per-replica concurrency explored by the search.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_ttft_ms() -> f64 {
    2_000.0
}

fn default_throughput() -> f64 {
    10.0
}

fn default_e2e_s() -> f64 {
    60.0
}

fn default_error_threshold() -> f64 {
    0.1
}

fn default_max_concurrency() -> u32 {
    256
}

impl Default for SearchTargets {
    fn default() -> Self {
        Self {
            ttft_ms: default_ttft_ms(),
            throughput_per_user: default_throughput(),
            e2e_latency_s: default_e2e_s(),
            error_threshold: default_error_threshold(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl SearchTargets {
    /// Mean relative violation across the three objectives. Zero when all
    /// targets are met; grows linearly with overshoot.
    pub fn penalty(&self, prediction: &Prediction) -> f64 {
        let ttft = (prediction.ttft_ms / self.ttft_ms - 1.0).max(0.0);
        let e2e = (prediction.e2e_latency_s / self.e2e_latency_s - 1.0).max(0.0);
        let tput = (1.0 - prediction.throughput_per_user / self.throughput_per_user).max(0.0);
        (ttft + e2e + tput) / 3.0
    }
}

/// Request shape the predictions are evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkloadShape {
    #[serde(default = "default_input_tokens")]
    pub input_tokens: u32,
    #[serde(default = "default_output_tokens")]
    pub output_tokens: u32,
}

fn default_input_tokens() -> u32 {
    1024
}

fn default_output_tokens() -> u32 {
    256
}

impl Default for WorkloadShape {
    fn default() -> Self {
        Self {
            input_tokens: default_input_tokens(),
            output_tokens: default_output_tokens(),
        }
    }
}

/// Full evaluation detail kept alongside the compact search-facing
/// [`Evaluation`], for reports and deployment plans.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub config: EngineConfig,
    pub ttft_ms: f64,
    pub throughput_per_user: f64,
    pub e2e_latency_s: f64,
    pub cost_per_million_tokens: f64,
    pub penalty: f64,
    pub meets_targets: bool,
    pub memory: MemoryBreakdown,
    pub total_memory_gb: f64,
}

type CacheKey = (u32, u32, u32);

/// Per-(device type, engine) evaluator with memoized verdicts.
pub struct Evaluator {
    engine: EngineKind,
    device: DeviceSpec,
    model: ModelSpec,
    precision: Precision,
    targets: SearchTargets,
    workload: WorkloadShape,
    mode: HardwareMode,
    predictor: Arc<dyn PerformancePredictor>,
    cache: HashMap<CacheKey, Option<Evaluation>>,
    records: HashMap<CacheKey, EvaluationRecord>,
    steps: u64,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: EngineKind,
        device: DeviceSpec,
        model: ModelSpec,
        precision: Precision,
        targets: SearchTargets,
        workload: WorkloadShape,
        mode: HardwareMode,
        predictor: Arc<dyn PerformancePredictor>,
    ) -> Self {
        Self {
            engine,
            device,
            model,
            precision,
            targets,
            workload,
            mode,
            predictor,
            cache: HashMap::new(),
            records: HashMap::new(),
            steps: 0,
        }
    }

    fn engine_config(&self, candidate: &CandidateConfig) -> EngineConfig {
        EngineConfig {
            engine: self.engine,
            device_type: self.device.name.clone(),
            model_name: self.model.name.clone(),
            tensor_parallel: candidate.tensor_parallel,
            pipeline_parallel: candidate.pipeline_parallel,
            concurrency: candidate.concurrency,
            precision: self.precision,
            block_size: candidate.block_size,
            scheduler_delay_factor: candidate.scheduler_delay_factor,
            enable_chunked_prefill: candidate.enable_chunked_prefill,
        }
    }

    fn evaluate_uncached(&mut self, candidate: &CandidateConfig) -> Option<Evaluation> {
        let config = self.engine_config(candidate);
        let seq_len = self.workload.input_tokens + self.workload.output_tokens;
        let check = MemoryValidator::validate(
            &self.model,
            &MemoryRequest {
                seq_len,
                batch_size: candidate.concurrency,
                tensor_parallel: candidate.tensor_parallel,
                pipeline_parallel: candidate.pipeline_parallel,
                available_memory_gb: self.device.memory_gb,
                precision: self.precision,
            },
        );
        if !check.valid {
            trace!(
                tp = candidate.tensor_parallel,
                pp = candidate.pipeline_parallel,
                concurrency = candidate.concurrency,
                required_gb = check.total_memory_gb,
                "memory check rejected candidate"
            );
            return None;
        }

        let prediction = match self.predictor.predict(
            &config,
            &self.model,
            &self.device,
            self.workload.input_tokens,
            self.workload.output_tokens,
        ) {
            Ok(prediction) => Some(prediction),
            Err(err) => {
                warn!(
                    engine = self.engine.name(),
                    device_type = %self.device.name,
                    error = %err,
                    "prediction failed for candidate"
                );
                None
            }
        };

        // On shared hardware the perf numbers are best-effort context:
        // fitting in memory is the acceptance criterion.
        let (prediction, penalty, meets_targets) = match (self.mode, prediction) {
            (HardwareMode::Shared, prediction) => {
                let prediction = prediction.unwrap_or(Prediction {
                    ttft_ms: 0.0,
                    throughput_per_user: 0.0,
                    e2e_latency_s: 0.0,
                });
                (prediction, 0.0, true)
            }
            (HardwareMode::Dedicated, Some(prediction)) => {
                let penalty = self.targets.penalty(&prediction);
                (prediction, penalty, penalty <= self.targets.error_threshold)
            }
            (HardwareMode::Dedicated, None) => return None,
        };

        let devices_per_replica = candidate.tensor_parallel * candidate.pipeline_parallel;
        let cost = cost_per_million_tokens(
            prediction.throughput_per_user,
            candidate.concurrency,
            &self.device,
            devices_per_replica,
        );

        let key = config.cache_key();
        self.records.insert(
            key,
            EvaluationRecord {
                config,
                ttft_ms: prediction.ttft_ms,
                throughput_per_user: prediction.throughput_per_user,
                e2e_latency_s: prediction.e2e_latency_s,
                cost_per_million_tokens: cost,
                penalty,
                meets_targets,
                memory: check.breakdown,
                total_memory_gb: check.total_memory_gb,
            },
        );

        Some(Evaluation {
            config: candidate.clone(),
            ttft_ms: prediction.ttft_ms,
            throughput_per_user: prediction.throughput_per_user,
            e2e_latency_s: prediction.e2e_latency_s,
            cost_per_million_tokens: cost,
            penalty,
            meets_targets,
            search_step: self.steps,
        })
    }

    /// Full record for a previously evaluated candidate.
    pub fn record(&self, candidate: &CandidateConfig) -> Option<&EvaluationRecord> {
        self.records.get(&(
            candidate.tensor_parallel,
            candidate.pipeline_parallel,
            candidate.concurrency,
        ))
    }
}

impl CandidateEvaluator for Evaluator {
    fn evaluate(&mut self, candidate: &CandidateConfig) -> Option<Evaluation> {
        let key = (
            candidate.tensor_parallel,
            candidate.pipeline_parallel,
            candidate.concurrency,
        );
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        self.steps += 1;
        let result = self.evaluate_uncached(candidate);
        self.cache.insert(key, result.clone());
        result
    }

    fn evaluations_used(&self) -> u64 {
        self.steps
    }
}
