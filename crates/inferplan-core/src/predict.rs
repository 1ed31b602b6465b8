//! Performance predictors.
//!
//! Two interchangeable predictors sit behind [`PerformancePredictor`]:
//!
//! | Predictor               | Source of truth                              |
//! |-------------------------|----------------------------------------------|
//! | [`HeuristicPredictor`]  | Roofline estimate from model/device specs    |
//! | [`RegressionPredictor`] | Fitted pipelines loaded from JSON artifacts  |
//!
//! The regression predictor expects one artifact per (engine, device type)
//! pair named `<engine>_<device>.json`, each carrying three fitted linear
//! pipelines (TTFT, per-user throughput, end-to-end latency). When an
//! artifact is missing it can optionally fall back to the heuristic.

use crate::engine::EngineConfig;
use crate::error::SearchError;
use crate::model::{analyze_model, ModelAnalysis, ModelSpec};
use crate::topology::DeviceSpec;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Predicted serving performance for one configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub ttft_ms: f64,
    /// Decode tokens per second seen by a single user at this concurrency.
    pub throughput_per_user: f64,
    pub e2e_latency_s: f64,
}

pub trait PerformancePredictor: Send + Sync {
    fn predict(
        &self,
        config: &EngineConfig,
        model: &ModelSpec,
        device: &DeviceSpec,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<Prediction, SearchError>;

    fn name(&self) -> &str;
}

/// Fraction of peak FLOPs actually sustained during batched prefill.
const PREFILL_MFU: f64 = 0.55;
/// Fraction of peak HBM bandwidth sustained during decode weight streaming.
const DECODE_BANDWIDTH_UTIL: f64 = 0.8;
/// Added prefill interference per extra concurrent request.
const PREFILL_INTERFERENCE: f64 = 0.04;
/// Tensor-parallel efficiency loss per extra shard.
const TP_EFFICIENCY_LOSS: f64 = 0.05;

/// Closed-form roofline estimator. Prefill is compute-bound; decode is
/// bound by the slower of weight/KV streaming and batched compute.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPredictor;

impl HeuristicPredictor {
    fn estimate(
        &self,
        config: &EngineConfig,
        analysis: &ModelAnalysis,
        device: &DeviceSpec,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Prediction {
        let tp = config.tensor_parallel.max(1) as f64;
        let pp = config.pipeline_parallel.max(1) as f64;
        let batch = config.concurrency.max(1) as f64;
        let input = input_tokens as f64;
        let output = output_tokens as f64;

        let tp_efficiency = 1.0 - TP_EFFICIENCY_LOSS * (tp - 1.0);
        let group_flops = device.peak_tflops * 1e12 * tp * tp_efficiency.max(0.2);
        let group_bandwidth = device.hbm_bandwidth_gb_s * 1e9 * tp * DECODE_BANDWIDTH_UTIL;

        // Pipeline stages run a single request's prefill sequentially, so
        // pp does not shorten TTFT; it only adds activation transfers.
        let prefill_compute_s =
            input * analysis.prefill_flops_per_token / (group_flops * PREFILL_MFU);
        let tp_comm_s = if config.tensor_parallel > 1 {
            input * analysis.tp_comm_bytes_per_token / (device.intra_node_bandwidth_gb_s * 1e9)
        } else {
            0.0
        };
        let pp_comm_s = if config.pipeline_parallel > 1 {
            (pp - 1.0) * input * analysis.pp_comm_bytes_per_token
                / (device.inter_node_bandwidth_gb_s * 1e9)
        } else {
            0.0
        };
        let interference = 1.0 + PREFILL_INTERFERENCE * (batch - 1.0);
        let ttft_s = (prefill_compute_s + tp_comm_s + pp_comm_s) * interference;

        // Decode step: every resident request produces one token. Weight
        // streaming is shared across the batch; KV reads are per request.
        let weight_stream_s = analysis.weight_bytes / pp / group_bandwidth;
        let mean_context = input + output / 2.0;
        let kv_stream_s =
            batch * mean_context * analysis.kv_bytes_per_token / pp / group_bandwidth;
        let decode_compute_s = batch * analysis.decode_flops_per_token / group_flops;
        let step_tp_comm_s = if config.tensor_parallel > 1 {
            analysis.tp_comm_bytes_per_token / (device.intra_node_bandwidth_gb_s * 1e9)
        } else {
            0.0
        };
        let step_s = (weight_stream_s + kv_stream_s).max(decode_compute_s) + step_tp_comm_s;

        let scale = config.precision.throughput_scale();
        let throughput_per_user = scale / step_s;
        let ttft_ms = ttft_s / scale * 1000.0;
        let e2e_latency_s = ttft_s / scale + output * step_s / scale;

        Prediction {
            ttft_ms,
            throughput_per_user,
            e2e_latency_s,
        }
    }
}

impl PerformancePredictor for HeuristicPredictor {
    fn predict(
        &self,
        config: &EngineConfig,
        model: &ModelSpec,
        device: &DeviceSpec,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<Prediction, SearchError> {
        let analysis = analyze_model(model, config.precision);
        Ok(self.estimate(config, &analysis, device, input_tokens, output_tokens))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// One fitted linear pipeline: standard-scaled features into a dot product.
#[derive(Debug, Clone, Deserialize)]
pub struct RegressionPipeline {
    pub features: Vec<String>,
    pub scaler_mean: Vec<f64>,
    pub scaler_std: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl RegressionPipeline {
    /// Evaluate the pipeline against a named feature map.
    pub fn predict(&self, features: &HashMap<&'static str, f64>) -> Result<f64, SearchError> {
        let mut acc = self.intercept;
        for (i, name) in self.features.iter().enumerate() {
            let raw = *features
                .get(name.as_str())
                .ok_or_else(|| SearchError::MissingFeature {
                    feature: name.clone(),
                })?;
            let std = self.scaler_std.get(i).copied().unwrap_or(1.0);
            let mean = self.scaler_mean.get(i).copied().unwrap_or(0.0);
            let scaled = if std.abs() > f64::EPSILON {
                (raw - mean) / std
            } else {
                raw - mean
            };
            acc += scaled * self.coefficients.get(i).copied().unwrap_or(0.0);
        }
        Ok(acc)
    }
}

/// The three pipelines stored in one artifact file.
#[derive(Debug, Clone, Deserialize)]
pub struct RegressionArtifact {
    pub ttft: RegressionPipeline,
    pub throughput: RegressionPipeline,
    pub e2e: RegressionPipeline,
}

const ARTIFACT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lazily loads and caches regression artifacts from a directory.
pub struct RegressionStore {
    dir: PathBuf,
    loaded: Mutex<HashMap<(String, String), Arc<RegressionArtifact>>>,
}

impl RegressionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the artifact for an (engine, device type) pair, loading it from
    /// `<engine>_<device>.json` on first use.
    pub fn get(
        &self,
        engine: &str,
        device_type: &str,
    ) -> Result<Arc<RegressionArtifact>, SearchError> {
        let key = (engine.to_string(), device_type.to_string());
        let mut guard = self.loaded.try_lock_for(ARTIFACT_LOCK_TIMEOUT).ok_or(
            SearchError::ArtifactLockTimeout {
                engine: engine.to_string(),
                device_type: device_type.to_string(),
            },
        )?;
        if let Some(artifact) = guard.get(&key) {
            return Ok(Arc::clone(artifact));
        }
        let path = self.dir.join(format!("{engine}_{device_type}.json"));
        if !path.is_file() {
            return Err(SearchError::PredictionUnavailable {
                engine: engine.to_string(),
                device_type: device_type.to_string(),
            });
        }
        let raw = std::fs::read_to_string(&path)?;
        let artifact: RegressionArtifact = serde_json::from_str(&raw)?;
        debug!(engine, device_type, path = %path.display(), "loaded regression artifact");
        let artifact = Arc::new(artifact);
        guard.insert(key, Arc::clone(&artifact));
        Ok(artifact)
    }
}

/// Predictor backed by fitted regression pipelines, with an optional
/// heuristic fallback for pairs that have no artifact yet.
pub struct RegressionPredictor {
    store: Arc<RegressionStore>,
    fallback: Option<HeuristicPredictor>,
}

impl RegressionPredictor {
    pub fn new(store: Arc<RegressionStore>) -> Self {
        Self {
            store,
            fallback: None,
        }
    }

    pub fn with_heuristic_fallback(mut self) -> Self {
        self.fallback = Some(HeuristicPredictor);
        self
    }

    fn feature_map(
        config: &EngineConfig,
        analysis: &ModelAnalysis,
        device: &DeviceSpec,
        input_tokens: u32,
        output_tokens: u32,
    ) -> HashMap<&'static str, f64> {
        let mut map = HashMap::new();
        map.insert("input_tokens", input_tokens as f64);
        map.insert("output_tokens", output_tokens as f64);
        map.insert("concurrency", config.concurrency as f64);
        map.insert("tensor_parallel", config.tensor_parallel as f64);
        map.insert("pipeline_parallel", config.pipeline_parallel as f64);
        map.insert("block_size", config.block_size as f64);
        map.insert("total_params", analysis.total_params as f64);
        map.insert("weight_bytes", analysis.weight_bytes);
        map.insert("kv_bytes_per_token", analysis.kv_bytes_per_token);
        map.insert("prefill_flops_per_token", analysis.prefill_flops_per_token);
        map.insert("decode_flops_per_token", analysis.decode_flops_per_token);
        map.insert("hbm_bandwidth_gb_s", device.hbm_bandwidth_gb_s);
        map.insert("peak_tflops", device.peak_tflops);
        map
    }
}

impl PerformancePredictor for RegressionPredictor {
    fn predict(
        &self,
        config: &EngineConfig,
        model: &ModelSpec,
        device: &DeviceSpec,
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<Prediction, SearchError> {
        let artifact = match self.store.get(config.engine.name(), &config.device_type) {
            Ok(artifact) => artifact,
            Err(err @ SearchError::PredictionUnavailable { .. }) => {
                if let Some(fallback) = &self.fallback {
                    warn!(
                        engine = config.engine.name(),
                        device_type = %config.device_type,
                        "no regression artifact, falling back to heuristic"
                    );
                    return fallback.predict(config, model, device, input_tokens, output_tokens);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let analysis = analyze_model(model, config.precision);
        let features =
            Self::feature_map(config, &analysis, device, input_tokens, output_tokens);
        let scale = config.precision.throughput_scale();
        let ttft_ms = artifact.ttft.predict(&features)? / scale;
        let throughput_per_user = artifact.throughput.predict(&features)? * scale;
        let e2e_latency_s = artifact.e2e.predict(&features)? / scale;
        Ok(Prediction {
            ttft_ms: ttft_ms.max(0.0),
            throughput_per_user: throughput_per_user.max(0.0),
            e2e_latency_s: e2e_latency_s.max(0.0),
        })
    }

    fn name(&self) -> &str {
        "regression"
    }
}
