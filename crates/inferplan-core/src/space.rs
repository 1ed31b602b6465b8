//! Search-space construction.
//!
//! Before any strategy runs, the candidate dimensions are narrowed to
//! what the hardware can actually host: tensor-parallel degrees start at
//! the smallest power of two whose shards fit the model on one node,
//! pipeline parallelism is only offered where the engine and device kind
//! support it, and shared hardware is clamped to single-device replicas.

use crate::engine::EngineKind;
use crate::error::SearchError;
use crate::memory::{MemoryRequest, MemoryValidator};
use crate::model::{analyze_model, ModelSpec, Precision};
use crate::topology::{DeviceKind, DeviceTypeGroup, HardwareMode};
use inferplan_search::SpaceView;
use tracing::debug;

/// Largest tensor-parallel degree ever probed.
const MAX_TP_PROBE: u32 = 32;
/// Spacing between explored concurrency levels.
const CONCURRENCY_STEP: u32 = 8;

/// Feasible candidate dimensions for one (device type, engine) pair.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub device_type: String,
    pub min_tensor_parallel: u32,
    view: SpaceView,
}

impl SearchSpace {
    /// Probe memory feasibility and assemble the explorable dimensions.
    ///
    /// Returns [`SearchError::InfeasibleModel`] when the model does not
    /// fit even at the largest tensor-parallel degree a single node of
    /// this type can offer.
    pub fn build(
        group: &DeviceTypeGroup,
        model: &ModelSpec,
        precision: Precision,
        engine: EngineKind,
        mode: HardwareMode,
        seq_len: u32,
        max_concurrency: u32,
    ) -> Result<Self, SearchError> {
        let device = &group.device;
        let tp_bound = match mode {
            // Shared hosts cannot reserve device groups for one replica.
            HardwareMode::Shared => 1,
            HardwareMode::Dedicated => group.max_devices_per_node.min(MAX_TP_PROBE),
        };

        let analysis = analyze_model(model, precision);
        let mut min_tp = None;
        let mut tp = 1;
        while tp <= tp_bound {
            let check = MemoryValidator::validate_analysis(
                &analysis,
                &MemoryRequest {
                    seq_len,
                    batch_size: 1,
                    tensor_parallel: tp,
                    pipeline_parallel: 1,
                    available_memory_gb: device.memory_gb,
                    precision,
                },
            );
            if check.valid {
                min_tp = Some(tp);
                break;
            }
            tp *= 2;
        }
        let min_tp = min_tp.ok_or_else(|| SearchError::InfeasibleModel {
            device_type: device.name.clone(),
            max_tp_probed: tp_bound,
        })?;

        let mut valid_tp = Vec::new();
        let mut tp = min_tp;
        while tp <= tp_bound {
            valid_tp.push(tp);
            tp *= 2;
        }

        let pipeline_capable = mode == HardwareMode::Dedicated
            && engine.supports_pipeline_parallel()
            && device.kind != DeviceKind::Cpu;
        let valid_pp = if pipeline_capable {
            (1..=group.nodes_with_device.max(1)).collect()
        } else {
            vec![1]
        };

        debug!(
            device_type = %device.name,
            engine = engine.name(),
            min_tp,
            tp_levels = valid_tp.len(),
            pp_levels = valid_pp.len(),
            "built search space"
        );

        Ok(Self {
            device_type: device.name.clone(),
            min_tensor_parallel: min_tp,
            view: SpaceView {
                valid_tp,
                valid_pp,
                max_concurrency: max_concurrency.max(1),
                concurrency_step: CONCURRENCY_STEP,
            },
        })
    }

    pub fn view(&self) -> &SpaceView {
        &self.view
    }
}
