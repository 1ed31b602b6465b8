//! Cost model: amortized hardware price normalized to cost per million tokens.

use crate::topology::{DeviceKind, DeviceSpec};

/// Hardware purchase cost is spread over this many years of service.
const AMORTIZATION_YEARS: f64 = 5.0;
/// Assigned to configurations with zero or negative throughput so they sort
/// last instead of dividing by zero.
pub const SENTINEL_COST: f64 = 1e9;

/// Purchase price for a device. A price carried on the spec wins; otherwise
/// the model name is looked up in the catalog, with a per-kind fallback for
/// names the catalog does not know.
pub fn purchase_price_usd(device: &DeviceSpec) -> f64 {
    if device.purchase_price_usd > 0.0 {
        return device.purchase_price_usd;
    }
    match device.name.to_ascii_lowercase().as_str() {
        "h100" | "h100-sxm" | "h100sxm" => 30_000.0,
        "a100" | "a100-sxm-80" | "a100sxm80" => 15_000.0,
        "l40s" => 10_000.0,
        "gaudi2" => 12_000.0,
        _ => match device.kind {
            DeviceKind::Cuda => 25_000.0,
            DeviceKind::Hpu => 12_000.0,
            DeviceKind::Cpu => 8_000.0,
        },
    }
}

/// Amortized hourly cost of one device unit.
pub fn device_cost_per_hour(device: &DeviceSpec) -> f64 {
    purchase_price_usd(device) / (AMORTIZATION_YEARS * 365.0 * 24.0)
}

/// Normalized cost of serving one million tokens with `device_count` devices
/// at the given per-user throughput and concurrency.
pub fn cost_per_million_tokens(
    throughput_per_user: f64,
    concurrency: u32,
    device: &DeviceSpec,
    device_count: u32,
) -> f64 {
    let tokens_per_hour = throughput_per_user * concurrency as f64 * 3600.0;
    if tokens_per_hour <= 0.0 {
        return SENTINEL_COST;
    }
    device_cost_per_hour(device) * device_count as f64 * (1e6 / tokens_per_hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::AcceleratorProfile;

    fn h100() -> DeviceSpec {
        DeviceSpec::from_profile("h100", &AcceleratorProfile::H100Sxm, 8)
    }

    #[test]
    fn test_spec_price_wins_then_catalog_then_kind() {
        let known = h100();
        assert_eq!(purchase_price_usd(&known), 30_000.0);

        let mut custom = h100();
        custom.purchase_price_usd = 20_000.0;
        assert_eq!(purchase_price_usd(&custom), 20_000.0);

        let mut unknown = h100();
        unknown.name = "mystery-accelerator".to_string();
        unknown.purchase_price_usd = 0.0;
        assert_eq!(purchase_price_usd(&unknown), 25_000.0); // cuda fallback
    }

    #[test]
    fn test_amortization() {
        let hourly = device_cost_per_hour(&h100());
        assert!((hourly - 30_000.0 / (5.0 * 365.0 * 24.0)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_throughput_gets_sentinel() {
        let device = h100();
        assert_eq!(cost_per_million_tokens(0.0, 32, &device, 1), SENTINEL_COST);
        assert_eq!(
            cost_per_million_tokens(-5.0, 32, &device, 1),
            SENTINEL_COST
        );
    }

    #[test]
    fn test_monotone_in_throughput() {
        let device = h100();
        let mut prev = f64::INFINITY;
        for tput in [1.0, 5.0, 20.0, 100.0, 500.0] {
            let cost = cost_per_million_tokens(tput, 32, &device, 4);
            assert!(
                cost <= prev,
                "cost increased from {} to {} at throughput {}",
                prev,
                cost,
                tput
            );
            prev = cost;
        }
    }

    #[test]
    fn test_cost_scales_with_device_count() {
        let device = h100();
        let one = cost_per_million_tokens(20.0, 32, &device, 1);
        let four = cost_per_million_tokens(20.0, 32, &device, 4);
        assert!((four / one - 4.0).abs() < 1e-9);
    }
}
