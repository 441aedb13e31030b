//! Signal timing calculation
//!
//! Webster's method for a simplified two-phase (north-south / east-west)
//! intersection. Pure functions, no I/O.

use serde::Serialize;

/// Per-road timing parameters
#[derive(Debug, Clone, Serialize)]
pub struct TimingConfig {
    /// Saturation flow of the north-south approach, vehicles/hour
    pub saturation_ns: f64,
    /// Saturation flow of the east-west approach, vehicles/hour
    pub saturation_ew: f64,
    /// Lost time per phase, seconds
    pub lost_time_per_phase: f64,
    /// Minimum cycle length, seconds
    pub min_cycle: f64,
    /// Maximum cycle length, seconds
    pub max_cycle: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            saturation_ns: 1800.0,
            saturation_ew: 1800.0,
            lost_time_per_phase: 4.0,
            min_cycle: 30.0,
            max_cycle: 120.0,
        }
    }
}

/// Computed cycle and green splits.
///
/// `green_ns + green_ew == round(cycle)` holds exactly: `green_ew` is
/// the remainder after rounding `green_ns`, not an independent
/// proportional share, and the phase lost time is folded into it. The
/// east-west split can therefore deviate from its exact flow proportion;
/// that keeps the splits consistent with the cycle, which the downstream
/// hardware requires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalTiming {
    /// Cycle length in seconds, within `[min_cycle, max_cycle]`
    pub cycle: f64,
    /// Green time of the north-south phase, seconds
    pub green_ns: u32,
    /// Green time of the east-west phase, seconds
    pub green_ew: u32,
}

/// Compute cycle length and green splits from hourly flows.
///
/// Flow inputs are clamped to zero from below. A degenerate saturation
/// flow (<= 0) contributes zero demand for that approach.
pub fn compute(flow_ns: f64, flow_ew: f64, config: &TimingConfig) -> SignalTiming {
    let flow_ns = flow_ns.max(0.0);
    let flow_ew = flow_ew.max(0.0);

    let y_ns = if config.saturation_ns > 0.0 {
        flow_ns / config.saturation_ns
    } else {
        0.0
    };
    let y_ew = if config.saturation_ew > 0.0 {
        flow_ew / config.saturation_ew
    } else {
        0.0
    };
    let y_total = y_ns + y_ew;
    let lost_time = config.lost_time_per_phase * 2.0;

    let cycle = if y_total >= 0.95 {
        tracing::warn!(
            y_total,
            "intersection near or over saturation; using maximum cycle"
        );
        config.max_cycle
    } else if y_total <= 0.0 {
        config.min_cycle
    } else {
        ((1.5 * lost_time + 5.0) / (1.0 - y_total)).clamp(config.min_cycle, config.max_cycle)
    };

    let effective_green = (cycle - lost_time).max(0.0);
    let green_ns = if y_total > 0.0 {
        ((y_ns / y_total) * effective_green).round() as i64
    } else {
        (effective_green / 2.0).round() as i64
    };
    let green_ew = cycle.round() as i64 - green_ns;

    SignalTiming {
        cycle,
        green_ns: green_ns.max(0) as u32,
        green_ew: green_ew.max(0) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TimingConfig {
        TimingConfig {
            saturation_ns: 1800.0,
            saturation_ew: 1800.0,
            lost_time_per_phase: 4.0,
            min_cycle: 30.0,
            max_cycle: 120.0,
        }
    }

    #[test]
    fn no_demand_uses_minimum_cycle() {
        let timing = compute(0.0, 0.0, &config());
        assert_eq!(timing.cycle, 30.0);
        // Effective green split evenly between phases.
        assert_eq!(timing.green_ns, 11);
        assert_eq!(timing.green_ew, 19);
    }

    #[test]
    fn oversaturation_uses_maximum_cycle() {
        // y = 1800/1800 + 900/1800 = 1.5 >= 0.95
        let timing = compute(1800.0, 900.0, &config());
        assert_eq!(timing.cycle, 120.0);
    }

    #[test]
    fn saturation_boundary_hits_maximum() {
        // Exactly Y = 0.95: 0.475 per approach.
        let timing = compute(855.0, 855.0, &config());
        assert_eq!(timing.cycle, 120.0);
    }

    #[test]
    fn worked_example_matches_webster() {
        // y_ns = 0.5, y_ew = 1/6, Y = 2/3, L = 8:
        // C = (1.5*8 + 5) / (1/3) = 51, eff green = 43,
        // g_ns = round(0.75 * 43) = 32, g_ew = 51 - 32 = 19.
        let timing = compute(900.0, 300.0, &config());
        assert_eq!(timing.cycle.round() as u32, 51);
        assert_eq!(timing.green_ns, 32);
        assert_eq!(timing.green_ew, 19);
    }

    #[test]
    fn greens_always_sum_to_rounded_cycle() {
        let cfg = config();
        for flow_ns in (0..2000).step_by(37) {
            for flow_ew in (0..2000).step_by(53) {
                let timing = compute(flow_ns as f64, flow_ew as f64, &cfg);
                assert_eq!(
                    timing.green_ns + timing.green_ew,
                    timing.cycle.round() as u32,
                    "flows {flow_ns}/{flow_ew}"
                );
                assert!(timing.cycle >= cfg.min_cycle && timing.cycle <= cfg.max_cycle);
            }
        }
    }

    #[test]
    fn negative_flows_clamped_to_zero() {
        let timing = compute(-500.0, -10.0, &config());
        assert_eq!(timing.cycle, 30.0);
    }

    #[test]
    fn zero_saturation_contributes_no_demand() {
        let cfg = TimingConfig {
            saturation_ns: 0.0,
            ..config()
        };
        let timing = compute(900.0, 0.0, &cfg);
        assert_eq!(timing.cycle, cfg.min_cycle);
    }

    #[test]
    fn moderate_demand_lands_between_bounds() {
        // Y = 0.25 -> C = 17/0.75 ≈ 22.7, clamped up to min 30.
        let timing = compute(450.0, 0.0, &config());
        assert_eq!(timing.cycle, 30.0);

        // Y = 0.8 -> C = 17/0.2 = 85, inside bounds.
        let timing = compute(1440.0, 0.0, &config());
        assert!((timing.cycle - 85.0).abs() < 1e-9);
    }
}
