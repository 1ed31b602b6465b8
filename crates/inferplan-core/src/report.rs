//! Human-readable rendering of optimization reports and deployment plans.

use crate::orchestrator::OptimizationReport;
use crate::plan::DeploymentPlan;

/// Format an optimization report as a pretty-printed table string.
pub fn format_report(report: &OptimizationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<96}\n", "  Configuration Ranking  "));
    out.push_str(&format!(
        "{:<14} {:<10} {:>4} {:>4} {:>6} {:>10} {:>10} {:>9} {:>12} {:>7}\n",
        "Device", "Engine", "TP", "PP", "Conc", "TTFT ms", "Tok/s/usr", "E2E s", "$/M tokens", "Meets"
    ));
    out.push_str(&format!("{:-<96}\n", ""));
    for result in &report.results {
        let Some(record) = &result.best_record else {
            out.push_str(&format!(
                "{:<14} {:<10} {:>74}\n",
                result.device_type,
                result.engine.name(),
                "no feasible configuration"
            ));
            continue;
        };
        out.push_str(&format!(
            "{:<14} {:<10} {:>4} {:>4} {:>6} {:>10.1} {:>10.1} {:>9.2} {:>12.4} {:>7}\n",
            result.device_type,
            result.engine.name(),
            record.config.tensor_parallel,
            record.config.pipeline_parallel,
            record.config.concurrency,
            record.ttft_ms,
            record.throughput_per_user,
            record.e2e_latency_s,
            record.cost_per_million_tokens,
            if record.meets_targets { "yes" } else { "no" },
        ));
    }
    out.push_str(&format!("{:-<96}\n", ""));
    out.push_str(&format!(
        "  Evaluations: {}  |  Targets met: {}\n",
        report.total_evaluations,
        if report.targets_met() { "yes" } else { "no" },
    ));
    out.push_str(&format!("{:=<96}\n", ""));
    out
}

/// Format a deployment plan as a pretty-printed table string.
pub fn format_plan(plan: &DeploymentPlan) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<84}\n", "  Deployment Plan  "));
    out.push_str(&format!(
        "{:<14} {:<10} {:<24} {:>4} {:>4} {:>6} {:>8}\n",
        "Device", "Engine", "Nodes", "TP", "PP", "Conc", "$/hr"
    ));
    out.push_str(&format!("{:-<84}\n", ""));
    for alloc in &plan.allocations {
        out.push_str(&format!(
            "{:<14} {:<10} {:<24} {:>4} {:>4} {:>6} {:>8.3}\n",
            alloc.device_type,
            alloc.engine,
            alloc.nodes.join(","),
            alloc.tensor_parallel,
            alloc.pipeline_parallel,
            alloc.concurrency,
            alloc.cost_per_hour,
        ));
    }
    out.push_str(&format!("{:-<84}\n", ""));
    out.push_str(&format!(
        "  Replicas: {}  Concurrency: {}  Cost: ${:.3}/hr  Blended: ${:.4}/M tokens\n",
        plan.total_replicas,
        plan.total_concurrency,
        plan.total_cost_per_hour,
        plan.blended_cost_per_million_tokens,
    ));
    out.push_str(&format!(
        "  Mean TTFT: {:.1} ms  Mean E2E: {:.2} s\n",
        plan.mean_ttft_ms, plan.mean_e2e_latency_s,
    ));
    out.push_str(&format!("{:=<84}\n", ""));
    out
}
