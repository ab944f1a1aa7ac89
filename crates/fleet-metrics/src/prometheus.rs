//! Prometheus text exposition format.
//!
//! Renders a [`MetricsSnapshot`] for scraping by a Prometheus server or
//! compatible agent.

use std::fmt::Write;

use crate::collector::MetricsSnapshot;
use crate::histogram::Histogram;

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn bound_label(bound: f64) -> String {
    if bound.is_infinite() {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}

fn histogram(out: &mut String, name: &str, label: &str, value: &str, h: &Histogram) {
    for (bound, count) in h.cumulative() {
        let _ = writeln!(
            out,
            "{name}_bucket{{{label}=\"{value}\",le=\"{}\"}} {count}",
            bound_label(bound)
        );
    }
    let _ = writeln!(out, "{name}_sum{{{label}=\"{value}\"}} {}", h.sum());
    let _ = writeln!(out, "{name}_count{{{label}=\"{value}\"}} {}", h.count());
}

/// Render a snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    header(&mut out, "reconciler_success_total", "counter", "Reconcile ticks that returned no errors.");
    for (worker, (success, _, _)) in &snapshot.workers {
        let _ = writeln!(out, "reconciler_success_total{{worker=\"{worker}\"}} {success}");
    }

    header(&mut out, "reconciler_failure_total", "counter", "Reconcile ticks that returned errors.");
    for (worker, (_, failure, _)) in &snapshot.workers {
        let _ = writeln!(out, "reconciler_failure_total{{worker=\"{worker}\"}} {failure}");
    }

    header(&mut out, "reconciler_errors_total", "counter", "Errors returned by reconcile ticks.");
    for (worker, (_, _, errors)) in &snapshot.workers {
        let _ = writeln!(out, "reconciler_errors_total{{worker=\"{worker}\"}} {errors}");
    }

    header(&mut out, "reconciler_duration_seconds", "histogram", "Reconcile tick duration.");
    for (worker, h) in &snapshot.durations {
        histogram(&mut out, "reconciler_duration_seconds", "worker", worker, h);
    }

    header(&mut out, "central_age_in_state_seconds", "histogram", "Time centrals spend in each status.");
    for (status, h) in &snapshot.age_in_state {
        histogram(&mut out, "central_age_in_state_seconds", "status", status.as_str(), h);
    }

    header(&mut out, "central_status_count", "gauge", "Non-deleted centrals per status.");
    for (status, count) in &snapshot.status_counts {
        let _ = writeln!(out, "central_status_count{{status=\"{status}\"}} {count}");
    }

    header(&mut out, "cluster_status_capacity_used", "gauge", "Centrals bound to each cluster.");
    for ((cluster, region, ty), count) in &snapshot.capacity_used {
        let _ = writeln!(
            out,
            "cluster_status_capacity_used{{cluster=\"{cluster}\",region=\"{region}\",type=\"{ty}\"}} {count}"
        );
    }

    header(&mut out, "leader_worker", "gauge", "1 when the worker runs on this replica.");
    for (worker, running) in &snapshot.leader_workers {
        let _ = writeln!(out, "leader_worker{{worker=\"{worker}\"}} {}", u8::from(*running));
    }

    out
}
