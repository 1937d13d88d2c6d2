use crate::export::TelemetrySnapshot;
use crate::labels::fmt_labels;

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(snapshot: &TelemetrySnapshot) -> String {
    let mut output = String::new();

    for action in &snapshot.actions {
        let base = [
            ("adapter", action.adapter.as_str()),
            ("action", action.action.as_str()),
        ];
        for (outcome, value) in [("success", action.successes), ("failure", action.failures)] {
            let mut labels = base.to_vec();
            labels.push(("outcome", outcome));
            output.push_str(&format!(
                "autobot_action_total{} {}\n",
                fmt_labels(&labels),
                value
            ));
        }
        if action.samples == 0 {
            continue;
        }
        for (quantile, value) in [("0.50", action.p50_ms), ("0.90", action.p90_ms), ("1.00", action.max_ms)] {
            let mut labels = base.to_vec();
            labels.push(("quantile", quantile));
            output.push_str(&format!(
                "autobot_action_duration_ms{} {}\n",
                fmt_labels(&labels),
                value
            ));
        }
        output.push_str(&format!(
            "autobot_action_duration_ms_count{} {}\n",
            fmt_labels(&base),
            action.samples
        ));
        output.push_str(&format!(
            "autobot_action_duration_ms_sum{} {:.3}\n",
            fmt_labels(&base),
            action.mean_ms * action.samples as f64
        ));
    }

    for selector in &snapshot.selectors {
        for (outcome, value) in [("success", selector.successes), ("failure", selector.failures)] {
            let labels = [
                ("adapter", selector.adapter.as_str()),
                ("action", selector.action.as_str()),
                ("selector", selector.selector.as_str()),
                ("outcome", outcome),
            ];
            output.push_str(&format!(
                "autobot_selector_total{} {}\n",
                fmt_labels(&labels),
                value
            ));
        }
    }

    for probe in &snapshot.probes {
        for (outcome, value) in [("matched", probe.matched), ("missed", probe.missed)] {
            let labels = [
                ("adapter", probe.adapter.as_str()),
                ("logical", probe.logical_name.as_str()),
                ("locator", probe.locator.as_str()),
                ("outcome", outcome),
            ];
            output.push_str(&format!(
                "autobot_selector_probe_total{} {}\n",
                fmt_labels(&labels),
                value
            ));
        }
    }

    for failure in &snapshot.resolution_failures {
        let labels = [
            ("adapter", failure.adapter.as_str()),
            ("action", failure.action.as_str()),
            ("logical", failure.logical_name.as_str()),
        ];
        output.push_str(&format!(
            "autobot_selector_exhausted_total{} {}\n",
            fmt_labels(&labels),
            failure.count
        ));
    }

    output.push_str(&format!(
        "autobot_failure_snapshots_truncated_total {}\n",
        snapshot.truncated_snapshots
    ));
    output.push_str(&format!(
        "autobot_failure_snapshots_evicted_total {}\n",
        snapshot.evicted_snapshots
    ));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Outcome, TelemetryCollector};
    use std::time::Duration;

    #[test]
    fn exports_action_and_selector_series() {
        let telemetry = TelemetryCollector::default();
        telemetry.record(
            "run-1",
            "whatsapp_web",
            "open_chat",
            &Outcome::Success,
            Duration::from_millis(12),
            Some("div[title=\"Ana\"]"),
        );
        let text = render_prometheus(&telemetry.snapshot());
        assert!(text.contains(
            "autobot_action_total{adapter=\"whatsapp_web\",action=\"open_chat\",outcome=\"success\"} 1"
        ));
        assert!(text.contains("autobot_action_duration_ms_count{adapter=\"whatsapp_web\",action=\"open_chat\"} 1"));
        assert!(text.contains("selector=\"div[title=\\\"Ana\\\"]\""));
        assert!(text.contains("autobot_failure_snapshots_truncated_total 0"));
    }
}
