//! Prometheus metrics for the bridge.
//!
//! Without [`init_metrics`] the recording helpers are no-ops.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the Prometheus recorder and serves it on `0.0.0.0:<port>/metrics`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;

    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_gauge!(
        "hs1xx_bridge_info",
        "Information about the bridge (always 1, labels contain version info)"
    );
    describe_gauge!(
        "hs1xx_relay_state",
        "Last confirmed relay state (1 = on, 0 = off)"
    );

    describe_counter!(
        "hs1xx_commands_total",
        "Total number of relay commands sent to the device"
    );
    describe_counter!(
        "hs1xx_commands_deduplicated_total",
        "Remote toggles dropped because the same target was already in flight"
    );
    describe_counter!(
        "hs1xx_commands_superseded_total",
        "Command completions discarded because a newer command was issued"
    );
    describe_counter!(
        "hs1xx_command_failures_total",
        "Relay commands that failed and were rolled back"
    );

    describe_counter!("hs1xx_polls_total", "Total number of status polls");
    describe_counter!("hs1xx_poll_failures_total", "Total number of failed polls");
    describe_counter!(
        "hs1xx_drift_corrections_total",
        "Relay changes detected that did not originate from HomeKit"
    );
}

pub struct Metrics;

impl Metrics {
    pub fn set_bridge_info(version: &str) {
        gauge!("hs1xx_bridge_info", "version" => version.to_string()).set(1.0);
    }

    pub fn set_relay_state(on: bool) {
        gauge!("hs1xx_relay_state").set(if on { 1.0 } else { 0.0 });
    }

    pub fn inc_commands_issued() {
        counter!("hs1xx_commands_total").increment(1);
    }

    pub fn inc_commands_deduplicated() {
        counter!("hs1xx_commands_deduplicated_total").increment(1);
    }

    pub fn inc_commands_superseded() {
        counter!("hs1xx_commands_superseded_total").increment(1);
    }

    pub fn inc_command_failures() {
        counter!("hs1xx_command_failures_total").increment(1);
    }

    pub fn inc_polls() {
        counter!("hs1xx_polls_total").increment(1);
    }

    pub fn inc_poll_failures() {
        counter!("hs1xx_poll_failures_total").increment(1);
    }

    pub fn inc_drift_corrections() {
        counter!("hs1xx_drift_corrections_total").increment(1);
    }
}
