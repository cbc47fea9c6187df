use std::{collections::HashMap, fmt::Write as _};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) const COMMAND_LABEL_UNKNOWN: &str = "unknown";

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

pub(crate) fn render_metrics() -> String {
    let commands = metrics_state()
        .commands
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let authorization_denials = metrics_state()
        .authorization_denials
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let store_corrupt_records = metrics_state()
        .store_corrupt_records
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let ticket_service_failures = metrics_state()
        .ticket_service_failures
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    output.push_str(
        "# HELP gitbot_commands_total Count of handled commands by command and outcome\n",
    );
    output.push_str("# TYPE gitbot_commands_total counter\n");
    let mut command_entries: Vec<_> = commands.into_iter().collect();
    command_entries.sort_by_key(|((command, outcome), _)| (*command, *outcome));
    for ((command, outcome), value) in command_entries {
        let _ = writeln!(
            output,
            "gitbot_commands_total{{command=\"{command}\",outcome=\"{outcome}\"}} {value}"
        );
    }

    render_single_label_counter(
        &mut output,
        "gitbot_authorization_denials_total",
        "Count of authorization denials by action",
        "action",
        authorization_denials,
    );
    render_single_label_counter(
        &mut output,
        "gitbot_store_corrupt_records_total",
        "Count of unreadable store records treated as absent by key kind",
        "key_kind",
        store_corrupt_records,
    );
    render_single_label_counter(
        &mut output,
        "gitbot_ticket_service_failures_total",
        "Count of non-not-found ticket service failures by operation",
        "operation",
        ticket_service_failures,
    );

    output
}

fn render_single_label_counter(
    output: &mut String,
    name: &str,
    help: &str,
    label: &str,
    counters: HashMap<&'static str, u64>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let mut entries: Vec<_> = counters.into_iter().collect();
    entries.sort_by_key(|(value, _)| *value);
    for (label_value, value) in entries {
        let _ = writeln!(output, "{name}{{{label}=\"{label_value}\"}} {value}");
    }
}

pub(crate) fn record_command(command: &'static str, outcome: &'static str) {
    if let Ok(mut counters) = metrics_state().commands.lock() {
        let entry = counters.entry((command, outcome)).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_authorization_denial(action: &'static str) {
    if let Ok(mut counters) = metrics_state().authorization_denials.lock() {
        let entry = counters.entry(action).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_store_corrupt_record(key_kind: &'static str) {
    if let Ok(mut counters) = metrics_state().store_corrupt_records.lock() {
        let entry = counters.entry(key_kind).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_ticket_service_failure(operation: &'static str) {
    if let Ok(mut counters) = metrics_state().ticket_service_failures.lock() {
        let entry = counters.entry(operation).or_insert(0);
        *entry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        metrics_state, record_authorization_denial, record_command, render_metrics,
        COMMAND_LABEL_UNKNOWN,
    };

    #[test]
    fn records_command_outcomes_per_label_pair() {
        let before = metrics_state()
            .commands
            .lock()
            .unwrap()
            .get(&(COMMAND_LABEL_UNKNOWN, "rejected"))
            .copied()
            .unwrap_or(0);
        record_command(COMMAND_LABEL_UNKNOWN, "rejected");
        let after = metrics_state()
            .commands
            .lock()
            .unwrap()
            .get(&(COMMAND_LABEL_UNKNOWN, "rejected"))
            .copied()
            .unwrap_or(0);
        assert!(after > before);
    }

    #[test]
    fn rendered_output_lists_every_family() {
        record_authorization_denial("manage_users");
        let output = render_metrics();
        for family in [
            "gitbot_commands_total",
            "gitbot_authorization_denials_total",
            "gitbot_store_corrupt_records_total",
            "gitbot_ticket_service_failures_total",
        ] {
            assert!(output.contains(&format!("# TYPE {family} counter")), "{family}");
        }
        assert!(output.contains("gitbot_authorization_denials_total{action=\"manage_users\"}"));
    }
}
