//! CSV row format

use chrono::{DateTime, SecondsFormat, Utc};

use crate::state::MachineState;

/// First line of every log file
pub const HEADER: &str = "Timestamp,Stack_Voltage(V),Stack_Current(A),Stack_Temp(C),H2_Pressure(MPa),DCDC_Voltage(V),DCDC_Current(A),Fan1_Duty(%),Fault_Code";

/// Extension of log files
pub const EXTENSION: &str = "csv";

/// Format one snapshot as a CSV row, without the trailing newline
pub fn format_log_line(state: &MachineState, timestamp: DateTime<Utc>) -> String {
    format!(
        "{},{:.2},{:.1},{:.1},{:.2},{:.2},{:.1},{},{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        state.power.stack_voltage,
        state.power.stack_current,
        state.sensors.stack_temp,
        state.sensors.h2_inlet_pressure,
        state.power.dcf_out_voltage,
        state.power.dcf_out_current,
        state.io.fan1_duty,
        state.io.fault_code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_header_columns() {
        assert_eq!(HEADER.split(',').count(), 9);
        assert!(HEADER.starts_with("Timestamp,"));
    }

    #[test]
    fn test_line_precision() {
        let mut state = MachineState::default();
        state.power.stack_voltage = 48.0;
        state.power.stack_current = 200.04;
        state.sensors.stack_temp = 65.34;
        state.sensors.h2_inlet_pressure = 0.5;
        state.power.dcf_out_voltage = 24.0;
        state.power.dcf_out_current = 380.0;
        state.io.fan1_duty = 75;
        state.io.fault_code = 0x0102;

        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let line = format_log_line(&state, ts);
        assert_eq!(
            line,
            "2023-11-14T22:13:20.123Z,48.00,200.0,65.3,0.50,24.00,380.0,75,258"
        );
        assert_eq!(line.split(',').count(), 9);
    }
}
