use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;

use crate::processing::autobias::{BiasStep, ControllerState, StepDirection};

pub const RATE_LOG_HEADERS: [&str; 6] = [
    "wall_time",
    "rate_per_sensor",
    "coarse",
    "low_count",
    "high_count",
    "action",
];

/// Appends data to a CSV file, creating headers if the file is new
///
/// # Arguments
///
/// * `path` - The CSV file; missing parent directories are created
/// * `headers` - Column headers (only written if file is new)
/// * `data` - Row of data to append
///
/// # Returns
///
/// * `io::Result<()>` - Success or error result
pub fn log_csv(path: &Path, headers: &[&str], data: &[String]) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file_exists = path.exists();

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    if !file_exists && !headers.is_empty() {
        writeln!(file, "{}", headers.join(","))?;
    }

    writeln!(file, "{}", data.join(","))?;
    file.flush()?;

    Ok(())
}

/// One row of the autobias rate log.
pub fn rate_log_row(rate: f64, state: ControllerState, step: Option<&BiasStep>) -> Vec<String> {
    let action = match step.map(|s| s.direction) {
        Some(StepDirection::Down) => "down",
        Some(StepDirection::Up) => "up",
        None => "none",
    };
    vec![
        Local::now().to_rfc3339(),
        format!("{:.1}", rate),
        state.current_coarse.to_string(),
        state.low_count.to_string(),
        state.high_count.to_string(),
        action.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("rate.csv");
        let state = ControllerState {
            low_count: 1,
            high_count: 0,
            current_coarse: 20,
        };
        log_csv(&path, &RATE_LOG_HEADERS, &rate_log_row(42_000.0, state, None)).unwrap();
        log_csv(&path, &RATE_LOG_HEADERS, &rate_log_row(43_000.0, state, None)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], RATE_LOG_HEADERS.join(","));
        assert!(lines[1].ends_with(",42000.0,20,1,0,none"));
    }
}
