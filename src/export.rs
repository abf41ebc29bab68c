//! CSV export of sweep results.
//!
//! Export belongs to the front-end, not the sequencing core; the CLI calls
//! this after a run. Columns are `angle [deg]`, `intensity [V]` and the point
//! status, so partial sweeps remain interpretable.

use std::path::Path;

use crate::core::MeasurementRecord;

/// Write one row per record to `path`, overwriting any existing file.
pub fn write_csv(path: &Path, records: &[MeasurementRecord]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["angle [deg]", "intensity [V]", "status"])?;

    for record in records {
        writer.write_record([
            format!("{}", record.user_angle.degrees()),
            format!("{}", record.reduced_value),
            record.status.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angle::{DeviceAngle, UserAngle};
    use crate::core::PointStatus;
    use chrono::Utc;

    fn record(index: usize, angle: f64, value: f64) -> MeasurementRecord {
        MeasurementRecord {
            index,
            user_angle: UserAngle::new(angle),
            device_angle_confirmed: Some(DeviceAngle::new(-angle)),
            raw_samples: vec![value],
            reduced_value: value,
            timestamp: Utc::now(),
            status: PointStatus::Ok,
            fault: None,
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");

        write_csv(&path, &[record(0, 0.0, 1.25), record(1, 45.0, 0.5)]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "angle [deg],intensity [V],status");
        assert_eq!(lines[1], "0,1.25,ok");
        assert_eq!(lines[2], "45,0.5,ok");
    }

    #[test]
    fn failed_points_keep_their_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");

        let mut failed = record(0, 10.0, f64::NAN);
        failed.status = PointStatus::Failed;
        failed.raw_samples.clear();

        write_csv(&path, &[failed]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.lines().nth(1).unwrap().ends_with(",failed"));
    }
}
