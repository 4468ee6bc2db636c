use clap::ValueEnum;
use std::{fmt, io::Write};

use omramin_lib::{errors::OmraminError as Error, iso_8601_datetime::convert_datetime_to_str};
use omramin_models::measurement::Measurement;

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    #[default]
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Json => f.write_str("json"),
        }
    }
}

const CSV_HEADER: &str = "timestamp,kind,weight_kg,bmi,body_fat_pct,skeletal_muscle_pct,\
                          resting_metabolism,visceral_fat_level,metabolic_age,systolic_mmhg,\
                          diastolic_mmhg,pulse_bpm";

/// Serialize a device's fetched measurement list to CSV or JSON.
/// # Errors
/// Returns error if serialization or writing fails
pub fn export_measurements(
    measurements: &[Measurement],
    format: ExportFormat,
    mut writer: impl Write,
) -> Result<(), Error> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, measurements)?;
            writeln!(writer)?;
        }
        ExportFormat::Csv => {
            writeln!(writer, "{CSV_HEADER}")?;
            for measurement in measurements {
                let timestamp = convert_datetime_to_str(measurement.timestamp());
                match measurement {
                    Measurement::Weight(wm) => writeln!(
                        writer,
                        "{timestamp},weight,{},{},{},{},{},{},{},,,",
                        wm.weight_kg,
                        wm.bmi,
                        wm.body_fat_pct,
                        wm.skeletal_muscle_pct,
                        wm.resting_metabolism,
                        wm.visceral_fat_level,
                        wm.metabolic_age,
                    )?,
                    Measurement::BloodPressure(bp) => writeln!(
                        writer,
                        "{timestamp},blood_pressure,,,,,,,,{},{},{}",
                        bp.systolic_mmhg, bp.diastolic_mmhg, bp.pulse_bpm,
                    )?,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use omramin_lib::errors::OmraminError as Error;
    use omramin_models::measurement::{BpMeasurement, Measurement, WeightMeasurement};

    use crate::measurement_export::{export_measurements, ExportFormat};

    fn measurements() -> Vec<Measurement> {
        vec![
            Measurement::Weight(WeightMeasurement::new(
                datetime!(2024-01-15 09:32:25 UTC),
                73.5,
            )),
            Measurement::BloodPressure(BpMeasurement::new(
                datetime!(2024-01-15 20:05:00 UTC),
                121,
                82,
                64,
            )),
        ]
    }

    #[test]
    fn test_export_csv() -> Result<(), Error> {
        let mut buf = Vec::new();
        export_measurements(&measurements(), ExportFormat::Csv, &mut buf)?;
        let text = String::from_utf8(buf).expect("invalid utf8");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,kind,weight_kg"));
        assert_eq!(
            lines[1],
            "2024-01-15T09:32:25Z,weight,73.5,-1,-1,-1,-1,-1,-1,,,"
        );
        assert_eq!(
            lines[2],
            "2024-01-15T20:05:00Z,blood_pressure,,,,,,,,121,82,64"
        );
        Ok(())
    }

    #[test]
    fn test_export_json() -> Result<(), Error> {
        let mut buf = Vec::new();
        export_measurements(&measurements(), ExportFormat::Json, &mut buf)?;
        let values: Vec<serde_json::Value> = serde_json::from_slice(&buf)?;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["kind"], "weight");
        assert_eq!(values[0]["weight_kg"], 73.5);
        assert_eq!(values[1]["kind"], "blood_pressure");
        assert_eq!(values[1]["systolic_mmhg"], 121);
        Ok(())
    }
}
