//! Per-timestep records and their monthly and yearly aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::Serialize;

use crate::diode::PerformancePoint;

/// Result of one model (flat plate or shaded facets) at one timestep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModeResult {
    /// Degrees
    pub tilt: f64,
    #[serde(flatten)]
    pub performance: PerformancePoint,
}

impl ModeResult {
    /// Power of the series string, the figure used for all totals.
    pub fn pmax(&self) -> f64 {
        self.performance.pmax_series
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimestepRecord {
    pub timestamp_local: DateTime<FixedOffset>,
    pub timestamp_utc: DateTime<Utc>,
    /// Degrees
    pub zenith: f64,
    pub azimuth: f64,
    /// W/m^2
    pub dni: f64,
    pub dhi: f64,
    pub ghi: f64,
    /// degC
    pub ambient_temperature: f64,
    pub flat: ModeResult,
    pub shaded: ModeResult,
}

impl TimestepRecord {
    pub fn month(&self) -> u32 {
        self.timestamp_local.month()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ModeSums {
    pmax: f64,
    isc: f64,
    imp: f64,
    vmp: f64,
    tilt: f64,
    fill_factor: f64,
}

impl ModeSums {
    fn add(&mut self, mode: &ModeResult) {
        self.pmax += mode.pmax();
        self.isc += mode.performance.isc;
        self.imp += mode.performance.imp;
        self.vmp += mode.performance.vmp_series;
        self.tilt += mode.tilt;
        self.fill_factor += mode.performance.fill_factor;
    }

    fn aggregate(&self, count: usize) -> ModeAggregate {
        let n = count.max(1) as f64;
        ModeAggregate {
            pmax_total: self.pmax,
            isc_avg: self.isc / n,
            imp_avg: self.imp / n,
            vmp_avg: self.vmp / n,
            tilt_avg: self.tilt / n,
            fill_factor_avg: self.fill_factor / n,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModeAggregate {
    pub pmax_total: f64,
    pub isc_avg: f64,
    pub imp_avg: f64,
    pub vmp_avg: f64,
    pub tilt_avg: f64,
    pub fill_factor_avg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyAggregate {
    /// Abbreviated month name, e.g. "Jan"
    pub month: String,
    pub count: usize,
    pub flat: ModeAggregate,
    pub shaded: ModeAggregate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct YearlyTotals {
    pub flat_pmax_total: f64,
    pub shaded_pmax_total: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub rows: usize,
    pub data: Vec<TimestepRecord>,
    /// Keyed by month number 1..=12, only months with at least one record
    pub monthly: BTreeMap<u32, MonthlyAggregate>,
    pub yearly_totals: YearlyTotals,
}

#[derive(Clone, Debug, Default)]
struct MonthSums {
    label: String,
    count: usize,
    flat: ModeSums,
    shaded: ModeSums,
}

/// Running sums of a driver run. Records must be pushed in timestep order.
#[derive(Clone, Debug, Default)]
pub struct ReportBuilder {
    records: Vec<TimestepRecord>,
    months: BTreeMap<u32, MonthSums>,
    totals: YearlyTotals,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TimestepRecord) {
        let month = self.months.entry(record.month()).or_insert_with(|| MonthSums {
            label: record.timestamp_local.format("%b").to_string(),
            ..MonthSums::default()
        });
        month.count += 1;
        month.flat.add(&record.flat);
        month.shaded.add(&record.shaded);

        self.totals.flat_pmax_total += record.flat.pmax();
        self.totals.shaded_pmax_total += record.shaded.pmax();
        self.records.push(record);
    }

    pub fn finish(self) -> RunReport {
        let monthly = self
            .months
            .into_iter()
            .map(|(number, sums)| {
                (
                    number,
                    MonthlyAggregate {
                        month: sums.label,
                        count: sums.count,
                        flat: sums.flat.aggregate(sums.count),
                        shaded: sums.shaded.aggregate(sums.count),
                    },
                )
            })
            .collect();

        RunReport {
            rows: self.records.len(),
            data: self.records,
            monthly,
            yearly_totals: self.totals,
        }
    }
}

/// Everything the run boundary hands back to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome<T> {
    Ok(T),
    Error { message: String },
}

impl<T> RunOutcome<T> {
    pub fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => RunOutcome::Ok(value),
            Err(e) => RunOutcome::Error {
                message: format!("{:#}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn mode(tilt: f64, pmax_series: f64, isc: f64) -> ModeResult {
        ModeResult {
            tilt,
            performance: PerformancePoint {
                isc,
                imp: isc * 0.9,
                fill_factor: 0.8,
                vmp_series: 3.0,
                pmax_series,
                ..PerformancePoint::default()
            },
        }
    }

    fn record(month: u32, hour: u32, flat_pmax: f64, shaded_pmax: f64) -> TimestepRecord {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = offset
            .with_ymd_and_hms(2024, month, 21, hour, 0, 0)
            .unwrap();
        TimestepRecord {
            timestamp_local: local,
            timestamp_utc: local.with_timezone(&Utc),
            zenith: 40.0,
            azimuth: 180.0,
            dni: 800.0,
            dhi: 100.0,
            ghi: 700.0,
            ambient_temperature: 20.0,
            flat: mode(40.0, flat_pmax, 10.0),
            shaded: mode(30.0, shaded_pmax, 12.0),
        }
    }

    #[test]
    fn monthly_sums_and_averages() {
        let mut builder = ReportBuilder::new();
        builder.push(record(3, 10, 10.0, 12.0));
        builder.push(record(3, 11, 20.0, 18.0));
        builder.push(record(6, 12, 5.0, 6.0));
        let report = builder.finish();

        assert_eq!(report.rows, 3);
        let months: Vec<u32> = report.monthly.keys().copied().collect();
        assert_eq!(months, vec![3, 6]);

        let march = &report.monthly[&3];
        assert_eq!(march.month, "Mar");
        assert_eq!(march.count, 2);
        assert_abs_diff_eq!(march.flat.pmax_total, 30.0);
        assert_abs_diff_eq!(march.shaded.pmax_total, 30.0);
        assert_abs_diff_eq!(march.shaded.isc_avg, 12.0);
        assert_abs_diff_eq!(march.flat.tilt_avg, 40.0);
        assert_abs_diff_eq!(march.shaded.vmp_avg, 3.0);

        assert_abs_diff_eq!(report.yearly_totals.flat_pmax_total, 35.0);
        assert_abs_diff_eq!(report.yearly_totals.shaded_pmax_total, 36.0);
    }

    #[test]
    fn empty_run() {
        let report = ReportBuilder::new().finish();
        assert_eq!(report.rows, 0);
        assert!(report.monthly.is_empty());
        assert_eq!(report.yearly_totals, YearlyTotals::default());
    }

    #[test]
    fn outcome_from_error() {
        let outcome: RunOutcome<RunReport> =
            RunOutcome::from_result(Err(anyhow::anyhow!("Diffuse fraction 1.5 is invalid")));
        assert_matches!(&outcome, RunOutcome::Error { message } if message.contains("1.5"));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "Diffuse fraction 1.5 is invalid");
    }

    #[test]
    fn outcome_ok_is_tagged() {
        let outcome = RunOutcome::from_result(Ok(ReportBuilder::new().finish()));
        assert_matches!(outcome, RunOutcome::Ok(_));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["rows"], 0);
    }

    #[test]
    fn record_serializes_flat_performance() {
        let json = serde_json::to_value(record(1, 9, 1.0, 2.0)).unwrap();
        assert_eq!(json["shaded"]["tilt"], 30.0);
        assert_eq!(json["shaded"]["pmax_series"], 2.0);
        assert_eq!(json["timestamp_utc"], "2024-01-21T08:00:00Z");
    }
}
