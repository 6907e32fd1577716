use crate::domain::balance::magnitude;
use crate::domain::outcome::{BalanceReport, Data};
use crate::error::{PipelineError, Result};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// How a run's result is rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Csv => "csv",
        })
    }
}

impl FromStr for ReportFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(PipelineError::Validation(format!(
                "unknown report format '{}'",
                other
            ))),
        }
    }
}

/// Writes run results to any `Write` sink (e.g. stdout).
pub struct ReportWriter<W: Write> {
    sink: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Writes `data` in `format`. A failure has no rows, so it is always
    /// written as JSON.
    pub fn write(&mut self, data: &Data, format: ReportFormat) -> Result<()> {
        match (format, data) {
            (ReportFormat::Csv, Data::Success(report)) => self.write_csv(report),
            _ => self.write_json(data),
        }
    }

    pub fn write_json(&mut self, data: &Data) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.sink, data)?;
        writeln!(self.sink)?;
        self.sink.flush()?;
        Ok(())
    }

    /// One `address,balance_change` row per address, largest magnitude
    /// first. Equal magnitudes keep address order.
    pub fn write_csv(&mut self, report: &BalanceReport) -> Result<()> {
        let mut rows: Vec<(&String, f64)> = report
            .address_balances
            .iter()
            .map(|(address, delta)| (address, *delta))
            .collect();
        rows.sort_by(|(_, a), (_, b)| magnitude(*b).total_cmp(&magnitude(*a)));

        let mut wtr = csv::Writer::from_writer(&mut self.sink);
        wtr.write_record(["address", "balance_change"])?;
        for (address, delta) in rows {
            wtr.write_record([address.as_str(), delta.to_string().as_str()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
