//! Stage summaries and CSV export of trajectories.

use crate::profile::KELVIN_OFFSET;
use crate::stage::StageResult;
use std::fmt;
use std::io::prelude::*;
use std::path::Path;
use tracing::info;

/// Mean temperature over one labelled range of the final profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMean {
    pub label: String,
    pub start: usize,
    pub end: usize,
    /// Kelvin, `None` when the clipped range is empty.
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub stage: String,
    pub final_time: f64,
    pub points: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub steps: usize,
    pub rejected_steps: usize,
    pub means: Vec<RangeMean>,
}

impl StageResult {
    pub fn summary(&self) -> StageSummary {
        let last = self.final_profile();
        StageSummary {
            stage: self.stage.clone(),
            final_time: self.times.last().copied().unwrap_or(0.0),
            points: last.len(),
            min: last.min(),
            max: last.max(),
            steps: self.stats.steps,
            rejected_steps: self.stats.rejected_steps,
            means: self
                .report_ranges
                .iter()
                .map(|r| RangeMean {
                    label: r.label.clone(),
                    start: r.start,
                    end: r.end,
                    mean: last.mean_over(r.start..r.end),
                })
                .collect(),
        }
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' at t = {} s: {} points, {} steps ({} rejected)",
            self.stage, self.final_time, self.points, self.steps, self.rejected_steps
        )?;
        if let (Some(min), Some(max)) = (self.min, self.max) {
            write!(f, ", range {min:.2} K .. {max:.2} K")?;
        }
        for m in &self.means {
            match m.mean {
                Some(mean) => write!(
                    f,
                    ", {} [{}, {}) mean {:.2} K ({:.2} °C)",
                    m.label,
                    m.start,
                    m.end,
                    mean,
                    mean - KELVIN_OFFSET
                )?,
                None => write!(f, ", {} [{}, {}) empty", m.label, m.start, m.end)?,
            }
        }
        Ok(())
    }
}

/// One row per mesh point: distance from the center in millimeters, then
/// the temperature in Celsius at each output time.
pub fn write_csv<W: Write>(result: &StageResult, output: &mut W) -> std::io::Result<()> {
    write!(output, "distance_mm")?;
    for t in &result.times {
        write!(output, ",t={t}")?;
    }
    writeln!(output)?;

    for (i, d) in result.mesh.distances_mm().iter().enumerate() {
        write!(output, "{d}")?;
        for profile in &result.profiles {
            write!(output, ",{}", profile.as_slice()[i] - KELVIN_OFFSET)?;
        }
        writeln!(output)?;
    }
    Ok(())
}

/// Write `<dir>/<stage>.csv`, creating `dir` when needed.
pub fn write_csv_file<P: AsRef<Path>>(result: &StageResult, dir: P) -> std::io::Result<()> {
    std::fs::create_dir_all(dir.as_ref())?;
    let path = dir.as_ref().join(format!("{}.csv", result.stage));
    info!(?path, "writing csv");
    let mut output = std::io::BufWriter::new(std::fs::File::create(&path)?);
    write_csv(result, &mut output)?;
    output.flush()
}
