// Training and evaluation reports

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use signal_rl_agent::RunReport;
use signal_rl_core::EpisodeSummary;

/// One line of the training JSONL log
#[derive(Debug, Serialize)]
struct EpisodeRecord<'a> {
    model: &'a str,
    #[serde(flatten)]
    summary: &'a EpisodeSummary,
    improved: bool,
}

fn write_series(path: &Path, header: &str, points: &[(usize, f64)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut out = String::with_capacity(points.len() * 16);
    out.push_str(header);
    out.push('\n');
    for (x, y) in points {
        out.push_str(&format!("{x}\t{y:.3}\n"));
    }
    std::fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))
}

/// Write the per-episode totals of a training run
///
/// Produces `plots_training/time_vs_epoch_<name>.txt` (plus a PNG with the
/// `visualization` feature) and appends every episode to
/// `plots_training/<name>_episodes.jsonl`.
pub fn write_training(output_dir: &Path, name: &str, report: &RunReport) -> Result<Vec<PathBuf>> {
    let dir = output_dir.join("plots_training");
    let stem = dir.join(format!("time_vs_epoch_{name}"));
    let totals = report.totals();

    let series = stem.with_extension("txt");
    write_series(&series, "episode\ttotal_waiting_time", &totals)?;
    let mut written = vec![series];

    let log_path = dir.join(format!("{name}_episodes.jsonl"));
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;
    for episode in &report.episodes {
        let record = EpisodeRecord {
            model: name,
            summary: &episode.summary,
            improved: episode.improved,
        };
        writeln!(log, "{}", serde_json::to_string(&record)?)?;
    }
    written.push(log_path);

    #[cfg(feature = "visualization")]
    {
        let png = stem.with_extension("png");
        plot::line_chart(&png, "Total waiting time per episode", "Episode", "Waiting time (s)", &totals)?;
        written.push(png);
    }

    Ok(written)
}

/// Write the per-step waiting time of an evaluation run
///
/// Produces `plots_testing/<name>/waiting_time.txt` (plus a PNG with the
/// `visualization` feature).
pub fn write_evaluation(output_dir: &Path, name: &str, report: &RunReport) -> Result<Vec<PathBuf>> {
    let dir = output_dir.join("plots_testing").join(name);
    let points: Vec<(usize, f64)> = report
        .episodes
        .first()
        .map(|e| e.waiting_per_step.iter().copied().enumerate().collect())
        .unwrap_or_default();

    let series = dir.join("waiting_time.txt");
    write_series(&series, "step\twaiting_time", &points)?;
    #[allow(unused_mut)]
    let mut written = vec![series];

    #[cfg(feature = "visualization")]
    {
        let png = dir.join("waiting_time.png");
        plot::line_chart(&png, "Waiting time per step", "Step", "Waiting time (s)", &points)?;
        written.push(png);
    }

    Ok(written)
}

#[cfg(feature = "visualization")]
mod plot {
    use std::path::Path;

    use anyhow::{anyhow, Result};
    use plotters::prelude::*;

    pub fn line_chart(
        path: &Path,
        title: &str,
        x_label: &str,
        y_label: &str,
        points: &[(usize, f64)],
    ) -> Result<()> {
        let root = BitMapBackend::new(path, (1024, 640)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("{e}"))?;

        let x_max = points.iter().map(|p| p.0).max().unwrap_or(0).max(1);
        let y_max = points.iter().map(|p| p.1).fold(0.0_f64, f64::max).max(1.0);

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24))
            .margin(16)
            .x_label_area_size(40)
            .y_label_area_size(64)
            .build_cartesian_2d(0..x_max, 0.0..y_max * 1.05)
            .map_err(|e| anyhow!("{e}"))?;
        chart
            .configure_mesh()
            .x_desc(x_label)
            .y_desc(y_label)
            .draw()
            .map_err(|e| anyhow!("{e}"))?;
        chart
            .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
            .map_err(|e| anyhow!("{e}"))?;
        root.present().map_err(|e| anyhow!("{e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_rl_agent::{BestCheckpoint, EpisodeReport};

    fn report(totals: &[f64]) -> RunReport {
        let episodes = totals
            .iter()
            .enumerate()
            .map(|(i, &total)| {
                let mut summary = EpisodeSummary::begin(i);
                summary.total_waiting_time = total;
                summary.steps = 3;
                summary.finish(0.5);
                EpisodeReport {
                    summary,
                    waiting_per_step: vec![total / 3.0; 3],
                    improved: i == 0,
                }
            })
            .collect();
        RunReport {
            episodes,
            best: Some(BestCheckpoint {
                episode: 0,
                total_waiting_time: totals[0],
            }),
        }
    }

    #[test]
    fn training_report_writes_series_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_training(dir.path(), "grid", &report(&[30.0, 45.0])).unwrap();

        let series = std::fs::read_to_string(&written[0]).unwrap();
        assert!(written[0].ends_with("plots_training/time_vs_epoch_grid.txt"));
        assert_eq!(series.lines().count(), 3);
        assert_eq!(series.lines().nth(2).unwrap(), "1\t45.000");

        let log = std::fs::read_to_string(&written[1]).unwrap();
        let first: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(first["model"], "grid");
        assert_eq!(first["improved"], true);
        assert_eq!(first["total_waiting_time"], 30.0);
    }

    #[test]
    fn training_log_appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        write_training(dir.path(), "grid", &report(&[1.0])).unwrap();
        let written = write_training(dir.path(), "grid", &report(&[2.0, 3.0])).unwrap();
        let log = std::fs::read_to_string(&written[1]).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[test]
    fn evaluation_report_writes_per_step_series() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_evaluation(dir.path(), "grid", &report(&[9.0])).unwrap();
        assert!(written[0].ends_with("plots_testing/grid/waiting_time.txt"));

        let series = std::fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = series.lines().collect();
        assert_eq!(lines, vec!["step\twaiting_time", "0\t3.000", "1\t3.000", "2\t3.000"]);
    }
}
