// ============================================================
// Layer 6 — Training Curves
// ============================================================
// Renders the epoch history once, after training, as an SVG
// with two side-by-side panels:
//
//   ┌──────── accuracy ────────┬────────── loss ──────────┐
//   │ train_acc vs val_acc     │ train_loss vs val_loss   │
//   └──────────────────────────┴──────────────────────────┘
//
// The caller treats a rendering failure as a warning.

use anyhow::{anyhow, bail, Result};
use plotters::prelude::*;
use std::path::Path;

use crate::infra::metrics::EpochMetrics;

const SIZE: (u32, u32) = (1200, 480);

struct Panel<'a> {
    title: &'a str,
    y_desc: &'a str,
    train: Vec<(f64, f64)>,
    val: Vec<(f64, f64)>,
}

pub fn render_training_curves(history: &[EpochMetrics], path: &Path) -> Result<()> {
    if history.is_empty() {
        bail!("no epochs to plot");
    }

    let point = |m: &EpochMetrics, v: f64| ((m.epoch + 1) as f64, v);
    let panels = [
        Panel {
            title: "Accuracy",
            y_desc: "joint accuracy",
            train: history.iter().map(|m| point(m, m.train_accuracy)).collect(),
            val: history.iter().map(|m| point(m, m.val_accuracy)).collect(),
        },
        Panel {
            title: "Loss",
            y_desc: "summed head loss",
            train: history.iter().map(|m| point(m, m.train_loss)).collect(),
            val: history.iter().map(|m| point(m, m.val_loss)).collect(),
        },
    ];

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow!("backend error: {e}"))?;

    let x_max = history.len().max(2) as f64;
    for (area, panel) in root.split_evenly((1, 2)).iter().zip(&panels) {
        let y_max = panel
            .train
            .iter()
            .chain(&panel.val)
            .map(|&(_, y)| y)
            .filter(|y| y.is_finite())
            .fold(0.0f64, f64::max)
            .max(1e-3)
            * 1.1;

        let mut chart = ChartBuilder::on(area)
            .margin(10)
            .caption(panel.title, ("sans-serif", 22.0))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(1.0..x_max, 0.0..y_max)
            .map_err(|e| anyhow!("chart build error: {e}"))?;

        chart
            .configure_mesh()
            .x_desc("epoch")
            .y_desc(panel.y_desc)
            .draw()
            .map_err(|e| anyhow!("mesh error: {e}"))?;

        chart
            .draw_series(LineSeries::new(panel.train.iter().copied(), &BLUE))
            .map_err(|e| anyhow!("draw error: {e}"))?
            .label("train")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
        chart
            .draw_series(LineSeries::new(panel.val.iter().copied(), &RED))
            .map_err(|e| anyhow!("draw error: {e}"))?
            .label("validation")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|e| anyhow!("legend error: {e}"))?;
    }

    root.present().map_err(|e| anyhow!("render error: {e}"))?;
    tracing::debug!("Wrote training curves to '{}'", path.display());
    Ok(())
}
