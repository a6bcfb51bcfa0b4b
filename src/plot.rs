use crate::config::TrainingConfig;
use plotters::prelude::*;
use std::path::Path;

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
pub fn plot_loss_history(
    path: &Path,
    total_loss_hist: &[f64],
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let log_hist: Vec<f64> = total_loss_hist
        .iter()
        .map(|v| v.max(f64::MIN_POSITIVE).log10())
        .collect();
    let max_log_loss = log_hist.iter().copied().fold(f64::MIN, f64::max).max(0.0) + 0.5;
    let min_log_loss = log_hist.iter().copied().fold(f64::MAX, f64::min).min(max_log_loss) - 0.5;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..log_hist.len().max(1), min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Evaluations")
        .draw()?;
    chart
        .draw_series(LineSeries::new(
            log_hist.iter().enumerate().map(|(i, &val)| (i, val)),
            &RED,
        ))?
        .label("Total Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 格子上の温度 `u(t, x)` をカラーマップで出力します。`u` は `t` が外側の順です。
pub fn plot_field(
    path: &Path,
    config: &TrainingConfig,
    n_t: usize,
    n_x: usize,
    u: &[f64],
) -> Result<(), Box<dyn std::error::Error>> {
    let p = &config.problem;
    let lo = p
        .lower_temperature
        .min(p.upper_temperature)
        .min(p.initial_temperature);
    let hi = p
        .lower_temperature
        .max(p.upper_temperature)
        .max(p.initial_temperature);
    let dt = p.t_final / n_t.max(1) as f64;
    let dx = (p.x_max - p.x_min) / n_x.max(1) as f64;

    let root = BitMapBackend::new(path, (900, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("PINN u(t, x)", ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..p.t_final, p.x_min..p.x_max)?;
    chart.configure_mesh().x_desc("t").y_desc("x").draw()?;
    chart.draw_series(u.iter().enumerate().map(|(k, &value)| {
        let (i, j) = (k / n_x.max(1), k % n_x.max(1));
        let t = i as f64 * dt;
        let x = p.x_min + j as f64 * dx;
        let level = ((value - lo) / (hi - lo).max(f64::EPSILON)).clamp(0.0, 1.0);
        let color = HSLColor(0.66 * (1.0 - level), 0.9, 0.5);
        Rectangle::new([(t, x), (t + dt, x + dx)], color.filled())
    }))?;
    root.present()?;
    Ok(())
}

/// 時刻ごとの温度分布 `u(x)` を折れ線で重ねて出力します。
pub fn plot_profiles(
    path: &Path,
    config: &TrainingConfig,
    profiles: &[(f64, Vec<(f64, f64)>)],
) -> Result<(), Box<dyn std::error::Error>> {
    let p = &config.problem;
    let values = profiles.iter().flat_map(|(_, line)| line.iter().map(|&(_, u)| u));
    let (lo, hi) = values.fold((f64::MAX, f64::MIN), |(lo, hi), u| (lo.min(u), hi.max(u)));
    let margin = ((hi - lo) * 0.05).max(1.0);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Temperature Profiles", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(p.x_min..p.x_max, (lo - margin)..(hi + margin))?;
    chart.configure_mesh().x_desc("x").y_desc("u").draw()?;
    for (k, (t, line)) in profiles.iter().enumerate() {
        let color = Palette99::pick(k).to_rgba();
        chart
            .draw_series(LineSeries::new(line.iter().copied(), &color))?
            .label(format!("t = {t}"))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
