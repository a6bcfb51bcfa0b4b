use crate::config::TrainingConfig;
use crate::model::{Approximator, Model};
use crate::plot::{plot_field, plot_profiles};
use crate::{
    CONFIG_FILENAME, FIELD_PLOT_FILENAME, InferBackend, MODEL_FILENAME, PROFILE_PLOT_FILENAME,
};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::{Tensor, TensorData};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// 任意の点列 `(t, x)` での温度を `batch_size` ごとにまとめて予測します。
pub fn predict<B: Backend, M: Approximator<B>>(
    model: &M,
    points: &[(f64, f64)],
    batch_size: usize,
    device: &B::Device,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    for chunk in points.chunks(batch_size.max(1)) {
        let coords: Vec<f64> = chunk.iter().flat_map(|&(t, x)| [t, x]).collect();
        let input = Tensor::<B, 2>::from_data(TensorData::new(coords, [chunk.len(), 2]), device);
        out.extend(model.forward(input).into_data().iter::<f64>());
    }
    out
}

/// `[0, t_final] × [x_min, x_max]` 上の等間隔格子（`t` が外側のループ）。
pub fn grid(config: &TrainingConfig, n_t: usize, n_x: usize) -> Vec<(f64, f64)> {
    let p = &config.problem;
    let step = |n: usize| if n > 1 { 1.0 / (n - 1) as f64 } else { 0.0 };
    let mut points = Vec::with_capacity(n_t * n_x);
    for i in 0..n_t {
        let t = p.t_final * i as f64 * step(n_t);
        for j in 0..n_x {
            points.push((t, p.x_min + (p.x_max - p.x_min) * j as f64 * step(n_x)));
        }
    }
    points
}

/// 温度分布を描く時刻。
pub const PROFILE_TIMES: [f64; 3] = [0.0, 0.1, 0.2];

/// 時刻 `t` での `x_min..=x_max` 上の温度分布 `(x, u)`。
pub fn profile<B: Backend, M: Approximator<B>>(
    model: &M,
    config: &TrainingConfig,
    t: f64,
    n_x: usize,
    device: &B::Device,
) -> Vec<(f64, f64)> {
    let xs: Vec<(f64, f64)> = grid(config, 1, n_x).into_iter().map(|(_, x)| (t, x)).collect();
    let u = predict(model, &xs, xs.len(), device);
    xs.iter().map(|&(_, x)| x).zip(u).collect()
}

/// `infer`サブコマンドを実行します。
pub fn run(artifact_dir: &Path, resolution: usize) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let model_path = artifact_dir.join(MODEL_FILENAME);
    let config_path = artifact_dir.join(CONFIG_FILENAME);

    if !model_path.exists() {
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に 'train' コマンドでモデルを学習・保存してください。",
            model_path.display()
        )
        .into());
    }
    let config = TrainingConfig::load(&config_path)?;

    info!("推論を実行します - バックエンド: NdArray<f64> (CPU)");
    let inference_start = Instant::now();

    info!("保存済みモデルを '{}' からロード中...", model_path.display());
    let model: Model<InferBackend> = config.model.init(&device).load_file(
        model_path,
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        &device,
    )?;

    let points = grid(&config, resolution, resolution);
    let u = predict(&model, &points, resolution * resolution, &device);
    let inference_duration = inference_start.elapsed();

    info!(
        "推論が完了しました。入力グリッド数: {}x{}={}",
        resolution,
        resolution,
        u.len()
    );
    info!("=> 推論時間: {:.2?}", inference_duration);

    let boundary_error = |x: f64, target: f64| {
        let n_t = resolution.max(2);
        let along: Vec<(f64, f64)> = (0..n_t)
            .map(|i| (config.problem.t_final * i as f64 / (n_t - 1) as f64, x))
            .collect();
        predict(&model, &along, n_t, &device)
            .iter()
            .map(|u| (u - target).abs())
            .fold(0.0, f64::max)
    };
    info!(
        "境界での最大誤差: x = {} -> {:.3}, x = {} -> {:.3}",
        config.problem.x_min,
        boundary_error(config.problem.x_min, config.problem.lower_temperature),
        config.problem.x_max,
        boundary_error(config.problem.x_max, config.problem.upper_temperature),
    );

    let plot_path = artifact_dir.join(FIELD_PLOT_FILENAME);
    plot_field(&plot_path, &config, resolution, resolution, &u)?;
    info!("=> 温度分布を '{}' に保存しました。", plot_path.display());

    let profiles: Vec<(f64, Vec<(f64, f64)>)> = PROFILE_TIMES
        .iter()
        .map(|&t| (t, profile(&model, &config, t, resolution.max(2), &device)))
        .collect();
    let profile_path = artifact_dir.join(PROFILE_PLOT_FILENAME);
    plot_profiles(&profile_path, &config, &profiles)?;
    info!("=> 時刻ごとの分布を '{}' に保存しました。", profile_path.display());

    Ok(())
}
