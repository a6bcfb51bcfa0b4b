use crate::config::TrainingConfig;
use crate::lbfgs::LbfgsTrainer;
use crate::pinn::CompositeLoss;
use crate::plot::plot_loss_history;
use crate::sampling::sample_batches;
use crate::{CONFIG_FILENAME, LOSS_PLOT_FILENAME, MODEL_FILENAME, TrainBackend};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// `train`サブコマンドを実行します。
pub fn run(config: TrainingConfig, artifact_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let device = Default::default();
    fs::create_dir_all(artifact_dir)?;

    // --- データセットの準備 ---
    TrainBackend::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let batches = sample_batches::<TrainBackend, _>(
        &config.problem,
        &config.sampling,
        &mut rng,
        &device,
    )?;

    // --- モデルとオプティマイザの初期化 ---
    let mut model = config.model.init::<TrainBackend>(&device);
    let p = &config.problem;
    let loss = CompositeLoss::build(p.diffusivity, p.upper_temperature, p.lower_temperature);
    let trainer = LbfgsTrainer::new(config.optimizer.clone(), config.weights.clone())?;

    info!(
        "学習を開始します (熱伝導方程式, alpha = {}) - バックエンド: NdArray<f64> (CPU)",
        p.diffusivity
    );

    // --- 学習 ---
    let report = trainer.fit(&mut model, &loss, &batches)?;
    let terms = report.final_terms;
    info!(
        "Equation: {:.6e}, Initial: {:.6e}, Upper: {:.6e}, Lower: {:.6e}",
        terms.equation, terms.initial, terms.boundary_upper, terms.boundary_lower
    );
    info!("=> 学習時間: {:.2?}", report.elapsed);
    if report.final_loss * 10.0 > report.initial_loss {
        warn!(
            "損失が十分に下がっていません: {:.6e} -> {:.6e}",
            report.initial_loss, report.final_loss
        );
    }

    // --- 結果の保存と描画 ---
    let plot_path = artifact_dir.join(LOSS_PLOT_FILENAME);
    plot_loss_history(&plot_path, &report.loss_history)?;
    info!("=> 損失グラフを '{}' に保存しました。", plot_path.display());

    info!("学習済みモデルを保存中...");
    let model_path = artifact_dir.join(MODEL_FILENAME);
    model.save_file(
        &model_path,
        &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
    )?;
    config.save(artifact_dir.join(CONFIG_FILENAME))?;
    info!("=> モデルを '{}' に保存しました。", model_path.display());

    Ok(())
}
