use crate::config::TrainingConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "A Physics-Informed Neural Network (PINN) for 1-D heat conduction with Burn", long_about = None)]
pub struct Cli {
    /// モデル・設定・グラフを読み書きするディレクトリ
    #[arg(long, global = true, default_value = ".")]
    pub artifact_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// PINNモデルを学習し、結果をファイルに保存します
    Train(TrainArgs),
    /// 保存されたPINNモデルを使い、推論を実行します
    Infer {
        /// 格子の一辺の点数
        #[arg(long, default_value_t = 100)]
        resolution: usize,
    },
}

/// 学習設定のうち、コマンドラインから上書きできる項目。
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 既存の設定ファイル（JSON）から開始します
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub diffusivity: Option<f64>,
    /// 方程式バッチの点数
    #[arg(long)]
    pub samples: Option<usize>,
    #[arg(long)]
    pub max_iters: Option<u64>,
    #[arg(long)]
    pub max_seconds: Option<f64>,
}

impl TrainArgs {
    pub fn into_config(self) -> Result<TrainingConfig, burn::config::ConfigError> {
        use burn::config::Config;

        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::new(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(alpha) = self.diffusivity {
            config.problem.diffusivity = alpha;
        }
        if let Some(n) = self.samples {
            config.sampling.equation = n;
        }
        if let Some(n) = self.max_iters {
            config.optimizer.max_iters = n;
        }
        if self.max_seconds.is_some() {
            config.optimizer.max_seconds = self.max_seconds;
        }
        Ok(config)
    }
}
