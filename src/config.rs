use burn::config::Config;

use crate::error::PinnError;

/// 1次元非定常熱伝導問題の設定。
///
/// `u_t = alpha * u_xx` を `t ∈ [0, t_final]`, `x ∈ [x_min, x_max]` で解きます。
#[derive(Config, Debug)]
pub struct HeatProblemConfig {
    /// 熱拡散率
    #[config(default = 0.01)]
    pub diffusivity: f64,
    /// `x = x_max` での境界温度
    #[config(default = 200.0)]
    pub upper_temperature: f64,
    /// `x = x_min` での境界温度
    #[config(default = 100.0)]
    pub lower_temperature: f64,
    /// `t = 0` での一様な初期温度
    #[config(default = 95.0)]
    pub initial_temperature: f64,
    #[config(default = 2.0)]
    pub t_final: f64,
    #[config(default = 0.0)]
    pub x_min: f64,
    #[config(default = 1.0)]
    pub x_max: f64,
}

/// 各領域から抽出するコロケーション点の数。
#[derive(Config, Debug)]
pub struct SamplingConfig {
    #[config(default = 2000)]
    pub equation: usize,
    #[config(default = 500)]
    pub initial: usize,
    #[config(default = 500)]
    pub boundary: usize,
}

/// 4つの残差項の重み。既定ではすべて等しく1です。
#[derive(Config, Debug)]
pub struct LossWeights {
    #[config(default = 1.0)]
    pub equation: f64,
    #[config(default = 1.0)]
    pub initial: f64,
    #[config(default = 1.0)]
    pub boundary_upper: f64,
    #[config(default = 1.0)]
    pub boundary_lower: f64,
}

/// L-BFGSの停止条件と履歴長。
#[derive(Config, Debug)]
pub struct LbfgsConfig {
    /// 保持する曲率ペアの数
    #[config(default = 50)]
    pub memory: usize,
    /// 勾配ノルムの許容値
    #[config(default = 1e-8)]
    pub tolerance_grad: f64,
    /// 反復間の損失変化の許容値
    #[config(default = 1e-12)]
    pub tolerance_cost: f64,
    #[config(default = 30000)]
    pub max_iters: u64,
    /// 損失・勾配の評価回数の上限
    #[config(default = 45000)]
    pub max_evaluations: usize,
    /// 直線探索の失敗を何回まで許して再始動するか
    #[config(default = 3)]
    pub max_line_search_failures: usize,
    /// 何回の評価ごとに進捗をログに出すか
    #[config(default = 100)]
    pub log_every: usize,
    /// 学習時間の上限（秒）
    pub max_seconds: Option<f64>,
}

impl LbfgsConfig {
    pub fn validate(&self) -> Result<(), PinnError> {
        if self.memory == 0 {
            return Err(PinnError::InvalidConfig {
                reason: "L-BFGS memory must be at least 1".to_string(),
            });
        }
        if self.max_evaluations == 0 {
            return Err(PinnError::InvalidConfig {
                reason: "evaluation budget must be at least 1".to_string(),
            });
        }
        if let Some(seconds) = self.max_seconds {
            if !(seconds.is_finite() && seconds > 0.0) {
                return Err(PinnError::InvalidConfig {
                    reason: format!("time limit must be positive, got {seconds}"),
                });
            }
        }
        Ok(())
    }
}

/// 学習一回分の全設定。モデルと一緒にJSONで保存されます。
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "HeatProblemConfig::new()")]
    pub problem: HeatProblemConfig,
    #[config(default = "crate::model::ModelConfig::new()")]
    pub model: crate::model::ModelConfig,
    #[config(default = "SamplingConfig::new()")]
    pub sampling: SamplingConfig,
    #[config(default = "LbfgsConfig::new()")]
    pub optimizer: LbfgsConfig,
    #[config(default = "LossWeights::new()")]
    pub weights: LossWeights,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// 学習を始める前に、各設定の組み合わせが実行可能かを確認します。
    pub fn validate(&self) -> Result<(), PinnError> {
        self.model.validate()?;
        let s = &self.sampling;
        if s.equation == 0 || s.initial == 0 || s.boundary == 0 {
            return Err(PinnError::InvalidConfig {
                reason: format!(
                    "every regime needs at least one sample, got {}/{}/{}",
                    s.equation, s.initial, s.boundary
                ),
            });
        }
        self.optimizer.validate()
    }
}
