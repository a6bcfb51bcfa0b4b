//! # 物理情報ニューラルネットワーク (PINN) ライブラリ
//!
//! `burn` フレームワークを使用して、物理情報ニューラルネットワーク（PINN）を構築し、
//! 1次元の非定常熱伝導方程式 `u_t = alpha * u_xx` を解くための主要なコンポーネントを提供します。
//! 学習には `argmin` の L-BFGS（準ニュートン法）を使います。

use burn::backend::{Autodiff, NdArray};

pub mod cli;
pub mod config;
pub mod error;
pub mod flatten;
pub mod inference;
pub mod lbfgs;
pub mod logging;
pub mod model;
pub mod pinn;
pub mod plot;
pub mod residual;
pub mod sampling;
pub mod training;

pub use error::PinnError;

/// 学習用バックエンド。残差の精度のため倍精度で固定します。
pub type TrainBackend = Autodiff<NdArray<f64>>;
/// 推論用バックエンド。
pub type InferBackend = NdArray<f64>;

/// モデルを保存するファイル名
pub const MODEL_FILENAME: &str = "pinn_model.mpk";
/// 学習設定を保存するファイル名
pub const CONFIG_FILENAME: &str = "pinn_config.json";
pub const LOSS_PLOT_FILENAME: &str = "loss_graph.png";
pub const FIELD_PLOT_FILENAME: &str = "temperature_field.png";
/// 時刻ごとの温度分布 `u(x)` のグラフ。
pub const PROFILE_PLOT_FILENAME: &str = "temperature_profiles.png";
