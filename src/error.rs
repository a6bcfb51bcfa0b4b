use thiserror::Error;

/// PINNの学習・評価で発生するエラー。
#[derive(Debug, Error)]
pub enum PinnError {
    /// 平坦化ベクトルの長さ、またはテンソル形状がパラメータ集合と一致しない。
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("parameter tensor #{index} has shape {actual:?}, layout recorded {expected:?}")]
    TensorShape {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// サンプルバッチの形状が `[n, 2]` / `[n, 1]` (`n >= 1`) の組になっていない。
    #[error("invalid {regime} batch: points {points:?}, targets {targets:?}")]
    BatchShape {
        regime: &'static str,
        points: Vec<usize>,
        targets: Vec<usize>,
    },

    /// 損失または勾配がNaN/Infになった。
    #[error(
        "numerical divergence at evaluation {evaluation}: loss = {loss}, {non_finite_gradients} non-finite gradient entries"
    )]
    NumericalDivergence {
        evaluation: usize,
        loss: f64,
        non_finite_gradients: usize,
    },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error("solver failed: {0}")]
    Solver(String),
}
