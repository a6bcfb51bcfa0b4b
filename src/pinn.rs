use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::error::PinnError;
use crate::model::Approximator;
use crate::residual::HeatResiduals;

/// 座標 `[n, 2]` と目標値 `[n, 1]` の組（`n >= 1`）。
#[derive(Clone, Debug)]
pub struct SampleBatch<B: Backend> {
    points: Tensor<B, 2>,
    targets: Tensor<B, 2>,
}

impl<B: Backend> SampleBatch<B> {
    pub fn new(
        regime: &'static str,
        points: Tensor<B, 2>,
        targets: Tensor<B, 2>,
    ) -> Result<Self, PinnError> {
        let [n, d] = points.dims();
        let [m, k] = targets.dims();
        if n == 0 || d != 2 || k != 1 || n != m {
            return Err(PinnError::BatchShape {
                regime,
                points: vec![n, d],
                targets: vec![m, k],
            });
        }
        Ok(Self { points, targets })
    }

    /// 目標値がすべて0のバッチ。
    pub fn zero_target(regime: &'static str, points: Tensor<B, 2>) -> Result<Self, PinnError> {
        let [n, _] = points.dims();
        let targets = Tensor::zeros([n, 1], &points.device());
        Self::new(regime, points, targets)
    }

    pub fn len(&self) -> usize {
        self.points.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self) -> &Tensor<B, 2> {
        &self.points
    }

    pub fn targets(&self) -> &Tensor<B, 2> {
        &self.targets
    }
}

/// 学習に使う4種類のバッチ（方程式、初期、上側境界、下側境界）。
#[derive(Clone, Debug)]
pub struct TrainingBatches<B: Backend> {
    pub equation: SampleBatch<B>,
    pub initial: SampleBatch<B>,
    pub boundary_upper: SampleBatch<B>,
    pub boundary_lower: SampleBatch<B>,
}

/// 各バッチに対応する残差 `[n, 1]`。
#[derive(Clone, Debug)]
pub struct ResidualBatches<B: Backend> {
    pub equation: Tensor<B, 2>,
    pub initial: Tensor<B, 2>,
    pub boundary_upper: Tensor<B, 2>,
    pub boundary_lower: Tensor<B, 2>,
}

/// 残差関数を1つの呼び出しにまとめた損失モデル。
///
/// 重み付けやスカラー化は行わず、残差の形だけを組み立てます。
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeLoss {
    residuals: HeatResiduals,
}

impl CompositeLoss {
    pub fn build(diffusivity: f64, upper_temperature: f64, lower_temperature: f64) -> Self {
        Self {
            residuals: HeatResiduals::new(diffusivity, upper_temperature, lower_temperature),
        }
    }

    pub fn residuals(&self) -> &HeatResiduals {
        &self.residuals
    }

    /// 4種類のバッチを評価し、目標値との差を返します。
    pub fn evaluate<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        batches: &TrainingBatches<B>,
    ) -> ResidualBatches<B> {
        let r = &self.residuals;
        ResidualBatches {
            equation: r.equation(model, batches.equation.points.clone())
                - batches.equation.targets.clone(),
            initial: r.initial(
                model,
                batches.initial.points.clone(),
                batches.initial.targets.clone(),
            ),
            boundary_upper: r.boundary_upper(model, batches.boundary_upper.points.clone())
                - batches.boundary_upper.targets.clone(),
            boundary_lower: r.boundary_lower(model, batches.boundary_lower.points.clone())
                - batches.boundary_lower.targets.clone(),
        }
    }
}
