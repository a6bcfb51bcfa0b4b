use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;

use crate::model::Approximator;

/// 熱伝導方程式・初期条件・境界条件の残差を組み立てます。
///
/// どの残差も `[n, 2]` の座標バッチから `[n, 1]` の残差バッチを返し、
/// 理想的にはすべて0になります。
#[derive(Clone, Debug, PartialEq)]
pub struct HeatResiduals {
    pub diffusivity: f64,
    pub upper_temperature: f64,
    pub lower_temperature: f64,
}

impl HeatResiduals {
    pub fn new(diffusivity: f64, upper_temperature: f64, lower_temperature: f64) -> Self {
        Self {
            diffusivity,
            upper_temperature,
            lower_temperature,
        }
    }

    /// 方程式の残差 `u_t - alpha * u_xx`。
    ///
    /// `u_t`, `u_xx` は2階の前進モード・ジェットで厳密に求め、
    /// 結果は逆モードのテープ上に残るのでパラメータで微分できます。
    pub fn equation<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        coords: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let jet = model.forward_jet(coords);
        jet.d_t - jet.d_xx.mul_scalar(self.diffusivity)
    }

    /// 初期条件の残差 `u(0, x) - u_init`。`coords` の `t` は0であることが前提です。
    pub fn initial<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        coords: Tensor<B, 2>,
        u_init: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        model.forward(coords) - u_init
    }

    /// 上側境界 `x = x_max` の残差 `u - T_up`。
    pub fn boundary_upper<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        coords: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        model.forward(coords).sub_scalar(self.upper_temperature)
    }

    /// 下側境界 `x = x_min` の残差 `u - T_down`。
    pub fn boundary_lower<B: Backend, M: Approximator<B>>(
        &self,
        model: &M,
        coords: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        model.forward(coords).sub_scalar(self.lower_temperature)
    }
}

/// 出力の入力座標に関する勾配 `[∂u/∂t, ∂u/∂x]` を逆モードで計算します。
///
/// 結果はテープから切り離された内部バックエンドのテンソルです。
pub fn input_gradients<B: AutodiffBackend, M: Approximator<B>>(
    model: &M,
    coords: Tensor<B, 2>,
) -> Tensor<B::InnerBackend, 2> {
    let [n, d] = coords.dims();
    let coords_grad = coords.detach().require_grad();
    let u = model.forward(coords_grad.clone());
    let grads = u.sum().backward();
    coords_grad
        .grad(&grads)
        .unwrap_or_else(|| Tensor::zeros([n, d], &coords_grad.device()))
}
