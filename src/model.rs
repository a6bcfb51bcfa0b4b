use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Tanh};
use burn::prelude::Backend;
use burn::tensor::Tensor;

use crate::error::PinnError;

/// 入力 `(t, x)` に関する2階までの微分を運ぶテンソルの組（ジェット）。
///
/// すべて `[n, k]` 形状で、`value` の各成分に対して `∂/∂t`, `∂/∂x`, `∂²/∂x²` を保持します。
/// 通常のテンソル演算だけで伝播するため、逆モード自動微分のテープにそのまま記録され、
/// パラメータに関する勾配が微分項を通して流れます。
#[derive(Clone, Debug)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub d_t: Tensor<B, 2>,
    pub d_x: Tensor<B, 2>,
    pub d_xx: Tensor<B, 2>,
}

impl<B: Backend> Jet<B> {
    /// 座標 `[n, 2]` そのものを種にします（`∂(t,x)/∂t = (1,0)`, `∂(t,x)/∂x = (0,1)`）。
    pub fn seed(coords: Tensor<B, 2>) -> Self {
        let [n, _] = coords.dims();
        let device = coords.device();
        let ones = Tensor::<B, 2>::ones([n, 1], &device);
        let zeros = Tensor::<B, 2>::zeros([n, 1], &device);
        Self {
            d_t: Tensor::cat(vec![ones.clone(), zeros.clone()], 1),
            d_x: Tensor::cat(vec![zeros, ones], 1),
            d_xx: Tensor::zeros([n, 2], &device),
            value: coords,
        }
    }

    /// アフィン層 `y = a W + b` を通します。微分項にはバイアスが乗りません。
    pub fn linear(self, layer: &Linear<B>) -> Self {
        let weight = layer.weight.val();
        Self {
            value: layer.forward(self.value),
            d_t: self.d_t.matmul(weight.clone()),
            d_x: self.d_x.matmul(weight.clone()),
            d_xx: self.d_xx.matmul(weight),
        }
    }

    /// `h = tanh(z)` を通します。`h' = 1 - h²`, `h'' = -2 h h'`。
    pub fn tanh(self) -> Self {
        let h = self.value.tanh();
        let slope = h.clone().mul(h.clone()).neg().add_scalar(1.0);
        let curvature = h.clone().mul(slope.clone()).mul_scalar(-2.0);
        let d_x_sq = self.d_x.clone().mul(self.d_x.clone());
        Self {
            d_t: slope.clone().mul(self.d_t),
            d_x: slope.clone().mul(self.d_x),
            d_xx: slope.mul(self.d_xx) + curvature.mul(d_x_sq),
            value: h,
        }
    }
}

/// PINNの近似関数として使えるモジュール。
///
/// `forward` は `[n, 2]` の座標から `[n, 1]` の出力を返し、
/// `forward_jet` は同じ出力とその入力微分を返します。
pub trait Approximator<B: Backend>: Module<B> {
    fn forward(&self, coords: Tensor<B, 2>) -> Tensor<B, 2>;

    fn forward_jet(&self, coords: Tensor<B, 2>) -> Jet<B>;
}

/// 多層パーセプトロンの構成。
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 20)]
    pub hidden_width: usize,
    #[config(default = 3)]
    pub hidden_layers: usize,
}

impl ModelConfig {
    /// 隠れ層の幅と数がどちらも1以上であることを確認します。
    pub fn validate(&self) -> Result<(), PinnError> {
        if self.hidden_width == 0 || self.hidden_layers == 0 {
            return Err(PinnError::InvalidConfig {
                reason: format!(
                    "network needs at least one hidden layer of width >= 1, got {} x {}",
                    self.hidden_layers, self.hidden_width
                ),
            });
        }
        Ok(())
    }

    /// 新しいモデルを初期化します。
    ///
    /// 入力層が最初の隠れ層を兼ねるため、`hidden_layers = 0` は1層として扱います。
    /// 学習の入口では [`ModelConfig::validate`] で事前に弾いています。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let mut linears = Vec::with_capacity(self.hidden_layers + 1);
        linears.push(LinearConfig::new(2, self.hidden_width).init(device));
        for _ in 1..self.hidden_layers.max(1) {
            linears.push(LinearConfig::new(self.hidden_width, self.hidden_width).init(device));
        }
        let output = LinearConfig::new(self.hidden_width, 1).init(device);
        Model {
            linears,
            output,
            activation: Tanh::new(),
        }
    }
}

/// PINNの本体となるニューラルネットワークモデル。
///
/// 座標(t, x)を入力とし、その点における温度uを予測する多層パーセプトロン（MLP）です。
#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    linears: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Tanh,
}

impl<B: Backend> Approximator<B> for Model<B> {
    fn forward(&self, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = coords;
        for linear in &self.linears {
            x = linear.forward(x);
            x = self.activation.forward(x);
        }
        self.output.forward(x)
    }

    fn forward_jet(&self, coords: Tensor<B, 2>) -> Jet<B> {
        let mut jet = Jet::seed(coords);
        for linear in &self.linears {
            jet = jet.linear(linear).tanh();
        }
        jet.linear(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residual::input_gradients;
    use crate::TrainBackend;
    use approx::assert_relative_eq;
    use burn::tensor::TensorData;

    fn coords(device: &<TrainBackend as Backend>::Device) -> Tensor<TrainBackend, 2> {
        Tensor::from_data(
            TensorData::new(vec![0.0, 0.1, 0.5, 0.4, 1.2, 0.9, 2.0, 0.0], [4, 2]),
            device,
        )
    }

    fn values(tensor: Tensor<TrainBackend, 2>) -> Vec<f64> {
        tensor.into_data().iter::<f64>().collect()
    }

    #[test]
    fn jet_value_matches_forward() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TrainBackend>(&device);
        let plain = values(model.forward(coords(&device)));
        let jet = values(model.forward_jet(coords(&device)).value);
        for (a, b) in plain.iter().zip(&jet) {
            assert_relative_eq!(a, b, max_relative = 1e-12);
        }
    }

    #[test]
    fn jet_first_derivatives_match_reverse_mode() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_hidden_width(8)
            .init::<TrainBackend>(&device);
        let jet = model.forward_jet(coords(&device));
        let reverse: Vec<f64> = input_gradients(&model, coords(&device))
            .into_data()
            .iter::<f64>()
            .collect();
        let d_t = values(jet.d_t);
        let d_x = values(jet.d_x);
        for i in 0..4 {
            assert_relative_eq!(d_t[i], reverse[2 * i], epsilon = 1e-10);
            assert_relative_eq!(d_x[i], reverse[2 * i + 1], epsilon = 1e-10);
        }
    }

    #[test]
    fn jet_second_derivative_matches_differenced_gradient() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_hidden_width(8)
            .init::<TrainBackend>(&device);
        let h = 1e-5;
        let point = |x: f64| {
            Tensor::<TrainBackend, 2>::from_data(TensorData::new(vec![0.7, x], [1, 2]), &device)
        };
        let d_x_at = |x: f64| {
            let grads: Vec<f64> = input_gradients(&model, point(x))
                .into_data()
                .iter::<f64>()
                .collect();
            grads[1]
        };
        let expected = (d_x_at(0.3 + h) - d_x_at(0.3 - h)) / (2.0 * h);
        let d_xx = values(model.forward_jet(point(0.3)).d_xx)[0];
        assert_relative_eq!(d_xx, expected, epsilon = 1e-6, max_relative = 1e-4);
    }

    #[test]
    fn empty_hidden_stack_is_rejected() {
        let err = ModelConfig::new().with_hidden_layers(0).validate().unwrap_err();
        assert!(matches!(err, PinnError::InvalidConfig { .. }));
        assert!(ModelConfig::new().with_hidden_width(0).validate().is_err());
        assert!(ModelConfig::new().validate().is_ok());
    }
}
