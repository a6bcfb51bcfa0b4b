#![allow(dead_code)]

use burn::module::{Module, Param};
use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use heat_pinn::TrainBackend;
use heat_pinn::model::{Approximator, Jet};
use heat_pinn::pinn::{SampleBatch, TrainingBatches};

pub type B = TrainBackend;

/// `u = c0 + c1 x + A exp(-λ t) sin(k x)`。
///
/// `λ = alpha k²` のとき熱伝導方程式の厳密解になります。
#[derive(Module, Debug)]
pub struct SeparableMode<B: Backend> {
    offset: Param<Tensor<B, 1>>,
    slope: Param<Tensor<B, 1>>,
    amplitude: Param<Tensor<B, 1>>,
    decay: Param<Tensor<B, 1>>,
    wavenumber: Param<Tensor<B, 1>>,
}

impl<B: Backend> SeparableMode<B> {
    pub fn new(
        offset: f64,
        slope: f64,
        amplitude: f64,
        decay: f64,
        wavenumber: f64,
        device: &B::Device,
    ) -> Self {
        // `from_floats` は f32 を経由するので、f64 のまま TensorData から作ります
        let param = |v: f64| {
            Param::from_tensor(Tensor::<B, 1>::from_data(TensorData::new(vec![v], [1]), device))
        };
        Self {
            offset: param(offset),
            slope: param(slope),
            amplitude: param(amplitude),
            decay: param(decay),
            wavenumber: param(wavenumber),
        }
    }

    fn scalar(p: &Param<Tensor<B, 1>>) -> Tensor<B, 2> {
        p.val().reshape([1, 1])
    }
}

impl<B: Backend> Approximator<B> for SeparableMode<B> {
    fn forward(&self, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward_jet(coords).value
    }

    fn forward_jet(&self, coords: Tensor<B, 2>) -> Jet<B> {
        let [n, _] = coords.dims();
        let t = coords.clone().slice([0..n, 0..1]);
        let x = coords.slice([0..n, 1..2]);
        let decay = Self::scalar(&self.decay);
        let k = Self::scalar(&self.wavenumber);
        let slope = Self::scalar(&self.slope);

        let envelope = t.mul(decay.clone()).neg().exp().mul(Self::scalar(&self.amplitude));
        let phase = x.clone().mul(k.clone());
        let sin = phase.clone().sin();
        let cos = phase.cos();
        let mode = envelope.clone().mul(sin.clone());

        Jet {
            value: x.mul(slope.clone()).add(Self::scalar(&self.offset)) + mode.clone(),
            d_t: mode.clone().mul(decay).neg(),
            d_x: envelope.mul(cos).mul(k.clone()).add(slope),
            d_xx: mode.mul(k.clone()).mul(k).neg(),
        }
    }
}

pub fn points(coords: &[(f64, f64)]) -> Tensor<B, 2> {
    let device = Default::default();
    let data: Vec<f64> = coords.iter().flat_map(|&(t, x)| [t, x]).collect();
    Tensor::from_data(TensorData::new(data, [coords.len(), 2]), &device)
}

pub fn column(values: &[f64]) -> Tensor<B, 2> {
    let device = Default::default();
    Tensor::from_data(TensorData::new(values.to_vec(), [values.len(), 1]), &device)
}

/// 決定的な小さい格子で4種類のバッチを作ります。
pub fn grid_batches(
    n: usize,
    t_final: f64,
    u_init: impl Fn(f64) -> f64,
) -> TrainingBatches<B> {
    let s = |i: usize| (i as f64 + 0.5) / n as f64;
    let interior: Vec<(f64, f64)> = (0..n)
        .flat_map(|i| (0..n).map(move |j| (t_final * s(i), s(j))))
        .collect();
    let initial: Vec<(f64, f64)> = (0..n).map(|j| (0.0, s(j))).collect();
    let init_values: Vec<f64> = initial.iter().map(|&(_, x)| u_init(x)).collect();
    let upper_pts: Vec<(f64, f64)> = (0..n).map(|i| (t_final * s(i), 1.0)).collect();
    let lower_pts: Vec<(f64, f64)> = (0..n).map(|i| (t_final * s(i), 0.0)).collect();

    TrainingBatches {
        equation: SampleBatch::zero_target("equation", points(&interior)).unwrap(),
        initial: SampleBatch::new("initial", points(&initial), column(&init_values)).unwrap(),
        boundary_upper: SampleBatch::zero_target("boundary_upper", points(&upper_pts)).unwrap(),
        boundary_lower: SampleBatch::zero_target("boundary_lower", points(&lower_pts)).unwrap(),
    }
}
