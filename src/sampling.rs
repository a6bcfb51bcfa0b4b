use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::Rng;

use crate::config::{HeatProblemConfig, SamplingConfig};
use crate::error::PinnError;
use crate::pinn::{SampleBatch, TrainingBatches};

/// 4つの領域からコロケーション点を一様に抽出します。
///
/// 初期バッチは `t = 0`、境界バッチは `x = x_max` / `x = x_min` に固定されます。
pub fn sample_batches<B: Backend, R: Rng>(
    problem: &HeatProblemConfig,
    sizes: &SamplingConfig,
    rng: &mut R,
    device: &B::Device,
) -> Result<TrainingBatches<B>, PinnError> {
    let span_x = problem.x_max - problem.x_min;
    let mut draw = |n: usize, t: Option<f64>, x: Option<f64>| {
        let mut coords = Vec::with_capacity(n * 2);
        for _ in 0..n {
            coords.push(t.unwrap_or_else(|| problem.t_final * rng.random::<f64>()));
            coords.push(x.unwrap_or_else(|| problem.x_min + span_x * rng.random::<f64>()));
        }
        Tensor::<B, 2>::from_data(TensorData::new(coords, [n, 2]), device)
    };

    let equation = draw(sizes.equation, None, None);
    let initial = draw(sizes.initial, Some(0.0), None);
    let upper = draw(sizes.boundary, None, Some(problem.x_max));
    let lower = draw(sizes.boundary, None, Some(problem.x_min));

    let u_init = Tensor::<B, 2>::ones([sizes.initial, 1], device)
        .mul_scalar(problem.initial_temperature);

    Ok(TrainingBatches {
        equation: SampleBatch::zero_target("equation", equation)?,
        initial: SampleBatch::new("initial", initial, u_init)?,
        boundary_upper: SampleBatch::zero_target("boundary_upper", upper)?,
        boundary_lower: SampleBatch::zero_target("boundary_lower", lower)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrainBackend;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn columns(tensor: &Tensor<TrainBackend, 2>) -> (Vec<f64>, Vec<f64>) {
        let values: Vec<f64> = tensor.to_data().iter::<f64>().collect();
        let t = values.iter().step_by(2).copied().collect();
        let x = values.iter().skip(1).step_by(2).copied().collect();
        (t, x)
    }

    #[test]
    fn regimes_sit_on_their_slices() {
        let device = Default::default();
        let problem = HeatProblemConfig::new();
        let sizes = SamplingConfig::new()
            .with_equation(64)
            .with_initial(16)
            .with_boundary(8);
        let mut rng = StdRng::seed_from_u64(7);
        let batches =
            sample_batches::<TrainBackend, _>(&problem, &sizes, &mut rng, &device).unwrap();

        let (t, x) = columns(batches.equation.points());
        assert_eq!(t.len(), 64);
        assert!(t.iter().all(|t| (0.0..=2.0).contains(t)));
        assert!(x.iter().all(|x| (0.0..=1.0).contains(x)));

        let (t, _) = columns(batches.initial.points());
        assert!(t.iter().all(|t| *t == 0.0));
        let targets: Vec<f64> = batches.initial.targets().to_data().iter::<f64>().collect();
        assert!(targets.iter().all(|u| *u == 95.0));

        let (_, x) = columns(batches.boundary_upper.points());
        assert!(x.iter().all(|x| *x == 1.0));
        let (_, x) = columns(batches.boundary_lower.points());
        assert!(x.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn same_seed_same_points() {
        let device = Default::default();
        let problem = HeatProblemConfig::new();
        let sizes = SamplingConfig::new().with_equation(10);
        let draw = || {
            let mut rng = StdRng::seed_from_u64(3);
            let batches =
                sample_batches::<TrainBackend, _>(&problem, &sizes, &mut rng, &device).unwrap();
            columns(batches.equation.points())
        };
        assert_eq!(draw(), draw());
    }
}
