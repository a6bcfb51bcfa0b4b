//! 構造化されたパラメータ集合と1次元ベクトルの相互変換。
//!
//! 準ニュートン法は平坦なベクトルしか扱えないため、モジュールの全パラメータを
//! 登録順（フィールドの宣言順）に連結します。形状とオフセットは最初に一度だけ記録します。

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Tensor, TensorData};

use crate::error::PinnError;

/// 1つのパラメータテンソルの位置情報。
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSlot {
    pub id: ParamId,
    pub shape: Vec<usize>,
    pub offset: usize,
}

impl ParamSlot {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// パラメータ集合のレイアウト。学習中は変化しません。
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterLayout {
    slots: Vec<ParamSlot>,
    len: usize,
}

impl ParameterLayout {
    pub fn from_module<B: Backend, M: Module<B>>(module: &M) -> Self {
        let mut recorder = LayoutRecorder { slots: Vec::new() };
        module.visit(&mut recorder);
        let len = recorder.slots.iter().map(ParamSlot::numel).sum();
        Self {
            slots: recorder.slots,
            len,
        }
    }

    /// 全要素数。
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }

    /// パラメータの値を1本のベクトルに連結します。
    pub fn flatten<B: Backend, M: Module<B>>(&self, module: &M) -> Result<Vec<f64>, PinnError> {
        let mut reader = ValueReader {
            collector: Collector::new(self),
        };
        module.visit(&mut reader);
        reader.collector.finish()
    }

    /// `backward` で得た勾配をパラメータと同じ順序で連結します。
    ///
    /// 計算グラフに現れなかったパラメータの勾配は0として扱います。
    pub fn flatten_gradients<B: AutodiffBackend, M: Module<B>>(
        &self,
        module: &M,
        grads: &B::Gradients,
    ) -> Result<Vec<f64>, PinnError> {
        let mut reader = GradientReader {
            grads,
            collector: Collector::new(self),
        };
        module.visit(&mut reader);
        reader.collector.finish()
    }

    /// ベクトルをモジュールのパラメータに書き戻します。
    ///
    /// 長さや形状が合わない場合は `ShapeMismatch` を返し、モジュールは変更しません。
    pub fn unflatten<B: Backend, M: Module<B>>(
        &self,
        module: &mut M,
        flat: &[f64],
    ) -> Result<(), PinnError> {
        if flat.len() != self.len {
            return Err(PinnError::ShapeMismatch {
                expected: self.len,
                actual: flat.len(),
            });
        }
        let mut writer = ValueWriter {
            layout: self,
            flat,
            index: 0,
            error: None,
        };
        let updated = module.clone().map(&mut writer);
        if let Some(err) = writer.error {
            return Err(err);
        }
        if writer.index != self.slots.len() {
            return Err(PinnError::ShapeMismatch {
                expected: self.slots.len(),
                actual: writer.index,
            });
        }
        *module = updated;
        Ok(())
    }
}

struct LayoutRecorder {
    slots: Vec<ParamSlot>,
}

impl<B: Backend> ModuleVisitor<B> for LayoutRecorder {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let offset = self.slots.last().map_or(0, |s| s.offset + s.numel());
        self.slots.push(ParamSlot {
            id,
            shape: tensor.dims().to_vec(),
            offset,
        });
    }
}

/// 訪問順にテンソルを受け取り、レイアウトと照合しながら値を連結します。
struct Collector<'a> {
    layout: &'a ParameterLayout,
    values: Vec<f64>,
    index: usize,
    error: Option<PinnError>,
}

impl<'a> Collector<'a> {
    fn new(layout: &'a ParameterLayout) -> Self {
        Self {
            layout,
            values: Vec::with_capacity(layout.len),
            index: 0,
            error: None,
        }
    }

    fn expect(&mut self, dims: &[usize]) -> Option<usize> {
        if self.error.is_some() {
            return None;
        }
        let index = self.index;
        self.index += 1;
        match self.layout.slots.get(index) {
            Some(slot) if slot.shape == dims => Some(slot.numel()),
            Some(slot) => {
                self.error = Some(PinnError::TensorShape {
                    index,
                    expected: slot.shape.clone(),
                    actual: dims.to_vec(),
                });
                None
            }
            None => {
                self.error = Some(PinnError::ShapeMismatch {
                    expected: self.layout.slots.len(),
                    actual: index + 1,
                });
                None
            }
        }
    }

    fn push(&mut self, data: TensorData) {
        self.values.extend(data.iter::<f64>());
    }

    fn finish(self) -> Result<Vec<f64>, PinnError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.values.len() != self.layout.len {
            return Err(PinnError::ShapeMismatch {
                expected: self.layout.len,
                actual: self.values.len(),
            });
        }
        Ok(self.values)
    }
}

struct ValueReader<'a> {
    collector: Collector<'a>,
}

impl<B: Backend> ModuleVisitor<B> for ValueReader<'_> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if self.collector.expect(&tensor.dims()).is_some() {
            self.collector.push(tensor.to_data());
        }
    }
}

struct GradientReader<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    collector: Collector<'a>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientReader<'_, B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let dims = tensor.dims();
        let Some(numel) = self.collector.expect(&dims) else {
            return;
        };
        match tensor.grad(self.grads) {
            Some(grad) => self.collector.push(grad.into_data()),
            None => self
                .collector
                .values
                .extend(std::iter::repeat_n(0.0, numel)),
        }
    }
}

struct ValueWriter<'a> {
    layout: &'a ParameterLayout,
    flat: &'a [f64],
    index: usize,
    error: Option<PinnError>,
}

impl<B: Backend> ModuleMapper<B> for ValueWriter<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let index = self.index;
        self.index += 1;
        if self.error.is_some() {
            return tensor;
        }
        let dims = tensor.dims();
        let slot = match self.layout.slots.get(index) {
            Some(slot) if slot.shape == dims => slot,
            Some(slot) => {
                self.error = Some(PinnError::TensorShape {
                    index,
                    expected: slot.shape.clone(),
                    actual: dims.to_vec(),
                });
                return tensor;
            }
            None => {
                self.error = Some(PinnError::ShapeMismatch {
                    expected: self.layout.slots.len(),
                    actual: index + 1,
                });
                return tensor;
            }
        };
        let values = self.flat[slot.offset..slot.offset + slot.numel()].to_vec();
        let require_grad = tensor.is_require_grad();
        Tensor::<B, D>::from_data(TensorData::new(values, dims), &tensor.device())
            .set_require_grad(require_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::TrainBackend;

    type B = TrainBackend;

    #[test]
    fn layout_offsets_are_contiguous() {
        let device = Default::default();
        let model = ModelConfig::new()
            .with_hidden_width(5)
            .with_hidden_layers(2)
            .init::<B>(&device);
        let layout = ParameterLayout::from_module(&model);
        // 2x5 + 5, 5x5 + 5, 5x1 + 1
        assert_eq!(layout.len(), 10 + 5 + 25 + 5 + 5 + 1);
        assert_eq!(layout.slots().len(), 6);
        let mut offset = 0;
        for slot in layout.slots() {
            assert_eq!(slot.offset, offset);
            offset += slot.numel();
        }
        assert_eq!(offset, layout.len());
    }

    #[test]
    fn round_trip_is_bit_identical() {
        let device = Default::default();
        let config = ModelConfig::new().with_hidden_width(6);
        let source = config.init::<B>(&device);
        let mut target = config.init::<B>(&device);
        let layout = ParameterLayout::from_module(&source);

        let flat = layout.flatten(&source).unwrap();
        assert_ne!(flat, layout.flatten(&target).unwrap());
        layout.unflatten(&mut target, &flat).unwrap();
        let back = layout.flatten(&target).unwrap();

        assert_eq!(flat.len(), back.len());
        for (a, b) in flat.iter().zip(&back) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        let shapes = |l: &ParameterLayout| -> Vec<Vec<usize>> {
            l.slots().iter().map(|s| s.shape.clone()).collect()
        };
        assert_eq!(shapes(&ParameterLayout::from_module(&target)), shapes(&layout));
    }

    #[test]
    fn short_vector_is_rejected_without_mutation() {
        let device = Default::default();
        let mut model = ModelConfig::new().init::<B>(&device);
        let layout = ParameterLayout::from_module(&model);
        let before = layout.flatten(&model).unwrap();

        let short = vec![0.5; layout.len() - 1];
        let err = layout.unflatten(&mut model, &short).unwrap_err();

        assert!(matches!(
            err,
            PinnError::ShapeMismatch { expected, actual } if expected == layout.len() && actual == layout.len() - 1
        ));
        assert_eq!(layout.flatten(&model).unwrap(), before);
    }

    #[test]
    fn foreign_layout_is_rejected() {
        let device = Default::default();
        let small = ModelConfig::new().with_hidden_width(4).init::<B>(&device);
        let mut wide = ModelConfig::new().with_hidden_width(6).init::<B>(&device);
        let layout = ParameterLayout::from_module(&small);
        let flat = layout.flatten(&small).unwrap();

        assert!(layout.unflatten(&mut wide, &flat).is_err());
        assert!(layout.flatten(&wide).is_err());
    }

    #[test]
    fn written_parameters_stay_trainable() {
        use crate::model::Approximator;

        let device = Default::default();
        let mut model = ModelConfig::new().with_hidden_width(4).init::<B>(&device);
        let layout = ParameterLayout::from_module(&model);
        let flat = layout.flatten(&model).unwrap();
        layout.unflatten(&mut model, &flat).unwrap();

        let coords = Tensor::<B, 2>::from_data(TensorData::new(vec![0.1, 0.2], [1, 2]), &device);
        let grads = model.forward(coords).sum().backward();
        let flat_grads = layout.flatten_gradients(&model, &grads).unwrap();
        assert_eq!(flat_grads.len(), layout.len());
        assert!(flat_grads.iter().any(|g| *g != 0.0));
    }
}
