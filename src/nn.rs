//! Neural Network inference.

use std::{path::Path, sync::Arc};

use anyhow::{bail, Context};
use tract_onnx::prelude::{
    tract_ndarray::{Array4, ArrayD},
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, Tensor, TypedFact, TypedOp,
};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

/// A convolutional neural network (CNN) that operates on RGB image data.
///
/// Color channels are mapped linearly from `0..=255` to `0.0..=1.0`, which is what the MediaPipe
/// hand networks expect.
pub struct Cnn {
    model: Model,
    shape: CnnInputShape,
    width: u32,
    height: u32,
}

impl Cnn {
    /// Loads and optimizes an ONNX network from `path`.
    ///
    /// The network must have exactly one input with a shape that matches `shape`.
    pub fn load(path: &Path, shape: CnnInputShape) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!(
                "neural network file `{}` must have `.onnx` extension",
                path.display()
            ),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_optimized())
            .with_context(|| format!("failed to load network `{}`", path.display()))?;
        let model = SimplePlan::new(graph)?;

        let inputs = model.model().inputs.len();
        if inputs != 1 {
            bail!("CNN network has to take exactly 1 input, this one takes {inputs}");
        }
        let fact = model.model().input_fact(0)?;
        let Some(tensor_shape) = fact.shape.as_concrete() else {
            bail!("network input shape of `{}` is not concrete", path.display());
        };
        let (w, h) = match (shape, tensor_shape) {
            (CnnInputShape::NCHW, &[1, 3, h, w]) | (CnnInputShape::NHWC, &[1, h, w, 3]) => (w, h),
            _ => bail!(
                "invalid model input shape for {:?} CNN: {:?}",
                shape,
                tensor_shape
            ),
        };

        log::debug!(
            "loaded network `{}` ({}x{} input, {} outputs)",
            path.display(),
            w,
            h,
            model.model().outputs.len(),
        );

        Ok(Self {
            model,
            shape,
            width: w.try_into()?,
            height: h.try_into()?,
        })
    }

    /// Returns the expected input image width.
    #[inline]
    pub fn input_width(&self) -> u32 {
        self.width
    }

    /// Returns the expected input image height.
    #[inline]
    pub fn input_height(&self) -> u32 {
        self.height
    }

    /// Runs the network, filling its input from `sample`.
    ///
    /// `sample` is called with the `(x, y)` input pixel coordinate and returns the RGB color to
    /// place there. This lets callers crop, scale, and rotate the source image in a single pass.
    pub fn estimate(&self, sample: impl Fn(u32, u32) -> [u8; 3]) -> anyhow::Result<Outputs> {
        let (w, h) = (self.width as usize, self.height as usize);
        let input: Tensor = match self.shape {
            CnnInputShape::NCHW => Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                f32::from(sample(x as u32, y as u32)[c]) / 255.0
            })
            .into(),
            CnnInputShape::NHWC => Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                f32::from(sample(x as u32, y as u32)[c]) / 255.0
            })
            .into(),
        };

        let outputs = self.model.run(tvec![TValue::from_const(Arc::new(input))])?;
        let tensors = outputs
            .iter()
            .map(|value| Ok(value.to_array_view::<f32>()?.to_owned()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        log::trace!(
            "inference output shapes: {:?}",
            tensors.iter().map(|t| t.shape()).collect::<Vec<_>>()
        );

        Ok(Outputs { tensors })
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    tensors: Vec<ArrayD<f32>>,
}

impl Outputs {
    /// Creates an output list from raw tensors.
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Returns the first output tensor whose shape satisfies `pred`.
    pub fn find(&self, pred: impl Fn(&[usize]) -> bool) -> Option<&ArrayD<f32>> {
        self.tensors.iter().find(|t| pred(t.shape()))
    }

    pub fn get(&self, index: usize) -> Option<&ArrayD<f32>> {
        self.tensors.get(index)
    }
}

#[cfg(test)]
mod tests {
    use tract_onnx::prelude::tract_ndarray::IxDyn;

    use super::*;

    #[test]
    fn rejects_wrong_extension() {
        let err = Cnn::load(Path::new("palm_detection.tflite"), CnnInputShape::NCHW)
            .err()
            .unwrap();
        assert!(err.to_string().contains(".onnx"), "{err}");
    }

    #[test]
    fn missing_file_has_context() {
        let err = Cnn::load(Path::new("does/not/exist.onnx"), CnnInputShape::NCHW)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("does/not/exist.onnx"), "{err:#}");
    }

    #[test]
    fn find_output_by_shape() {
        let outputs = Outputs::new(vec![
            ArrayD::zeros(IxDyn(&[1, 1])),
            ArrayD::zeros(IxDyn(&[1, 63])),
        ]);
        assert_eq!(outputs.len(), 2);
        assert!(!outputs.is_empty());
        let lm = outputs.find(|shape| shape == [1, 63]).unwrap();
        assert_eq!(lm.len(), 63);
        assert!(outputs.find(|shape| shape == [1, 2016, 18]).is_none());
        assert!(outputs.get(2).is_none());
    }
}
