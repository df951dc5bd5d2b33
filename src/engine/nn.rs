//! `tract` plumbing shared by the palm detection and landmark networks.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tract_onnx::prelude::{
    tract_ndarray, tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, Tensor,
    TypedFact, TypedOp,
};

use crate::image::Frame;
use crate::resolution::Resolution;

use super::roi::RotatedRect;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A loaded network taking one `[1, 3, H, W]` RGB input with values in 0.0..=1.0.
pub struct Network {
    plan: Plan,
    input_res: Resolution,
}

impl Network {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => bail!("neural network file must have `.onnx` extension"),
        }

        let graph = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .into_optimized()?;

        let input_res = match graph.input_fact(0)?.shape.as_concrete() {
            Some(&[1, 3, h, w]) => Resolution::new(w.try_into()?, h.try_into()?),
            shape => bail!("unsupported network input shape {:?} in {}", shape, path.display()),
        };
        let plan = SimplePlan::new(graph)?;

        log::debug!("loaded {} (input {})", path.display(), input_res);
        Ok(Self { plan, input_res })
    }

    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on the part of `frame` covered by `view`.
    pub fn run(&self, frame: &Frame, view: &RotatedRect) -> anyhow::Result<TVec<TValue>> {
        let input = input_tensor(frame, view, self.input_res);
        Ok(self.plan.run(tvec!(TValue::from_const(Arc::new(input))))?)
    }
}

/// Samples the part of `frame` covered by `view` into an NCHW tensor of size `res`, mapping
/// colors to 0.0..=1.0.
///
/// `view` is stretched to `res`. Pixels outside of the frame are black.
pub fn input_tensor(frame: &Frame, view: &RotatedRect, res: Resolution) -> Tensor {
    let (h, w) = (res.height() as usize, res.width() as usize);
    let (vw, vh) = (view.rect().width(), view.rect().height());
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let array = tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
        let u = (x as f32 + 0.5) / w as f32 * vw;
        let v = (y as f32 + 0.5) / h as f32 * vh;
        let [px, py] = view.transform_out([u, v]);
        if px < 0.0 || py < 0.0 || px >= fw || py >= fh {
            return 0.0;
        }
        f32::from(frame.get(px as u32, py as u32)[c]) / 255.0
    });
    array.into()
}

pub fn scalar(tensor: &Tensor) -> anyhow::Result<f32> {
    match tensor.as_slice::<f32>()? {
        [value] => Ok(*value),
        other => bail!("expected a single value, got {} values", other.len()),
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use approx::assert_relative_eq;

    use crate::engine::roi::Rect;

    use super::*;

    fn full_view(frame: &Frame) -> RotatedRect {
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        Rect::from_center(w * 0.5, h * 0.5, w, h).into()
    }

    #[test]
    fn input_tensor_layout() {
        let frame = Frame::from_fn(2, 2, |x, y| match (x, y) {
            (0, 0) => [255, 0, 51],
            _ => [0; 3],
        });
        let tensor = input_tensor(&frame, &full_view(&frame), Resolution::new(4, 4));
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);

        let data = tensor.as_slice::<f32>().unwrap();
        let at = |c: usize, y: usize, x: usize| data[c * 16 + y * 4 + x];
        assert_relative_eq!(at(0, 0, 0), 1.0);
        assert_relative_eq!(at(1, 0, 0), 0.0);
        assert_relative_eq!(at(2, 1, 1), 0.2, epsilon = 1e-6);
        assert_relative_eq!(at(0, 3, 3), 0.0);
    }

    #[test]
    fn pads_outside_of_frame() {
        let frame = Frame::from_fn(2, 1, |_, _| [255; 3]);
        // Square view, reaching one pixel above the frame.
        let view: RotatedRect = Rect::from_center(1.0, 0.0, 2.0, 2.0).into();
        let tensor = input_tensor(&frame, &view, Resolution::new(2, 2));
        let data = tensor.as_slice::<f32>().unwrap();
        assert_eq!(&data[..4], &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn samples_rotated_view() {
        // Only the top right pixel is lit.
        let frame = Frame::from_fn(2, 2, |x, y| if (x, y) == (1, 0) { [255; 3] } else { [0; 3] });
        let view = RotatedRect::new(*full_view(&frame).rect(), PI);
        let tensor = input_tensor(&frame, &view, Resolution::new(2, 2));
        let data = tensor.as_slice::<f32>().unwrap();
        // Upside down, it shows up at the bottom left.
        assert_eq!(&data[..4], &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
    }
}
