/*!
Gated PixelCNN.

See <https://arxiv.org/abs/1606.05328> and <http://www.scottreed.info/files/iclr2017.pdf>.

A causally masked [`GatedPixelCnnLayer`] is used as the input layer instead of a masked
convolution. The masked Nx1 and 1xN convolutions are computed as unmasked (N/2+1)x1 and
1x(N/2+1) convolutions with extra padding, cropping the output back to the input extent.

Channels are not autoregressively masked, so each output depends on whole pixels and not
sub-pixels.

# Example
```
# use anyhow::Result;
# fn main() -> Result<()> {
use gated_pixelcnn::{
    gated_pixel_cnn::{GatedPixelCnn, SampleOptions},
    layer::Forward,
};
use ndarray::Array4;

let model = GatedPixelCnn::builder()
    .in_channels(1)
    .n_gated(1)
    .gated_channels(4)
    .head_channels(2)
    .seed(0)
    .build()?;
let probs = model.forward(Array4::zeros([1, 1, 5, 5]).view())?;
assert_eq!(probs.shape(), [1, 1, 1, 5, 5]);
let sample = model.sample(None, &SampleOptions::default().shape([4, 4]).seed(1))?;
assert!(sample.iter().all(|x| *x == 0. || *x == 1.));
# Ok(())
# }
```
*/
use crate::{
    error::PixelCnnError,
    layer::{Conv2, Forward, GatedActivation, Layer, Relu, Sigmoid},
    ops,
};
use anyhow::{bail, Result};
use log::{debug, trace};
use ndarray::{s, Array, Array4, Array5, ArrayView4};
use rand::{
    distributions::{Bernoulli, Distribution},
    rngs::StdRng,
    Rng, SeedableRng,
};

/// Builders and configuration.
pub mod builders;
pub use builders::{
    GatedPixelCnnBuilder, GatedPixelCnnConfig, GatedPixelCnnLayerBuilder, SampleOptions,
};

/// A Gated PixelCNN layer.
///
/// The layer takes `(vstack, hstack)` from the previous layer and returns
/// `(vstack, hstack, skip)`, where `skip` is the skip connection to the head.
///
/// The vertical stack at row r only sees rows <= r of its input. The horizontal stack at (r, c)
/// only sees columns < c (causal) or <= c (non-causal) of row r, plus the vertical stack of rows
/// < r through the link.
///
/// N.B.: This layer does *not* implement autoregressive channel masking.
#[derive(Layer, Clone, Debug)]
#[pixelcnn(crate)]
pub struct GatedPixelCnnLayer {
    #[pixelcnn(layer)]
    vstack_1xn: Conv2,
    #[pixelcnn(layer)]
    vstack_nx1: Conv2,
    #[pixelcnn(layer)]
    vstack_1x1: Conv2,
    #[pixelcnn(layer)]
    link: Conv2,
    #[pixelcnn(layer)]
    hstack_1xn: Conv2,
    #[pixelcnn(layer)]
    hstack_residual: Conv2,
    #[pixelcnn(layer)]
    hstack_skip: Conv2,
    activation: GatedActivation,
    kernel_size: usize,
    is_causal: bool,
}

impl GatedPixelCnnLayer {
    /// Returns a builder for creating a [`GatedPixelCnnLayer`].
    pub fn builder() -> GatedPixelCnnLayerBuilder {
        GatedPixelCnnLayerBuilder::default()
    }
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.vstack_1xn.inputs()
    }
    /// The number of output channels.
    pub fn out_channels(&self) -> usize {
        self.vstack_1xn.outputs()
    }
    /// The size of the (masked) kernel.
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }
    /// Whether the current pixel is masked out.
    ///
    /// Causal layers have no residual connection in the horizontal stack.
    pub fn is_causal(&self) -> bool {
        self.is_causal
    }
}

impl<'a> Forward<(ArrayView4<'a, f32>, ArrayView4<'a, f32>)> for GatedPixelCnnLayer {
    type Output = (Array4<f32>, Array4<f32>, Array4<f32>);
    fn forward(
        &self,
        (vstack_input, hstack_input): (ArrayView4<'a, f32>, ArrayView4<'a, f32>),
    ) -> Result<Self::Output> {
        if vstack_input.shape() != hstack_input.shape() {
            bail!(PixelCnnError::ShapeMismatch {
                op: "GatedPixelCnnLayer",
                expected: vstack_input.shape().to_vec(),
                found: hstack_input.shape().to_vec(),
            });
        }
        let (_, _, h, w) = vstack_input.dim();

        let vstack = self.vstack_1xn.forward(vstack_input)?;
        let mut vstack = ops::crop2(self.vstack_nx1.forward(vstack.view())?, [h, w]);
        let link = self.link.forward(vstack.view())?;
        vstack += &self.vstack_1x1.forward(vstack_input)?;
        let vstack = self.activation.forward(vstack)?;

        let mut hstack = ops::crop2(self.hstack_1xn.forward(hstack_input)?, [h, w]);
        hstack += &link;
        let hstack = self.activation.forward(hstack)?;
        let skip = self.hstack_skip.forward(hstack.view())?;
        let mut hstack = self.hstack_residual.forward(hstack.view())?;
        // The residual would leak the current pixel into later layers.
        if !self.is_causal {
            hstack += &hstack_input;
        }
        Ok((vstack, hstack, skip))
    }
}

#[derive(Layer, Clone, Debug)]
#[pixelcnn(crate)]
struct Head {
    relu: Relu,
    #[pixelcnn(layer)]
    conv1: Conv2<Relu>,
    #[pixelcnn(layer)]
    conv2: Conv2<Sigmoid>,
}

impl Forward<Array4<f32>> for Head {
    type Output = Array4<f32>;
    fn forward(&self, input: Array4<f32>) -> Result<Self::Output> {
        let x = self.relu.forward(input)?;
        let x = self.conv1.forward(x.view())?;
        self.conv2.forward(x.view())
    }
}

/// The Gated PixelCNN model.
///
/// A causal input layer, followed by `n_gated` non-causal gated layers. The skip connections of
/// every layer are summed and passed to the head, which predicts per pixel probabilities.
///
/// Given input of the form (N, C, H, W), the output is (N, out_dim, C, H, W).
#[derive(Layer, Clone, Debug)]
#[pixelcnn(crate)]
pub struct GatedPixelCnn {
    config: GatedPixelCnnConfig,
    #[pixelcnn(layer)]
    input: GatedPixelCnnLayer,
    #[pixelcnn(layer)]
    gated_layers: Vec<GatedPixelCnnLayer>,
    #[pixelcnn(layer)]
    head: Head,
}

impl GatedPixelCnn {
    /// Returns a builder for creating a [`GatedPixelCnn`].
    pub fn builder() -> GatedPixelCnnBuilder {
        GatedPixelCnnBuilder::default()
    }
    /// The configuration the model was built with.
    pub fn config(&self) -> &GatedPixelCnnConfig {
        &self.config
    }
    /// Samples new images.
    ///
    /// Only entries of `condition_on` with values < 0 are sampled, conditioned on all entries
    /// before them in raster order. If `condition_on` is `None`, an unconditional sample of
    /// `options.batch_size` images with `options.height` x `options.width` pixels is generated.
    ///
    /// The rng is seeded with `options.seed` or from entropy.
    ///
    /// **Errors**
    ///
    /// See [`.sample_canvas()`](Self::sample_canvas()).
    pub fn sample(
        &self,
        condition_on: Option<ArrayView4<f32>>,
        options: &SampleOptions,
    ) -> Result<Array4<f32>> {
        let canvas = if let Some(condition_on) = condition_on {
            condition_on.to_owned()
        } else {
            Array::from_elem(
                [
                    options.batch_size,
                    self.config.in_channels,
                    options.height,
                    options.width,
                ],
                -1.,
            )
        };
        let mut rng = if let Some(seed) = options.seed {
            StdRng::seed_from_u64(seed)
        } else {
            StdRng::from_entropy()
        };
        self.sample_canvas(canvas, &mut rng)
    }
    /// Samples the unknown (< 0) entries of `canvas` in raster order.
    ///
    /// Each pixel is drawn from a Bernoulli distribution with the probability predicted by a
    /// forward pass over the current canvas. Known entries, including those sampled earlier, are
    /// never overwritten.
    ///
    /// **Errors**
    /// - The model has `out_dim` != 1 or more than 1 channel.
    /// - The canvas does not have 1 channel.
    /// - A predicted probability is not in [0, 1].
    pub fn sample_canvas<R: Rng + ?Sized>(
        &self,
        mut canvas: Array4<f32>,
        rng: &mut R,
    ) -> Result<Array4<f32>> {
        let GatedPixelCnnConfig {
            in_channels,
            out_dim,
            ..
        } = self.config;
        if out_dim != 1 {
            bail!(PixelCnnError::Unsupported(format!(
                "sampling requires out_dim = 1, found {out_dim}"
            )));
        }
        if in_channels != 1 {
            bail!(PixelCnnError::Unsupported(format!(
                "sampling requires 1 channel, found {in_channels}"
            )));
        }
        let (n, c, h, w) = canvas.dim();
        if c != 1 {
            bail!(PixelCnnError::Unsupported(format!(
                "sampling requires a canvas with 1 channel, found {c}"
            )));
        }
        debug!("sampling {n} images of {h} x {w}");
        for row in 0..h {
            for column in 0..w {
                if !canvas
                    .slice(s![.., 0, row, column])
                    .iter()
                    .any(|x| *x < 0.)
                {
                    continue;
                }
                let probs = self.forward(canvas.view())?;
                for (b, p) in probs.slice(s![.., 0, 0, row, column]).iter().enumerate() {
                    let x = &mut canvas[(b, 0, row, column)];
                    if *x < 0. {
                        let bernoulli = Bernoulli::new(f64::from(*p))?;
                        *x = if bernoulli.sample(rng) { 1. } else { 0. };
                    }
                }
            }
            trace!("sampled row {}/{h}", row + 1);
        }
        debug!("sampled {n} images");
        Ok(canvas)
    }
}

impl<'a> Forward<ArrayView4<'a, f32>> for GatedPixelCnn {
    type Output = Array5<f32>;
    fn forward(&self, input: ArrayView4<'a, f32>) -> Result<Self::Output> {
        let GatedPixelCnnConfig {
            in_channels,
            out_dim,
            ..
        } = self.config;
        let (n, c, h, w) = input.dim();
        if c != in_channels {
            bail!(PixelCnnError::ShapeMismatch {
                op: "GatedPixelCnn",
                expected: vec![n, in_channels, h, w],
                found: input.shape().to_vec(),
            });
        }
        let (mut vstack, mut hstack, mut skip_connections) = self.input.forward((input, input))?;
        for gated_layer in self.gated_layers.iter() {
            let (next_vstack, next_hstack, skip) =
                gated_layer.forward((vstack.view(), hstack.view()))?;
            vstack = next_vstack;
            hstack = next_hstack;
            skip_connections += &skip;
        }
        let output = self.head.forward(skip_connections)?;
        Ok(output.into_shape([n, out_dim, c, h, w])?)
    }
}

#[cfg(test)]
mod tests;
