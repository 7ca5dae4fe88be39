use super::{GatedPixelCnn, GatedPixelCnnLayer, Head};
use crate::{
    error::PixelCnnError,
    layer::{Conv2, GatedActivation, Layer, Relu, Sigmoid},
};
use anyhow::{bail, Result};
use log::{debug, log_enabled, Level};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Builder for creating a [`GatedPixelCnnLayer`].
#[derive(Debug, Clone)]
pub struct GatedPixelCnnLayerBuilder {
    inputs: usize,
    outputs: usize,
    kernel_size: usize,
    causal: bool,
}

impl Default for GatedPixelCnnLayerBuilder {
    fn default() -> Self {
        Self {
            inputs: 0,
            outputs: 0,
            kernel_size: 3,
            causal: false,
        }
    }
}

impl GatedPixelCnnLayerBuilder {
    /// Sets the number of input channels.
    pub fn inputs(self, inputs: usize) -> Self {
        Self { inputs, ..self }
    }
    /// Sets the number of output channels.
    pub fn outputs(self, outputs: usize) -> Self {
        Self { outputs, ..self }
    }
    /// Sets the size of the (masked) kernel. Defaults to 3.
    pub fn kernel_size(self, kernel_size: usize) -> Self {
        Self {
            kernel_size,
            ..self
        }
    }
    /// Whether the layer is causal. Defaults to false.
    ///
    /// If true, the current pixel is masked out so the output only depends on pixels to the left
    /// and above, and the residual connection of the horizontal stack is removed.
    pub fn causal(self, causal: bool) -> Self {
        Self { causal, ..self }
    }
    /// Builds the layer, initializing parameters with [`rand::thread_rng()`].
    pub fn build(self) -> Result<GatedPixelCnnLayer> {
        self.build_with_rng(&mut rand::thread_rng())
    }
    /// Builds the layer, initializing parameters with `rng`.
    ///
    /// **Errors**
    /// - `kernel_size` is even.
    /// - `inputs` or `outputs` is 0.
    /// - The layer is not causal and `inputs` != `outputs`, so the residual can't be added.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<GatedPixelCnnLayer> {
        let Self {
            inputs,
            outputs,
            kernel_size,
            causal,
        } = self;
        if kernel_size % 2 == 0 {
            bail!(PixelCnnError::EvenKernel(kernel_size));
        }
        if inputs == 0 || outputs == 0 {
            bail!(PixelCnnError::InvalidConfig(format!(
                "GatedPixelCnnLayer requires inputs and outputs > 0, found inputs = {inputs} outputs = {outputs}"
            )));
        }
        if !causal && inputs != outputs {
            bail!(PixelCnnError::InvalidConfig(format!(
                "non causal GatedPixelCnnLayer requires inputs = outputs for the residual, found inputs = {inputs} outputs = {outputs}"
            )));
        }
        let padding = (kernel_size - 1) / 2;
        let half = kernel_size / 2 + 1;
        let conv = |inputs: usize, outputs: usize, filter: [usize; 2], padding: [usize; 2]| {
            Conv2::builder()
                .inputs(inputs)
                .outputs(outputs)
                .filter(filter)
                .padding(padding)
                .bias(true)
        };
        let vstack_1xn =
            conv(inputs, outputs, [1, kernel_size], [0, padding]).build_with_rng(rng)?;
        let vstack_nx1 =
            conv(outputs, 2 * outputs, [half, 1], [padding + 1, 0]).build_with_rng(rng)?;
        let vstack_1x1 = conv(inputs, 2 * outputs, [1, 1], [0, 0]).build_with_rng(rng)?;
        let link = conv(2 * outputs, 2 * outputs, [1, 1], [0, 0]).build_with_rng(rng)?;
        let hstack_1xn = conv(
            inputs,
            2 * outputs,
            [1, half],
            [0, padding + usize::from(causal)],
        )
        .build_with_rng(rng)?;
        let hstack_residual = conv(outputs, outputs, [1, 1], [0, 0]).build_with_rng(rng)?;
        let hstack_skip = conv(outputs, outputs, [1, 1], [0, 0]).build_with_rng(rng)?;
        Ok(GatedPixelCnnLayer {
            vstack_1xn,
            vstack_nx1,
            vstack_1x1,
            link,
            hstack_1xn,
            hstack_residual,
            hstack_skip,
            activation: GatedActivation,
            kernel_size,
            is_causal: causal,
        })
    }
}

/// Hyperparameters of a [`GatedPixelCnn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatedPixelCnnConfig {
    /// The number of channels in the input.
    pub in_channels: usize,
    /// The dimensionality of the output per input channel.
    pub out_dim: usize,
    /// The number of gated layers, not including the input layer.
    pub n_gated: usize,
    /// The number of channels in the gated layers.
    pub gated_channels: usize,
    /// The number of channels in the 1x1 convolutions of the head.
    pub head_channels: usize,
    /// The kernel size of the causal input layer.
    pub input_kernel_size: usize,
    /// The kernel size of the gated layers.
    pub gated_kernel_size: usize,
}

impl Default for GatedPixelCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_dim: 1,
            n_gated: 10,
            gated_channels: 128,
            head_channels: 32,
            input_kernel_size: 7,
            gated_kernel_size: 3,
        }
    }
}

impl GatedPixelCnnConfig {
    /// Checks that the config describes a valid model.
    ///
    /// **Errors**
    /// - A channel count or `out_dim` is 0.
    /// - A kernel size is even.
    pub fn validate(&self) -> Result<()> {
        let Self {
            in_channels,
            out_dim,
            n_gated: _,
            gated_channels,
            head_channels,
            input_kernel_size,
            gated_kernel_size,
        } = *self;
        for (name, value) in [
            ("in_channels", in_channels),
            ("out_dim", out_dim),
            ("gated_channels", gated_channels),
            ("head_channels", head_channels),
        ] {
            if value == 0 {
                bail!(PixelCnnError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        for kernel_size in [input_kernel_size, gated_kernel_size] {
            if kernel_size % 2 == 0 {
                bail!(PixelCnnError::EvenKernel(kernel_size));
            }
        }
        Ok(())
    }
}

/// Builder for creating a [`GatedPixelCnn`].
#[derive(Debug, Clone, Default)]
pub struct GatedPixelCnnBuilder {
    config: GatedPixelCnnConfig,
    seed: Option<u64>,
}

impl GatedPixelCnnBuilder {
    /// Replaces the config.
    pub fn config(self, config: GatedPixelCnnConfig) -> Self {
        Self { config, ..self }
    }
    /// Sets the number of input channels. Defaults to 1.
    pub fn in_channels(mut self, in_channels: usize) -> Self {
        self.config.in_channels = in_channels;
        self
    }
    /// Sets the dimensionality of the output per channel. Defaults to 1.
    pub fn out_dim(mut self, out_dim: usize) -> Self {
        self.config.out_dim = out_dim;
        self
    }
    /// Sets the number of gated layers, not including the input layer. Defaults to 10.
    pub fn n_gated(mut self, n_gated: usize) -> Self {
        self.config.n_gated = n_gated;
        self
    }
    /// Sets the number of channels in the gated layers. Defaults to 128.
    pub fn gated_channels(mut self, gated_channels: usize) -> Self {
        self.config.gated_channels = gated_channels;
        self
    }
    /// Sets the number of channels in the head. Defaults to 32.
    pub fn head_channels(mut self, head_channels: usize) -> Self {
        self.config.head_channels = head_channels;
        self
    }
    /// Sets the kernel size of the input layer. Defaults to 7.
    pub fn input_kernel_size(mut self, input_kernel_size: usize) -> Self {
        self.config.input_kernel_size = input_kernel_size;
        self
    }
    /// Sets the kernel size of the gated layers. Defaults to 3.
    pub fn gated_kernel_size(mut self, gated_kernel_size: usize) -> Self {
        self.config.gated_kernel_size = gated_kernel_size;
        self
    }
    /// Seeds the initialization of the parameters. Defaults to entropy.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }
    /// Builds the model.
    ///
    /// **Errors**
    ///
    /// See [`GatedPixelCnnConfig::validate()`].
    pub fn build(self) -> Result<GatedPixelCnn> {
        let mut rng = if let Some(seed) = self.seed {
            StdRng::seed_from_u64(seed)
        } else {
            StdRng::from_entropy()
        };
        self.build_with_rng(&mut rng)
    }
    /// Builds the model, initializing parameters with `rng`.
    ///
    /// The seed is ignored.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<GatedPixelCnn> {
        let config = self.config;
        config.validate()?;
        let GatedPixelCnnConfig {
            in_channels,
            out_dim,
            n_gated,
            gated_channels,
            head_channels,
            input_kernel_size,
            gated_kernel_size,
        } = config;
        let input = GatedPixelCnnLayer::builder()
            .inputs(in_channels)
            .outputs(gated_channels)
            .kernel_size(input_kernel_size)
            .causal(true)
            .build_with_rng(rng)?;
        let gated_layers = (0..n_gated)
            .map(|_| {
                GatedPixelCnnLayer::builder()
                    .inputs(gated_channels)
                    .outputs(gated_channels)
                    .kernel_size(gated_kernel_size)
                    .build_with_rng(rng)
            })
            .collect::<Result<Vec<_>>>()?;
        let head = Head {
            relu: Relu,
            conv1: Conv2::builder()
                .inputs(gated_channels)
                .outputs(head_channels)
                .filter([1, 1])
                .bias(true)
                .activation(Relu)
                .build_with_rng(rng)?,
            conv2: Conv2::builder()
                .inputs(head_channels)
                .outputs(out_dim * in_channels)
                .filter([1, 1])
                .bias(true)
                .activation(Sigmoid)
                .build_with_rng(rng)?,
        };
        let model = GatedPixelCnn {
            config,
            input,
            gated_layers,
            head,
        };
        if log_enabled!(Level::Debug) {
            debug!(
                "built GatedPixelCnn {config:?} with {} parameters",
                model.parameters().iter().map(|x| x.len()).sum::<usize>()
            );
        }
        Ok(model)
    }
}

/// Options for [`GatedPixelCnn::sample()`].
///
/// The batch size and shape only apply to unconditional samples, otherwise the shape of the
/// conditioning canvas is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleOptions {
    /// The number of images. Defaults to 1.
    pub batch_size: usize,
    /// The height of the images. Defaults to 28.
    pub height: usize,
    /// The width of the images. Defaults to 28.
    pub width: usize,
    /// Seeds the rng. Defaults to entropy.
    pub seed: Option<u64>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            height: 28,
            width: 28,
            seed: None,
        }
    }
}

impl SampleOptions {
    /// Sets the number of images.
    pub fn batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }
    /// Sets the image shape, `[height, width]`.
    pub fn shape(self, [height, width]: [usize; 2]) -> Self {
        Self {
            height,
            width,
            ..self
        }
    }
    /// Sets the seed.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }
}
