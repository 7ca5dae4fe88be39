use super::{Conv2, Identity};
use crate::{
    error::PixelCnnError,
    parameter::{Parameter1, Parameter4},
};
use anyhow::{bail, Result};
use ndarray::Array;
use rand::{
    distributions::{Distribution, Uniform},
    Rng,
};

/// The default init of the reference framework, uniform in `(-a, a)` where `a = 1 / sqrt(fan_in)`.
fn fan_in_uniform(fan_in: usize) -> Uniform<f32> {
    let a = 1. / (fan_in as f32).sqrt();
    Uniform::new(-a, a)
}

/// Builder for creating a [`Conv2`].
#[derive(Debug, Clone)]
pub struct Conv2Builder<A = Identity> {
    inputs: usize,
    outputs: usize,
    filter: [usize; 2],
    padding: [usize; 2],
    bias: bool,
    activation: A,
}

impl Default for Conv2Builder {
    fn default() -> Self {
        Self {
            inputs: 0,
            outputs: 0,
            filter: [0, 0],
            padding: [0, 0],
            bias: false,
            activation: Identity,
        }
    }
}

impl<A> Conv2Builder<A> {
    /// Sets the number of input channels.
    pub fn inputs(self, inputs: usize) -> Self {
        Self { inputs, ..self }
    }
    /// Sets the number of output channels.
    pub fn outputs(self, outputs: usize) -> Self {
        Self { outputs, ..self }
    }
    /// Sets the filter size, `[height, width]`.
    pub fn filter(self, filter: [usize; 2]) -> Self {
        Self { filter, ..self }
    }
    /// Sets the zero padding, `[height, width]`. Defaults to 0.
    pub fn padding(self, padding: [usize; 2]) -> Self {
        Self { padding, ..self }
    }
    /// Whether to add a bias. Defaults to false.
    pub fn bias(self, bias: bool) -> Self {
        Self { bias, ..self }
    }
    /// Sets the activation applied after the bias. Defaults to [`Identity`].
    pub fn activation<A2>(self, activation: A2) -> Conv2Builder<A2> {
        let Self {
            inputs,
            outputs,
            filter,
            padding,
            bias,
            activation: _,
        } = self;
        Conv2Builder {
            inputs,
            outputs,
            filter,
            padding,
            bias,
            activation,
        }
    }
    /// Builds the layer, initializing parameters with [`rand::thread_rng()`].
    ///
    /// See [`.build_with_rng()`](Self::build_with_rng()).
    pub fn build(self) -> Result<Conv2<A>> {
        self.build_with_rng(&mut rand::thread_rng())
    }
    /// Builds the layer, initializing parameters with `rng`.
    ///
    /// The kernel and bias are sampled uniformly from (-a, a) where a = 1 / sqrt(inputs * fh * fw).
    ///
    /// **Errors**
    /// - `inputs`, `outputs` or the filter is 0.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Conv2<A>> {
        let Self {
            inputs,
            outputs,
            filter: [fh, fw],
            padding,
            bias,
            activation,
        } = self;
        if inputs == 0 || outputs == 0 || fh == 0 || fw == 0 {
            bail!(PixelCnnError::InvalidConfig(format!(
                "Conv2 requires inputs, outputs and filter > 0, found inputs = {inputs} outputs = {outputs} filter = {:?}",
                [fh, fw]
            )));
        }
        let distr = fan_in_uniform(inputs * fh * fw);
        let kernel_dim = [outputs, inputs, fh, fw];
        let data = (0..kernel_dim.iter().product::<usize>())
            .map(|_| distr.sample(rng))
            .collect();
        let kernel = Parameter4::from(Array::from_shape_vec(kernel_dim, data)?);
        let bias = if bias {
            let data = (0..outputs).map(|_| distr.sample(rng)).collect();
            Some(Parameter1::from(Array::from_shape_vec(outputs, data)?))
        } else {
            None
        };
        Ok(Conv2 {
            kernel,
            bias,
            padding,
            activation,
        })
    }
}
