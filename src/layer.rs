use crate::{
    ops,
    parameter::{Parameter1, Parameter4, ParameterViewD, ParameterViewMutD},
};
use anyhow::Result;
use ndarray::{Array, Array4, ArrayView4, Dimension};
use std::fmt::{self, Debug};

/// Derive macro for [`Layer`].
///
/// See [`gated_pixelcnn_derive`].
pub use gated_pixelcnn_derive::Layer;

/// Builders.
pub mod builders;
use builders::Conv2Builder;

/// A trait for layers and models with parameters.
///
/// [`Layer`] enumerates the parameters of the layer and its children, in a fixed order. This is
/// how an external optimizer updates the model and how [`SavedModel`](crate::saved::SavedModel)
/// persists it.
///
/// # Derive
/// [`Layer`] should be [derived](gated_pixelcnn_derive).
pub trait Layer {
    /// The number of parameters.
    ///
    /// This is the length of [`.parameters()`](Self::parameters()).
    fn parameters_len(&self) -> usize {
        0
    }
    #[doc(hidden)]
    #[allow(unused_variables)]
    fn collect_parameters<'a>(&'a self, parameters: &mut Vec<ParameterViewD<'a>>) {}
    #[doc(hidden)]
    #[allow(unused_variables)]
    fn collect_parameters_mut<'a>(&'a mut self, parameters: &mut Vec<ParameterViewMutD<'a>>) {}
    /// Enumerates the parameters of the layer, including child layers.
    fn parameters(&self) -> Vec<ParameterViewD> {
        let mut parameters = Vec::with_capacity(self.parameters_len());
        self.collect_parameters(&mut parameters);
        parameters
    }
    /// Enumerates mutable views of the parameters of the layer, including child layers.
    fn parameters_mut(&mut self) -> Vec<ParameterViewMutD> {
        let mut parameters = Vec::with_capacity(self.parameters_len());
        self.collect_parameters_mut(&mut parameters);
        parameters
    }
}

impl<L: Layer> Layer for Vec<L> {
    fn parameters_len(&self) -> usize {
        self.iter().map(Layer::parameters_len).sum()
    }
    fn collect_parameters<'a>(&'a self, parameters: &mut Vec<ParameterViewD<'a>>) {
        for layer in self.iter() {
            layer.collect_parameters(parameters);
        }
    }
    fn collect_parameters_mut<'a>(&'a mut self, parameters: &mut Vec<ParameterViewMutD<'a>>) {
        for layer in self.iter_mut() {
            layer.collect_parameters_mut(parameters);
        }
    }
}

/// A trait for the forward pass.
///
/// Computes the output as a function of the input.
pub trait Forward<X> {
    /// The type of the output.
    type Output;
    /// Computes the forward pass.
    ///
    /// **Errors**
    ///
    /// Returns an error if the operation could not be performed, ie the input has the wrong shape.
    /// Implementations should return an error instead of panicking.
    fn forward(&self, input: X) -> Result<Self::Output>;
}

/// Identity.
#[derive(Default, Clone, Copy, Debug, Layer)]
#[pixelcnn(crate)]
pub struct Identity;

impl<D: Dimension> Forward<Array<f32, D>> for Identity {
    type Output = Array<f32, D>;
    fn forward(&self, input: Array<f32, D>) -> Result<Self::Output> {
        Ok(input)
    }
}

/// ReLU activation.
#[derive(Default, Clone, Copy, Debug, Layer)]
#[pixelcnn(crate)]
pub struct Relu;

impl<D: Dimension> Forward<Array<f32, D>> for Relu {
    type Output = Array<f32, D>;
    fn forward(&self, mut input: Array<f32, D>) -> Result<Self::Output> {
        input.par_mapv_inplace(|x| x.max(0.));
        Ok(input)
    }
}

/// Sigmoid activation.
#[derive(Default, Clone, Copy, Debug, Layer)]
#[pixelcnn(crate)]
pub struct Sigmoid;

impl<D: Dimension> Forward<Array<f32, D>> for Sigmoid {
    type Output = Array<f32, D>;
    fn forward(&self, mut input: Array<f32, D>) -> Result<Self::Output> {
        input.par_mapv_inplace(ops::sigmoid);
        Ok(input)
    }
}

/// Gated activation.
///
/// Computes `tanh(f) * sigmoid(g)`, where `f` and `g` are the first and second half of the
/// channels of the input. The output has half as many channels.
///
/// **Errors**
///
/// The number of channels is odd.
#[derive(Default, Clone, Copy, Debug, Layer)]
#[pixelcnn(crate)]
pub struct GatedActivation;

impl Forward<Array4<f32>> for GatedActivation {
    type Output = Array4<f32>;
    fn forward(&self, input: Array4<f32>) -> Result<Self::Output> {
        ops::gate(&input)
    }
}

impl<'a> Forward<ArrayView4<'a, f32>> for GatedActivation {
    type Output = Array4<f32>;
    fn forward(&self, input: ArrayView4<'a, f32>) -> Result<Self::Output> {
        ops::gate(&input)
    }
}

/// Convolutional layer.
///
/// Stride is 1 and padding is zeros, applied symmetrically. The activation is applied after the
/// bias.
#[derive(Layer, Clone)]
#[pixelcnn(crate)]
pub struct Conv2<A = Identity> {
    #[pixelcnn(parameter)]
    kernel: Parameter4,
    #[pixelcnn(optional_parameter)]
    bias: Option<Parameter1>,
    padding: [usize; 2],
    #[pixelcnn(layer)]
    activation: A,
}

impl Conv2 {
    /// Returns a builder for creating a [`Conv2`].
    pub fn builder() -> Conv2Builder {
        Conv2Builder::default()
    }
}

impl<A> Conv2<A> {
    /// The number of input channels.
    pub fn inputs(&self) -> usize {
        self.kernel.shape()[1]
    }
    /// The number of output channels.
    pub fn outputs(&self) -> usize {
        self.kernel.shape()[0]
    }
    /// The filter size, `[height, width]`.
    pub fn filter(&self) -> [usize; 2] {
        let (_, _, fh, fw) = self.kernel.dim();
        [fh, fw]
    }
    /// The padding, `[height, width]`.
    pub fn padding(&self) -> [usize; 2] {
        self.padding
    }
    /// The kernel, shaped `[outputs, inputs, fh, fw]`.
    pub fn kernel(&self) -> &Parameter4 {
        &self.kernel
    }
    /// The bias, if any.
    pub fn bias(&self) -> Option<&Parameter1> {
        self.bias.as_ref()
    }
}

impl<A: Debug> Debug for Conv2<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Conv2");
        builder.field("kernel", &self.kernel.shape());
        if let Some(bias) = self.bias.as_ref() {
            builder.field("bias", &bias.shape());
        }
        if self.padding.iter().any(|x| *x != 0) {
            builder.field("padding", &self.padding);
        }
        builder.field("activation", &self.activation);
        builder.finish()
    }
}

impl<'a, A> Forward<ArrayView4<'a, f32>> for Conv2<A>
where
    A: Forward<Array4<f32>, Output = Array4<f32>>,
{
    type Output = Array4<f32>;
    fn forward(&self, input: ArrayView4<'a, f32>) -> Result<Self::Output> {
        let output = ops::conv2(
            input,
            self.kernel.view(),
            self.bias.as_ref().map(|bias| bias.view()),
            self.padding,
        )?;
        self.activation.forward(output)
    }
}
