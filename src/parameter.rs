use derive_more::{Deref, DerefMut};
use ndarray::{Array, ArrayViewD, ArrayViewMutD, Dimension, Ix1, Ix4};

/// A view of a parameter with dynamic dimensionality.
pub type ParameterViewD<'a> = ArrayViewD<'a, f32>;
/// A mutable view of a parameter with dynamic dimensionality.
pub type ParameterViewMutD<'a> = ArrayViewMutD<'a, f32>;

/// A learned tensor owned by a layer.
///
/// Derefs to the underlying [`Array`]. Gradients and updates are computed externally, through
/// [`Layer::parameters_mut()`](crate::layer::Layer::parameters_mut()).
#[derive(Clone, Debug, Deref, DerefMut)]
pub struct Parameter<D: Dimension> {
    value: Array<f32, D>,
}

/// Parameter with 1 dimension.
pub type Parameter1 = Parameter<Ix1>;
/// Parameter with 4 dimensions.
pub type Parameter4 = Parameter<Ix4>;

impl<D: Dimension> Parameter<D> {
    /// Borrows the parameter as a dynamic view.
    pub fn view_dyn(&self) -> ParameterViewD {
        self.value.view().into_dyn()
    }
    /// Borrows the parameter as a mutable dynamic view.
    pub fn view_mut_dyn(&mut self) -> ParameterViewMutD {
        self.value.view_mut().into_dyn()
    }
    /// Unwraps the array.
    pub fn into_array(self) -> Array<f32, D> {
        self.value
    }
}

impl<D: Dimension> From<Array<f32, D>> for Parameter<D> {
    fn from(value: Array<f32, D>) -> Self {
        Self { value }
    }
}
