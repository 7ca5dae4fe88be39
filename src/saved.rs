use crate::{
    error::PixelCnnError,
    gated_pixel_cnn::{GatedPixelCnn, GatedPixelCnnConfig},
    layer::Layer,
    parameter::ParameterViewD,
};
use anyhow::{bail, Result};
use log::debug;
use ndarray::{ArrayView, IxDyn};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// A saved parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedParameter {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl SavedParameter {
    /// The shape of the parameter.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    /// The data, in standard (row major) order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

impl<'a> From<ParameterViewD<'a>> for SavedParameter {
    fn from(parameter: ParameterViewD<'a>) -> Self {
        Self {
            shape: parameter.shape().to_vec(),
            data: parameter.iter().copied().collect(),
        }
    }
}

/// Saved model.
///
/// Stores the config and the parameters of a [`GatedPixelCnn`], in the order of
/// [`Layer::parameters()`]. Saved as json with extension ".model".
///
/// Saving:
///```no_run
/// # use gated_pixelcnn::{gated_pixel_cnn::GatedPixelCnn, saved::SavedModel};
/// # fn main() -> anyhow::Result<()> {
/// # let model = GatedPixelCnn::builder().build()?;
/// SavedModel::new(&model).save("mymodel")?;
/// # Ok(())
/// # }
///```
/// Loading:
///```no_run
/// # use gated_pixelcnn::saved::SavedModel;
/// # fn main() -> anyhow::Result<()> {
/// let model = SavedModel::load("mymodel")?.into_model()?;
/// # Ok(())
/// # }
///```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModel {
    config: GatedPixelCnnConfig,
    parameters: Vec<SavedParameter>,
}

impl SavedModel {
    /// Copies the config and parameters of `model`.
    pub fn new(model: &GatedPixelCnn) -> Self {
        let parameters = model
            .parameters()
            .into_iter()
            .map(SavedParameter::from)
            .collect();
        Self {
            config: *model.config(),
            parameters,
        }
    }
    /// The config of the model.
    pub fn config(&self) -> &GatedPixelCnnConfig {
        &self.config
    }
    /// The saved parameters.
    pub fn parameters(&self) -> &[SavedParameter] {
        &self.parameters
    }
    /// Saves to a file with extension ".model".
    pub fn save(&self, name: impl AsRef<Path>) -> Result<()> {
        let path = name.as_ref().with_extension("model");
        let mut file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut file, self)?;
        file.flush()?;
        debug!("saved {} parameters to {path:?}", self.parameters.len());
        Ok(())
    }
    /// Loads from a file with extension ".model".
    pub fn load(name: impl AsRef<Path>) -> Result<Self> {
        let path = name.as_ref().with_extension("model");
        let file = BufReader::new(File::open(&path)?);
        let saved: Self = serde_json::from_reader(file)?;
        debug!(
            "loaded {} parameters from {path:?}",
            saved.parameters.len()
        );
        Ok(saved)
    }
    /// Builds a model from the config and loads the parameters.
    ///
    /// **Errors**
    ///
    /// See [`.load_parameters()`](Self::load_parameters()).
    pub fn into_model(self) -> Result<GatedPixelCnn> {
        let mut model = GatedPixelCnn::builder()
            .config(self.config)
            .seed(0)
            .build()?;
        self.load_parameters(&mut model)?;
        Ok(model)
    }
    /// Copies the parameters into `layer`.
    ///
    /// The layer is not modified on error.
    ///
    /// **Errors**
    /// - The number of parameters differs.
    /// - A parameter has a different shape.
    pub fn load_parameters<L: Layer>(&self, layer: &mut L) -> Result<()> {
        let mut parameters = layer.parameters_mut();
        if parameters.len() != self.parameters.len() {
            bail!(PixelCnnError::ParameterCount {
                expected: parameters.len(),
                found: self.parameters.len(),
            });
        }
        for (index, (parameter, saved)) in parameters.iter().zip(self.parameters.iter()).enumerate()
        {
            if parameter.shape() != saved.shape.as_slice()
                || saved.data.len() != saved.shape.iter().product::<usize>()
            {
                bail!(PixelCnnError::ParameterShape {
                    index,
                    expected: parameter.shape().to_vec(),
                    found: saved.shape.clone(),
                });
            }
        }
        for (parameter, saved) in parameters.iter_mut().zip(self.parameters.iter()) {
            let value = ArrayView::from_shape(IxDyn(&saved.shape), &saved.data)?;
            parameter.assign(&value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Forward;
    use ndarray::Array4;
    use tempfile::tempdir;

    fn model(seed: u64) -> GatedPixelCnn {
        GatedPixelCnn::builder()
            .n_gated(1)
            .gated_channels(4)
            .head_channels(2)
            .input_kernel_size(3)
            .seed(seed)
            .build()
            .unwrap()
    }

    #[test]
    fn save_load() {
        let dir = tempdir().unwrap();
        let model = model(0);
        let saved = SavedModel::new(&model);
        assert_eq!(saved.parameters().len(), model.parameters_len());
        saved.save(dir.path().join("pixelcnn")).unwrap();
        assert!(dir.path().join("pixelcnn.model").exists());
        let loaded = SavedModel::load(dir.path().join("pixelcnn")).unwrap();
        assert_eq!(loaded, saved);
        let loaded = loaded.into_model().unwrap();
        assert_eq!(loaded.config(), model.config());
        let x = Array4::from_elem([1, 1, 4, 4], 0.5);
        assert_eq!(
            loaded.forward(x.view()).unwrap(),
            model.forward(x.view()).unwrap()
        );
    }

    #[test]
    fn load_parameters() {
        let source = model(1);
        let mut target = model(2);
        assert_ne!(source.parameters()[0], target.parameters()[0]);
        SavedModel::new(&source)
            .load_parameters(&mut target)
            .unwrap();
        for (a, b) in source.parameters().iter().zip(target.parameters()) {
            assert_eq!(a, &b);
        }
    }

    #[test]
    fn load_parameters_count_mismatch() {
        let saved = SavedModel::new(&model(0));
        let mut target = GatedPixelCnn::builder()
            .n_gated(2)
            .gated_channels(4)
            .head_channels(2)
            .input_kernel_size(3)
            .build()
            .unwrap();
        let error = saved.load_parameters(&mut target).unwrap_err();
        assert_eq!(
            error.downcast_ref::<PixelCnnError>(),
            Some(&PixelCnnError::ParameterCount {
                expected: 14 * 3 + 4,
                found: 14 * 2 + 4,
            })
        );
    }

    #[test]
    fn load_parameters_shape_mismatch() {
        let saved = SavedModel::new(&model(0));
        let mut target = GatedPixelCnn::builder()
            .n_gated(1)
            .gated_channels(4)
            .head_channels(2)
            .input_kernel_size(5)
            .build()
            .unwrap();
        let before: Vec<_> = target.parameters().iter().map(|x| x.to_owned()).collect();
        let error = saved.load_parameters(&mut target).unwrap_err();
        assert_eq!(
            error.downcast_ref::<PixelCnnError>(),
            Some(&PixelCnnError::ParameterShape {
                index: 0,
                expected: vec![4, 1, 1, 5],
                found: vec![4, 1, 1, 3],
            })
        );
        for (a, b) in before.iter().zip(target.parameters()) {
            assert_eq!(a, &b);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn save_reports_write_error() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("/dev/full", dir.path().join("full.model")).unwrap();
        let model = GatedPixelCnn::builder()
            .n_gated(0)
            .gated_channels(1)
            .head_channels(1)
            .input_kernel_size(1)
            .build()
            .unwrap();
        assert!(SavedModel::new(&model)
            .save(dir.path().join("full"))
            .is_err());
    }

    #[test]
    fn load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(SavedModel::load(dir.path().join("missing")).is_err());
    }
}
