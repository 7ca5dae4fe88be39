/*!
# gated_pixelcnn
A Gated PixelCNN for autoregressive image modeling, on top of [ndarray].

A [`GatedPixelCnn`](gated_pixel_cnn::GatedPixelCnn) predicts per pixel probabilities such that
the output at a pixel only depends on the pixels before it in raster order. Images can be
[sampled](gated_pixel_cnn::GatedPixelCnn::sample()) pixel by pixel, optionally conditioned on
known pixels.

Training is not implemented, parameters are exposed through [`Layer`](layer::Layer) so they can
be updated by an external optimizer, and persisted with [`SavedModel`](saved::SavedModel).

# Logging
The crate logs through [log], install a logger such as `env_logger` to see it.
*/

/// Errors.
pub mod error;
/// Gated PixelCNN.
pub mod gated_pixel_cnn;
/// Layers.
pub mod layer;
mod ops;
/// Parameters.
pub mod parameter;
/// Saving and loading.
pub mod saved;
