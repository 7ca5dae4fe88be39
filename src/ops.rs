use crate::error::PixelCnnError;
use anyhow::{bail, Result};
use ndarray::{
    parallel::prelude::*, s, Array, Array2, Array4, ArrayBase, ArrayView1, ArrayView4, Axis, Data,
    Ix4, Zip,
};
use num_traits::{Float, Zero};

#[derive(Clone, Debug)]
pub(crate) struct Conv2Options {
    pub(crate) filter: [usize; 2],
    pub(crate) padding: [usize; 2],
}

impl Conv2Options {
    /// The spatial extent of the output for an input of `[ih, iw]`.
    pub(crate) fn output_shape(&self, [ih, iw]: [usize; 2]) -> Result<[usize; 2]> {
        let Self {
            filter: [fh, fw],
            padding: [ph, pw],
        } = *self;
        let (ph2, pw2) = (ih + 2 * ph, iw + 2 * pw);
        if fh > ph2 || fw > pw2 {
            bail!(
                "conv2: filter {:?} is larger than the padded input {:?}!",
                [fh, fw],
                [ph2, pw2]
            );
        }
        Ok([ph2 - fh + 1, pw2 - fw + 1])
    }
}

pub(crate) trait Im2ColConv2 {
    type Output;
    fn im2col_conv2(&self, options: &Conv2Options) -> Result<Self::Output>;
}

impl<T, S> Im2ColConv2 for ArrayBase<S, Ix4>
where
    T: Copy + Zero + Send + Sync,
    S: Data<Elem = T>,
{
    type Output = Array2<T>;
    fn im2col_conv2(&self, options: &Conv2Options) -> Result<Self::Output> {
        let input = self.as_standard_layout();
        let (bs, c, ih, iw) = input.dim();
        let [oh, ow] = options.output_shape([ih, iw])?;
        let Conv2Options {
            filter: [fh, fw],
            padding: [ph, pw],
        } = options.clone();
        let mut output = Array::zeros([bs, oh, ow, c, fh * fw]);
        output
            .outer_iter_mut()
            .into_par_iter()
            .zip(input.outer_iter().into_par_iter())
            .for_each(|(mut output, input)| {
                for (input, mut output) in input.outer_iter().zip(output.axis_iter_mut(Axis(2))) {
                    for (hid, mut output) in output.outer_iter_mut().enumerate() {
                        for (wid, mut output) in output.outer_iter_mut().enumerate() {
                            for fi in 0..fh {
                                for fj in 0..fw {
                                    let hidx = (hid + fi) as isize - ph as isize;
                                    let widx = (wid + fj) as isize - pw as isize;
                                    if hidx >= 0
                                        && hidx < ih as isize
                                        && widx >= 0
                                        && widx < iw as isize
                                    {
                                        output[fi * fw + fj] =
                                            input[(hidx as usize, widx as usize)];
                                    }
                                }
                            }
                        }
                    }
                }
            });
        Ok(output.into_shape([bs * oh * ow, c * fh * fw])?)
    }
}

/// 2D convolution with stride 1 and zero padding.
///
/// `input` is (N, C, H, W), `weight` is (OC, C, FH, FW) and `bias` is (OC).
pub(crate) fn conv2(
    input: ArrayView4<f32>,
    weight: ArrayView4<f32>,
    bias: Option<ArrayView1<f32>>,
    padding: [usize; 2],
) -> Result<Array4<f32>> {
    let (bs, ic, ih, iw) = input.dim();
    let (oc, wic, fh, fw) = weight.dim();
    if ic != wic {
        bail!(PixelCnnError::ShapeMismatch {
            op: "conv2",
            expected: vec![bs, wic, ih, iw],
            found: input.shape().to_vec(),
        });
    }
    let options = Conv2Options {
        filter: [fh, fw],
        padding,
    };
    let [oh, ow] = options.output_shape([ih, iw])?;
    let cols = input.im2col_conv2(&options)?;
    let weight = weight.to_shape([oc, ic * fh * fw])?;
    let mut output = cols.dot(&weight.t());
    if let Some(bias) = bias {
        output += &bias;
    }
    // dot may return column major output
    let output = output
        .to_shape([bs, oh, ow, oc])?
        .permuted_axes([0, 3, 1, 2]);
    Ok(output.as_standard_layout().into_owned())
}

/// Keeps the leading `[h, w]` rows and columns.
///
/// Combined with extra padding this shifts a convolution's receptive field up or left.
pub(crate) fn crop2<T>(input: Array4<T>, [h, w]: [usize; 2]) -> Array4<T> {
    debug_assert!(input.dim().2 >= h && input.dim().3 >= w);
    input.slice_move(s![.., .., ..h, ..w])
}

pub(crate) fn sigmoid<T: Float>(x: T) -> T {
    T::one() / (T::one() + (-x).exp())
}

/// Computes `tanh(a) * sigmoid(b)` where `a` and `b` are the first and second half of the channels.
pub(crate) fn gate<S: Data<Elem = f32>>(input: &ArrayBase<S, Ix4>) -> Result<Array4<f32>> {
    let c = input.dim().1;
    if c % 2 != 0 {
        bail!(PixelCnnError::OddChannels(c));
    }
    let tanh = input.slice(s![.., ..c / 2, .., ..]);
    let sigmoid_ = input.slice(s![.., c / 2.., .., ..]);
    Ok(Zip::from(&tanh)
        .and(&sigmoid_)
        .par_map_collect(|a, b| a.tanh() * sigmoid(*b)))
}
