use super::*;
use approx::assert_relative_eq;
use ndarray::{Array4, Ix4};

fn layer(inputs: usize, outputs: usize, kernel_size: usize, causal: bool) -> GatedPixelCnnLayer {
    GatedPixelCnnLayer::builder()
        .inputs(inputs)
        .outputs(outputs)
        .kernel_size(kernel_size)
        .causal(causal)
        .build_with_rng(&mut StdRng::seed_from_u64(0))
        .unwrap()
}

fn small_model(n_gated: usize) -> GatedPixelCnn {
    GatedPixelCnn::builder()
        .n_gated(n_gated)
        .gated_channels(4)
        .head_channels(3)
        .input_kernel_size(5)
        .seed(0)
        .build()
        .unwrap()
}

fn random_input(dim: [usize; 4], seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array::from_shape_simple_fn(dim, || rng.gen_range(-1f32..1.))
}

fn set_identity(conv: &mut Conv2) {
    let mut parameters = conv.parameters_mut().into_iter();
    let mut kernel = parameters
        .next()
        .unwrap()
        .into_dimensionality::<Ix4>()
        .unwrap();
    kernel.fill(0.);
    for i in 0..kernel.dim().0 {
        kernel[(i, i, 0, 0)] = 1.;
    }
    for mut bias in parameters {
        bias.fill(0.);
    }
}

fn set_constant_output(model: &mut GatedPixelCnn, bias: f32) {
    let mut parameters = model.head.conv2.parameters_mut().into_iter();
    parameters.next().unwrap().fill(0.);
    parameters.next().unwrap().fill(bias);
}

fn error_kind(error: anyhow::Error) -> PixelCnnError {
    error.downcast::<PixelCnnError>().unwrap()
}

/// Whether (y, x) comes before (r, c) in raster order, or is (r, c) when `inclusive`.
fn precedes([y, x]: [usize; 2], [r, c]: [usize; 2], inclusive: bool) -> bool {
    y < r || (y == r && (x < c || (inclusive && x == c)))
}

#[test]
fn layer_parameter_order() {
    let layer = layer(2, 3, 5, true);
    assert_eq!(layer.in_channels(), 2);
    assert_eq!(layer.out_channels(), 3);
    assert_eq!(layer.kernel_size(), 5);
    assert!(layer.is_causal());
    assert_eq!(layer.parameters_len(), 14);
    let shapes: Vec<Vec<usize>> = layer
        .parameters()
        .iter()
        .map(|x| x.shape().to_vec())
        .collect();
    let expected: Vec<Vec<usize>> = vec![
        vec![3, 2, 1, 5],
        vec![3],
        vec![6, 3, 3, 1],
        vec![6],
        vec![6, 2, 1, 1],
        vec![6],
        vec![6, 6, 1, 1],
        vec![6],
        vec![6, 2, 1, 3],
        vec![6],
        vec![3, 3, 1, 1],
        vec![3],
        vec![3, 3, 1, 1],
        vec![3],
    ];
    assert_eq!(shapes, expected);
}

#[test]
fn layer_even_kernel() {
    let error = GatedPixelCnnLayer::builder()
        .inputs(2)
        .outputs(2)
        .kernel_size(4)
        .build()
        .unwrap_err();
    assert_eq!(error_kind(error), PixelCnnError::EvenKernel(4));
}

#[test]
fn layer_non_causal_requires_equal_channels() {
    let error = GatedPixelCnnLayer::builder()
        .inputs(2)
        .outputs(3)
        .build()
        .unwrap_err();
    assert!(matches!(error_kind(error), PixelCnnError::InvalidConfig(_)));
}

#[test]
fn layer_preserves_shape() {
    for (kernel_size, causal) in [(1, false), (1, true), (3, false), (7, true)] {
        let inputs = if causal { 2 } else { 3 };
        let layer = layer(inputs, 3, kernel_size, causal);
        let x = random_input([2, inputs, 6, 7], 1);
        let (vstack, hstack, skip) = layer.forward((x.view(), x.view())).unwrap();
        assert_eq!(vstack.dim(), (2, 3, 6, 7));
        assert_eq!(hstack.dim(), (2, 3, 6, 7));
        assert_eq!(skip.dim(), (2, 3, 6, 7));
    }
}

#[test]
fn layer_shape_mismatch() {
    let layer = layer(2, 2, 3, false);
    let vstack = Array4::zeros([1, 2, 4, 4]);
    let hstack = Array4::zeros([1, 2, 4, 5]);
    let error = layer.forward((vstack.view(), hstack.view())).unwrap_err();
    assert!(matches!(
        error_kind(error),
        PixelCnnError::ShapeMismatch {
            op: "GatedPixelCnnLayer",
            ..
        }
    ));
}

fn check_layer_receptive_field(causal: bool) {
    let (h, w) = (5, 6);
    let layer = layer(3, 3, 5, causal);
    let x = random_input([1, 3, h, w], 2);
    let (vstack0, hstack0, skip0) = layer.forward((x.view(), x.view())).unwrap();
    for r in 0..h {
        for c in 0..w {
            let mut x = x.clone();
            x.slice_mut(s![.., .., r, c]).mapv_inplace(|x| x + 1.);
            let (vstack1, hstack1, skip1) = layer.forward((x.view(), x.view())).unwrap();
            assert_ne!(vstack0, vstack1);
            for ((b, k, y, x), a) in vstack0.indexed_iter() {
                if y < r {
                    assert_eq!(*a, vstack1[(b, k, y, x)], "vstack ({y}, {x}) sees ({r}, {c})");
                }
            }
            for (output0, output1) in [(&hstack0, &hstack1), (&skip0, &skip1)] {
                for ((b, k, y, x), a) in output0.indexed_iter() {
                    // non causal layers see the current pixel
                    if precedes([y, x], [r, c], causal) {
                        assert_eq!(*a, output1[(b, k, y, x)], "hstack ({y}, {x}) sees ({r}, {c})");
                    }
                }
            }
        }
    }
}

#[test]
fn causal_layer_receptive_field() {
    check_layer_receptive_field(true);
}

#[test]
fn non_causal_layer_receptive_field() {
    check_layer_receptive_field(false);
}

#[test]
fn non_causal_layer_adds_residual() {
    let mut layer = layer(2, 2, 3, false);
    set_identity(&mut layer.hstack_residual);
    set_identity(&mut layer.hstack_skip);
    let x = random_input([2, 2, 4, 5], 3);
    let (_, hstack, skip) = layer.forward((x.view(), x.view())).unwrap();
    assert_relative_eq!(hstack - &x, skip, epsilon = 1e-6);
}

#[test]
fn causal_layer_has_no_residual() {
    let mut layer = layer(2, 2, 3, true);
    set_identity(&mut layer.hstack_residual);
    set_identity(&mut layer.hstack_skip);
    let x = random_input([2, 2, 4, 5], 3);
    let (_, hstack, skip) = layer.forward((x.view(), x.view())).unwrap();
    assert_eq!(hstack, skip);
    // with a zero residual the horizontal stack is 0
    for mut parameter in layer.hstack_residual.parameters_mut() {
        parameter.fill(0.);
    }
    let (_, hstack, _) = layer.forward((x.view(), x.view())).unwrap();
    assert!(hstack.iter().all(|x| *x == 0.));
}

#[test]
fn model_config() {
    let model = small_model(2);
    let config = model.config();
    assert_eq!(config.in_channels, 1);
    assert_eq!(config.out_dim, 1);
    assert_eq!(config.n_gated, 2);
    assert_eq!(config.gated_channels, 4);
    assert_eq!(config.head_channels, 3);
    assert_eq!(config.input_kernel_size, 5);
    assert_eq!(config.gated_kernel_size, 3);
    assert_eq!(model.gated_layers.len(), 2);
    assert!(model.input.is_causal());
    assert!(model.gated_layers.iter().all(|layer| !layer.is_causal()));
    assert_eq!(model.parameters_len(), 14 * 3 + 4);
    let shapes: Vec<Vec<usize>> = model.parameters()[14 * 3..]
        .iter()
        .map(|x| x.shape().to_vec())
        .collect();
    assert_eq!(
        shapes,
        vec![vec![3, 4, 1, 1], vec![3], vec![1, 3, 1, 1], vec![1]]
    );
}

#[test]
fn model_invalid_config() {
    let error = GatedPixelCnn::builder()
        .gated_kernel_size(2)
        .build()
        .unwrap_err();
    assert_eq!(error_kind(error), PixelCnnError::EvenKernel(2));
    let error = GatedPixelCnn::builder()
        .gated_channels(0)
        .build()
        .unwrap_err();
    assert!(matches!(error_kind(error), PixelCnnError::InvalidConfig(_)));
    let error = GatedPixelCnn::builder().out_dim(0).build().unwrap_err();
    assert!(matches!(error_kind(error), PixelCnnError::InvalidConfig(_)));
}

#[test]
fn model_default_config() {
    let config = GatedPixelCnnConfig::default();
    assert_eq!(
        config,
        GatedPixelCnnConfig {
            in_channels: 1,
            out_dim: 1,
            n_gated: 10,
            gated_channels: 128,
            head_channels: 32,
            input_kernel_size: 7,
            gated_kernel_size: 3,
        }
    );
    config.validate().unwrap();
}

#[test]
fn model_forward_zeros() {
    let model = GatedPixelCnn::builder()
        .n_gated(0)
        .gated_channels(4)
        .head_channels(2)
        .seed(1)
        .build()
        .unwrap();
    let output = model.forward(Array4::zeros([1, 1, 3, 3]).view()).unwrap();
    assert_eq!(output.shape(), [1, 1, 1, 3, 3]);
    assert!(output.iter().all(|x| *x > 0. && *x < 1.));
}

#[test]
fn model_forward_shape() {
    let model = GatedPixelCnn::builder()
        .in_channels(2)
        .out_dim(3)
        .n_gated(1)
        .gated_channels(4)
        .head_channels(2)
        .seed(1)
        .build()
        .unwrap();
    let output = model.forward(random_input([2, 2, 4, 6], 0).view()).unwrap();
    assert_eq!(output.shape(), [2, 3, 2, 4, 6]);
    assert!(output.iter().all(|x| (0. ..=1.).contains(x)));
    let error = model
        .forward(Array4::zeros([2, 1, 4, 6]).view())
        .unwrap_err();
    assert!(matches!(
        error_kind(error),
        PixelCnnError::ShapeMismatch {
            op: "GatedPixelCnn",
            ..
        }
    ));
}

#[test]
fn model_is_deterministic() {
    let a = small_model(1);
    let b = small_model(1);
    for (a, b) in a.parameters().iter().zip(b.parameters()) {
        assert_eq!(a, &b);
    }
    let x = random_input([1, 1, 6, 6], 4);
    assert_eq!(a.forward(x.view()).unwrap(), b.forward(x.view()).unwrap());
    let c = GatedPixelCnn::builder()
        .n_gated(1)
        .gated_channels(4)
        .head_channels(3)
        .input_kernel_size(5)
        .seed(1)
        .build()
        .unwrap();
    assert_ne!(a.parameters()[0], c.parameters()[0]);
}

#[test]
fn model_is_causal() {
    let (h, w) = (5, 5);
    let model = small_model(2);
    let x = random_input([1, 1, h, w], 5).mapv(|x| if x > 0. { 1. } else { 0. });
    let output0 = model.forward(x.view()).unwrap();
    for r in 0..h {
        for c in 0..w {
            let mut x = x.clone();
            x[(0, 0, r, c)] = 1. - x[(0, 0, r, c)];
            let output1 = model.forward(x.view()).unwrap();
            for ((b, d, k, y, x), a) in output0.indexed_iter() {
                if precedes([y, x], [r, c], true) {
                    assert_eq!(
                        *a,
                        output1[(b, d, k, y, x)],
                        "output ({y}, {x}) sees ({r}, {c})"
                    );
                }
            }
        }
    }
}

#[test]
fn sample_unconditional() {
    let model = small_model(1);
    let options = SampleOptions::default()
        .batch_size(2)
        .shape([6, 5])
        .seed(0);
    let sample = model.sample(None, &options).unwrap();
    assert_eq!(sample.dim(), (2, 1, 6, 5));
    assert!(sample.iter().all(|x| *x == 0. || *x == 1.));
    assert_eq!(sample, model.sample(None, &options).unwrap());
}

#[test]
fn sample_default_options() {
    let options = SampleOptions::default();
    assert_eq!(options.batch_size, 1);
    assert_eq!([options.height, options.width], [28, 28]);
    assert_eq!(options.seed, None);
}

#[test]
fn sample_fills_default_canvas() {
    let model = small_model(1);
    let sample = model.sample(None, &SampleOptions::default()).unwrap();
    assert_eq!(sample.dim(), (1, 1, 28, 28));
    assert!(sample.iter().all(|x| *x == 0. || *x == 1.));
}

#[test]
fn sample_respects_evidence() {
    let model = small_model(1);
    let mut canvas = Array4::from_elem([3, 1, 6, 6], -1f32);
    let evidence = random_input([3, 1, 3, 6], 6).mapv(|x| if x > 0. { 1. } else { 0. });
    canvas.slice_mut(s![.., .., ..3, ..]).assign(&evidence);
    canvas[(1, 0, 4, 2)] = 1.;
    let sample = model
        .sample(Some(canvas.view()), &SampleOptions::default().seed(2))
        .unwrap();
    assert_eq!(sample.dim(), canvas.dim());
    assert_eq!(sample.slice(s![.., .., ..3, ..]), evidence);
    assert_eq!(sample[(1, 0, 4, 2)], 1.);
    assert!(sample.iter().all(|x| *x == 0. || *x == 1.));
}

#[test]
fn sample_known_canvas_is_unchanged() {
    let model = small_model(0);
    let canvas = random_input([2, 1, 4, 4], 7).mapv(|x| if x > 0. { 1. } else { 0. });
    let sample = model
        .sample(Some(canvas.view()), &SampleOptions::default())
        .unwrap();
    assert_eq!(sample, canvas);
}

#[test]
fn sample_saturated_probabilities() {
    let mut model = small_model(1);
    set_constant_output(&mut model, 100.);
    let ones = model
        .sample(None, &SampleOptions::default().shape([3, 4]))
        .unwrap();
    assert!(ones.iter().all(|x| *x == 1.));
    set_constant_output(&mut model, -100.);
    let zeros = model
        .sample(None, &SampleOptions::default().shape([3, 4]))
        .unwrap();
    assert!(zeros.iter().all(|x| *x == 0.));
}

#[test]
fn sample_unsupported() {
    let builder = GatedPixelCnn::builder()
        .n_gated(0)
        .gated_channels(2)
        .head_channels(2)
        .seed(0);
    for model in [
        builder.clone().in_channels(2).build().unwrap(),
        builder.out_dim(2).build().unwrap(),
    ] {
        let error = model
            .sample(None, &SampleOptions::default().shape([2, 2]))
            .unwrap_err();
        assert!(matches!(error_kind(error), PixelCnnError::Unsupported(_)));
    }
}

#[test]
fn sample_canvas_multiple_channels() {
    let model = small_model(0);
    let canvas = Array4::from_elem([1, 2, 3, 3], -1f32);
    let error = model
        .sample_canvas(canvas, &mut StdRng::seed_from_u64(0))
        .unwrap_err();
    assert!(matches!(error_kind(error), PixelCnnError::Unsupported(_)));
}
