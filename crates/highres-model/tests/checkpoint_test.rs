use burn::tensor::TensorData;
use burn_ndarray::NdArray;
use highres_model::{presets, Dimensions, HighResNet, HighResNetError, NamedTensor};

type Backend = NdArray<f32>;

fn find<'a>(tensors: &'a [NamedTensor], name: &str) -> &'a NamedTensor {
    tensors
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("missing {name}"))
}

fn model() -> HighResNet<Backend> {
    let device = Default::default();
    presets::compact(1, 3)
        .with_add_dropout_layer(true)
        .init(&device)
        .unwrap()
}

#[test]
fn test_load_external_checkpoint() {
    // Channels-last kernel [D, H, W, in, out]; value = output channel index.
    let mut kernel = Vec::new();
    for _ in 0..27 {
        kernel.extend([0.0f32, 1.0, 2.0, 3.0]);
    }
    let checkpoint = vec![
        (
            "conv_0_bn_relu/conv_/w",
            TensorData::new(kernel, [3, 3, 3, 1, 4]),
        ),
        (
            "res_1_0/bn_0/moving_mean",
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [4]),
        ),
        (
            "conv_1_bn_relu/bn_/gamma",
            TensorData::new(vec![0.5f32; 80], [80]),
        ),
        (
            "conv_2_bn/bn_/beta",
            TensorData::new(vec![-1.0f32, 0.0, 1.0], [3]),
        ),
    ];

    let model = model().load_external_checkpoint(checkpoint).unwrap();
    let params = model.named_parameters();
    let buffers = model.named_buffers();

    let initial = find(&params, "initial.conv.weight");
    assert_eq!(initial.shape(), &[4, 1, 3, 3, 3]);
    let values = initial.data.to_vec::<f32>().unwrap();
    for (out_channel, taps) in values.chunks(27).enumerate() {
        assert!(taps.iter().all(|&v| v == out_channel as f32));
    }

    let mean = find(
        &buffers,
        "dilation_blocks.1.residual_blocks.0.conv_blocks.0.norm.running_mean",
    );
    assert_eq!(mean.data.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

    let gamma = find(&params, "dropout_projection.norm.weight");
    assert!(gamma.data.to_vec::<f32>().unwrap().iter().all(|&v| v == 0.5));

    let beta = find(&params, "classifier.norm.bias");
    assert_eq!(beta.data.to_vec::<f32>().unwrap(), vec![-1.0, 0.0, 1.0]);
}

#[test]
fn test_load_planar_checkpoint_kernel() {
    let device = Default::default();
    let model: HighResNet<Backend> = presets::compact(1, 3)
        .with_dimensions(Dimensions::Two)
        .init(&device)
        .unwrap();

    // Channels-last [H, W, in, out]; value = 100·out + 10·h + w.
    let mut kernel = Vec::new();
    for h in 0..3 {
        for w in 0..3 {
            for o in 0..4 {
                kernel.push((100 * o + 10 * h + w) as f32);
            }
        }
    }
    let checkpoint = vec![("conv_0_bn_relu/conv_/w", TensorData::new(kernel, [3, 3, 1, 4]))];
    let model = model.load_external_checkpoint(checkpoint).unwrap();

    let params = model.named_parameters();
    let initial = find(&params, "initial.conv.weight");
    assert_eq!(initial.shape(), &[4, 1, 3, 3]);
    let mut expected = Vec::new();
    for o in 0..4 {
        for h in 0..3 {
            for w in 0..3 {
                expected.push((100 * o + 10 * h + w) as f32);
            }
        }
    }
    assert_eq!(initial.data.to_vec::<f32>().unwrap(), expected);
}

#[test]
fn test_checkpoint_errors() {
    let unknown = vec![("global_step", TensorData::new(vec![0.0f32], [1]))];
    assert!(matches!(
        model().load_external_checkpoint(unknown),
        Err(HighResNetError::Checkpoint(_))
    ));

    // Valid name, but the network has only one residual block per dilation.
    let absent = vec![(
        "res_0_2/bn_0/gamma",
        TensorData::new(vec![1.0f32; 4], [4]),
    )];
    assert!(matches!(
        model().load_external_checkpoint(absent),
        Err(HighResNetError::UnknownParameter(_))
    ));

    // Kernel with swapped channel axes.
    let misshaped = vec![(
        "conv_0_bn_relu/conv_/w",
        TensorData::new(vec![0.0f32; 108], [3, 3, 3, 4, 1]),
    )];
    assert!(matches!(
        model().load_external_checkpoint(misshaped),
        Err(HighResNetError::ShapeMismatch { .. })
    ));
}
