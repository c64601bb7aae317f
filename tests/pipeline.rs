//! End-to-end tests of the fusion pipeline on the CPU backend
//!
//! These use the compact network so a full prediction takes well under a
//! second; the full-size architecture test is ignored by default.

use std::sync::Arc;
use std::thread;

use burn::tensor::Tensor;
use burn_ndarray::NdArray;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use leaf_fusion::backend::DeviceSelection;
use leaf_fusion::inference::{FusionPredictor, PredictorConfig, SharedPredictor, WeightSource};
use leaf_fusion::model::{
    ConvNextConfig, FusionShape, MidFusionNet, MidFusionNetConfig, ShapeCache, ShapeSource,
};
use leaf_fusion::transforms::{TransformBank, TransformKind, OUTPUT_SIZE};
use leaf_fusion::{FusionError, CLASS_NAMES};

type TestBackend = NdArray;

fn cpu() -> DeviceSelection<TestBackend> {
    DeviceSelection::explicit(Default::default(), "NdArray (CPU)", false)
}

fn compact_config(dir: &TempDir) -> PredictorConfig {
    PredictorConfig::compact()
        .with_weights_path(dir.path().join("fusionnet_best"))
        .with_shape_cache(None)
}

fn leaf_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let vein = ((x + 2 * y) % 17 == 0) as u8;
        Rgb([
            (30 + (x % 40)) as u8,
            (120 + (y % 90) + 30 * vein as u32) as u8,
            (25 + ((x * y) % 30)) as u8,
        ])
    }))
}

fn to_vec(tensor: Tensor<TestBackend, 3>) -> Vec<f32> {
    tensor.into_data().to_vec().unwrap()
}

#[test]
fn every_transform_outputs_fixed_shape_for_any_resolution() {
    let device = Default::default();
    let bank = TransformBank::<TestBackend>::new(OUTPUT_SIZE, &device);

    for (w, h) in [(2, 2), (7, 300), (224, 224), (513, 97), (640, 480)] {
        let image = leaf_image(w, h).to_rgb8();
        for kind in TransformKind::ALL {
            let tensor = bank.apply(kind, &image).unwrap();
            assert_eq!(tensor.dims(), [3, 224, 224], "{} on {}x{}", kind, w, h);
        }
    }
}

#[test]
fn deterministic_transforms_replicate_channels() {
    let device = Default::default();
    let bank = TransformBank::<TestBackend>::new(OUTPUT_SIZE, &device);
    let image = leaf_image(150, 110).to_rgb8();
    let plane = OUTPUT_SIZE * OUTPUT_SIZE;

    for kind in [TransformKind::Dct, TransformKind::Stft, TransformKind::Wavelet] {
        let values = to_vec(bank.apply(kind, &image).unwrap());
        assert_eq!(values[..plane], values[plane..2 * plane], "{}", kind);
        assert_eq!(values[..plane], values[2 * plane..], "{}", kind);
    }
}

#[test]
fn uniform_green_dct_energy_sits_top_left() {
    let device = Default::default();
    let bank = TransformBank::<TestBackend>::new(OUTPUT_SIZE, &device);
    let image = RgbImage::from_pixel(512, 384, Rgb([0, 200, 0]));

    let tensor = bank.apply(TransformKind::Dct, &image).unwrap();
    assert_eq!(tensor.dims(), [3, 224, 224]);

    let values = to_vec(tensor);
    let energy = |y0: usize, y1: usize, x0: usize, x1: usize| -> f64 {
        let mut total = 0.0;
        for y in y0..y1 {
            for x in x0..x1 {
                let v = values[y * OUTPUT_SIZE + x] as f64;
                total += v * v;
            }
        }
        total
    };

    let top_left = energy(0, 16, 0, 16);
    let total = energy(0, OUTPUT_SIZE, 0, OUTPUT_SIZE);
    assert!(total > 0.0);
    assert!(top_left / total > 0.99, "top-left share {}", top_left / total);
}

#[test]
fn black_image_wavelet_is_zero() {
    let device = Default::default();
    let bank = TransformBank::<TestBackend>::new(OUTPUT_SIZE, &device);

    for (w, h) in [(1, 1), (33, 65), (800, 600)] {
        let image = RgbImage::new(w, h);
        let values = to_vec(bank.apply(TransformKind::Wavelet, &image).unwrap());
        assert!(values.iter().all(|v| v.abs() < 1e-6), "{}x{}", w, h);
    }
}

#[test]
fn fused_vector_has_latent_width_for_any_resolution() {
    let device = Default::default();
    let config = MidFusionNetConfig::compact(5);
    let (net, _, _) = MidFusionNet::<TestBackend>::init(&config, None, &device).unwrap();

    for (w, h) in [(40, 40), (500, 120)] {
        let inputs = net.preprocess(&leaf_image(w, h).to_rgb8()).unwrap();
        assert_eq!(net.embed(&inputs).dims(), [1, config.latent_width]);
    }
}

#[test]
fn prediction_is_a_distribution_over_five_labels() {
    let dir = TempDir::new().unwrap();
    let predictor = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();
    let result = predictor.predict(&leaf_image(320, 240)).unwrap();

    assert_eq!(result.class_probabilities.len(), 5);
    for (class, name) in result.class_probabilities.iter().zip(CLASS_NAMES) {
        assert_eq!(class.label, name);
        assert!((0.0..=1.0).contains(&class.probability));
    }

    let sum: f32 = result.class_probabilities.iter().map(|c| c.probability).sum();
    assert!((sum - 1.0).abs() < 1e-4, "sum {}", sum);

    let argmax = result
        .class_probabilities
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.probability.total_cmp(&b.1.probability))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(result.predicted_index, argmax);
    assert_eq!(result.predicted_label, CLASS_NAMES[argmax]);
    assert_eq!(result.confidence, result.class_probabilities[argmax].probability);
}

#[test]
fn repeated_predictions_are_deterministic() {
    let dir = TempDir::new().unwrap();
    let predictor = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();
    let image = leaf_image(200, 150);

    let first = predictor.predict(&image).unwrap();
    let second = predictor.predict(&image).unwrap();
    assert_eq!(first.predicted_index, second.predicted_index);
    for (a, b) in first.class_probabilities.iter().zip(&second.class_probabilities) {
        assert!((a.probability - b.probability).abs() < 1e-6);
    }
}

#[test]
fn missing_weight_file_runs_in_degraded_mode() {
    let dir = TempDir::new().unwrap();
    let predictor = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();

    assert_eq!(predictor.weight_source(), &WeightSource::RandomInit);
    let result = predictor.predict(&leaf_image(64, 64)).unwrap();
    assert_eq!(result.class_probabilities.len(), 5);
}

#[test]
fn saved_weights_reload_with_identical_predictions() {
    let dir = TempDir::new().unwrap();
    let image = leaf_image(180, 120);

    let original = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();
    let weights = dir.path().join("fusionnet_best");
    original.save_weights(&weights).unwrap();
    let before = original.predict(&image).unwrap();

    let reloaded = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();
    assert!(matches!(reloaded.weight_source(), WeightSource::Loaded(_)));
    let after = reloaded.predict(&image).unwrap();

    // The learnable mask travels with the weights, so only half-precision
    // rounding separates the two runs
    for (a, b) in before.class_probabilities.iter().zip(&after.class_probabilities) {
        assert!((a.probability - b.probability).abs() < 0.05);
    }
}

#[test]
fn mismatched_weight_file_fails_construction() {
    let dir = TempDir::new().unwrap();
    let three_labels: Vec<String> = CLASS_NAMES.iter().take(3).map(|s| s.to_string()).collect();

    let three_class = FusionPredictor::new(compact_config(&dir).with_labels(three_labels), cpu()).unwrap();
    three_class
        .save_weights(&dir.path().join("fusionnet_best"))
        .unwrap();

    let err = FusionPredictor::new(compact_config(&dir), cpu()).unwrap_err();
    assert!(matches!(err, FusionError::Construction(_)), "{:?}", err);
}

#[test]
fn incompatible_backbones_fail_with_shape_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut config = compact_config(&dir);
    config.model.convnext = ConvNextConfig::compact().with_patch_size(8);

    let err = FusionPredictor::new(config, cpu()).unwrap_err();
    match err {
        FusionError::ShapeMismatch { expected, found, .. } => {
            assert_eq!(expected, [14, 14]);
            assert_eq!(found, [7, 7]);
        }
        other => panic!("expected shape mismatch, got {:?}", other),
    }
}

#[test]
fn shape_cache_skips_the_dry_run() {
    let dir = TempDir::new().unwrap();
    let cache = ShapeCache::new(dir.path().join("fusion_shape.json"));
    let config = MidFusionNetConfig::compact(5);
    let device = Default::default();

    let (_, measured, source) = MidFusionNet::<TestBackend>::init(&config, Some(&cache), &device).unwrap();
    assert_eq!(source, ShapeSource::DryRun);
    assert!(cache.path().exists());

    let (net, cached, source) = MidFusionNet::<TestBackend>::init(&config, Some(&cache), &device).unwrap();
    assert_eq!(source, ShapeSource::Cache);
    assert_eq!(measured, cached);
    assert_eq!(net.fused_channels(), measured.fused_channels());
}

#[test]
fn stale_shape_cache_does_not_break_prediction() {
    let dir = TempDir::new().unwrap();
    let cache_path = dir.path().join("fusion_shape.json");
    let config = compact_config(&dir).with_shape_cache(Some(cache_path.clone()));

    let wrong = FusionShape {
        branch_channels: vec![32; 8],
        height: 14,
        width: 14,
    };
    ShapeCache::new(&cache_path).store(config.model.backbone_signature().unwrap(), &wrong);

    let predictor = FusionPredictor::new(config, cpu()).unwrap();
    assert_eq!(predictor.fusion_shape().fused_channels(), 4 * 16 + 4 * 24);

    let result = predictor.predict(&leaf_image(120, 90)).unwrap();
    let sum: f32 = result.class_probabilities.iter().map(|c| c.probability).sum();
    assert!((sum - 1.0).abs() < 1e-4);
}

#[test]
fn empty_image_is_a_preprocess_error() {
    let dir = TempDir::new().unwrap();
    let predictor = FusionPredictor::new(compact_config(&dir), cpu()).unwrap();
    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));

    let err = predictor.predict(&empty).unwrap_err();
    assert!(matches!(err, FusionError::Preprocess { .. }));
}

#[test]
fn shared_predictor_constructs_once_under_concurrency() {
    let dir = TempDir::new().unwrap();
    let shared = Arc::new(SharedPredictor::new(compact_config(&dir), cpu()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let predictor = shared.get().unwrap();
                predictor.predict(&leaf_image(60 + i * 10, 80)).unwrap()
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        let sum: f32 = result.class_probabilities.iter().map(|c| c.probability).sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
    assert_eq!(shared.construction_count(), 1);
}

#[test]
#[ignore = "builds the full-size network; slow on CPU"]
fn full_size_network_predicts() {
    let dir = TempDir::new().unwrap();
    let config = PredictorConfig::default()
        .with_weights_path(dir.path().join("fusionnet_best"))
        .with_shape_cache(None);

    let predictor = FusionPredictor::new(config, cpu()).unwrap();
    let info = predictor.info();
    assert_eq!(info.fused_channels, 4 * 96 + 4 * 384);
    assert_eq!(info.latent_width, 512);

    let result = predictor.predict(&leaf_image(400, 300)).unwrap();
    assert_eq!(result.class_probabilities.len(), 5);
}
