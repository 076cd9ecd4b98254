use tch::nn::ModuleT;
use tch::{kind, nn, Device, Tensor};

use facenet::vision::backbone::{self, Backbone, BackboneConfig, Depth, Mode};
use facenet::vision::mobilefacenet::{MobileFaceNet, MobileFaceNetV2};
use facenet::vision::rev_mobilefacenet::RevMobileFaceNetV2;
use facenet::FaceError;

use test_utils::*;

fn faces(n: i64) -> Tensor {
    tch::manual_seed(42);
    Tensor::randn([n, 3, 112, 112], kind::FLOAT_CPU)
}

fn assert_unit_rows(xs: &Tensor) {
    for norm in row_norms(xs) {
        assert!((norm - 1.0).abs() < 1e-4, "row norm {norm}");
    }
}

#[test]
fn ir_50() {
    let vs = nn::VarStore::new(Device::Cpu);
    let net = backbone::ir_50(&vs.root()).unwrap();
    let ys = faces(2).apply_t(&net, false);
    assert_eq!(ys.size(), [2, 512]);
    assert_unit_rows(&ys);
}

#[test]
fn ir_se_50_small_embedding() {
    let vs = nn::VarStore::new(Device::Cpu);
    let cfg = BackboneConfig { embedding_dim: 128, mode: Mode::IrSe, drop_ratio: 0.4, ..Default::default() };
    let net = Backbone::new(&vs.root(), &cfg).unwrap();
    assert_eq!(net.embedding_dim(), 128);
    let ys = faces(1).apply_t(&net, false);
    assert_eq!(ys.size(), [1, 128]);
    assert_unit_rows(&ys);
}

#[test]
fn backbone_variable_names() {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = backbone::ir_50(&vs.root()).unwrap();
    let shapes = shapes(&vs);
    assert_eq!(shapes["input_layer.0.weight"], [64, 3, 3, 3]);
    assert_eq!(shapes["input_layer.1.running_mean"], [64]);
    assert_eq!(shapes["input_layer.2.weight"], [64]);
    // The first unit keeps 64 channels and uses a max-pool shortcut.
    assert!(!shapes.contains_key("body.0.shortcut_layer.0.weight"));
    assert_eq!(shapes["body.0.res_layer.1.weight"], [64, 64, 3, 3]);
    assert_eq!(shapes["body.3.shortcut_layer.0.weight"], [128, 64, 1, 1]);
    assert_eq!(shapes["body.3.shortcut_layer.1.running_var"], [128]);
    assert_eq!(shapes["body.3.res_layer.0.weight"], [64]);
    assert_eq!(shapes["body.3.res_layer.3.weight"], [128, 128, 3, 3]);
    assert_eq!(shapes["body.23.res_layer.4.bias"], [512]);
    assert!(!shapes.contains_key("body.24.res_layer.0.weight"));
    assert!(!shapes.keys().any(|k| k.contains("res_layer.5")));
    assert_eq!(shapes["output_layer.0.weight"], [512]);
    assert_eq!(shapes["output_layer.3.weight"], [512, 512 * 7 * 7]);
    assert_eq!(shapes["output_layer.3.bias"], [512]);
    assert_eq!(shapes["output_layer.4.running_mean"], [512]);
}

#[test]
fn se_variable_names() {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = backbone::ir_se_50(&vs.root()).unwrap();
    let shapes = shapes(&vs);
    assert_eq!(shapes["body.0.res_layer.5.fc1.weight"], [4, 64, 1, 1]);
    assert_eq!(shapes["body.0.res_layer.5.fc2.weight"], [64, 4, 1, 1]);
    assert_eq!(shapes["body.23.res_layer.5.fc1.weight"], [32, 512, 1, 1]);
    assert!(!shapes.contains_key("body.0.res_layer.5.fc1.bias"));
}

#[test]
fn deeper_backbones() {
    for (depth, units) in [(Depth::D100, 49), (Depth::D152, 50)] {
        let vs = nn::VarStore::new(Device::Cpu);
        let cfg = BackboneConfig { depth, ..Default::default() };
        let _net = Backbone::new(&vs.root(), &cfg).unwrap();
        let shapes = shapes(&vs);
        let last = format!("body.{}.res_layer.0.weight", units - 1);
        assert!(shapes.contains_key(&last), "missing {last}");
        assert!(!shapes.contains_key(&format!("body.{units}.res_layer.0.weight")));
    }
}

#[test]
fn backbone_bad_config() {
    let vs = nn::VarStore::new(Device::Cpu);
    let cfg = BackboneConfig { embedding_dim: 0, ..Default::default() };
    assert!(matches!(Backbone::new(&vs.root(), &cfg), Err(FaceError::Config(_))));
    let cfg = BackboneConfig { drop_ratio: 1.5, ..Default::default() };
    assert!(matches!(Backbone::new(&vs.root(), &cfg), Err(FaceError::Config(_))));
}

#[test]
fn mobilefacenet() {
    let vs = nn::VarStore::new(Device::Cpu);
    let net = MobileFaceNet::new(&vs.root(), 512).unwrap();
    let xs = faces(2);
    let ys = xs.apply_t(&net, false);
    assert_eq!(ys.size(), [2, 512]);
    assert_unit_rows(&ys);

    let (emb, split) = net.forward_vae_t(&xs, false);
    assert_eq!(split.size(), [2, 128, 14, 14]);
    assert!(max_diff(&emb, &ys) < 1e-6);
}

#[test]
fn mobilefacenet_variable_names() {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = MobileFaceNet::new(&vs.root(), 256).unwrap();
    let shapes = shapes(&vs);
    assert_eq!(shapes["conv1.conv.weight"], [64, 3, 3, 3]);
    assert_eq!(shapes["conv1.prelu.weight"], [64]);
    assert_eq!(shapes["conv2_dw.conv.weight"], [64, 1, 3, 3]);
    assert_eq!(shapes["conv_23.conv.conv.weight"], [128, 64, 1, 1]);
    assert_eq!(shapes["conv_23.conv_dw.conv.weight"], [128, 1, 3, 3]);
    assert_eq!(shapes["conv_23.project.bn.running_mean"], [64]);
    assert!(!shapes.contains_key("conv_23.project.prelu.weight"));
    assert_eq!(shapes["conv_3.model.3.project.conv.weight"], [64, 128, 1, 1]);
    assert!(!shapes.contains_key("conv_3.model.4.conv.conv.weight"));
    assert_eq!(shapes["conv_34.conv_dw.prelu.weight"], [256]);
    assert_eq!(shapes["conv_4.model.5.conv_dw.prelu.weight"], [256]);
    assert_eq!(shapes["conv_45.conv.conv.weight"], [512, 128, 1, 1]);
    assert_eq!(shapes["conv_5.model.1.project.conv.weight"], [128, 256, 1, 1]);
    assert_eq!(shapes["conv_6_sep.conv.weight"], [512, 128, 1, 1]);
    assert_eq!(shapes["conv_6_dw.conv.weight"], [512, 1, 7, 7]);
    assert!(!shapes.contains_key("conv_6_dw.prelu.weight"));
    assert_eq!(shapes["linear.weight"], [256, 512]);
    assert!(!shapes.contains_key("linear.bias"));
    assert_eq!(shapes["bn.running_var"], [256]);
}

#[test]
fn staged_mobilefacenet_matches_flat_one() {
    let vs1 = nn::VarStore::new(Device::Cpu);
    let vs2 = nn::VarStore::new(Device::Cpu);
    let _v1 = MobileFaceNet::new(&vs1.root(), 512).unwrap();
    let _v2 = MobileFaceNetV2::new(&vs2.root(), 512).unwrap();
    assert_eq!(vs1.len(), vs2.len());
    let mut s1: Vec<_> = shapes(&vs1).into_values().collect();
    let mut s2: Vec<_> = shapes(&vs2).into_values().collect();
    s1.sort();
    s2.sort();
    assert_eq!(s1, s2);
}

#[test]
fn mobilefacenet_v2_stages() {
    let vs = nn::VarStore::new(Device::Cpu);
    let net = MobileFaceNetV2::new(&vs.root(), 128).unwrap();
    let xs = faces(2);
    let expected: [&[i64]; 7] = [
        &[2, 64, 56, 56],
        &[2, 64, 28, 28],
        &[2, 128, 14, 14],
        &[2, 128, 7, 7],
        &[2, 128, 7, 7],
        &[2, 512],
        &[2, 128],
    ];
    for (stage, dims) in expected.iter().enumerate() {
        let ys = net.features_t(&xs, stage, false).unwrap();
        assert_eq!(ys.size(), *dims, "stage {stage}");
    }
    let ys = xs.apply_t(&net, false);
    assert_unit_rows(&ys);
    let raw = net.features_t(&xs, 6, false).unwrap();
    assert!(max_diff(&ys, &facenet::layers::l2_norm(&raw)) < 1e-6);
    assert!(matches!(
        net.features_t(&xs, 7, false),
        Err(FaceError::StageOutOfRange { stage: 7, count: 7 })
    ));
}

#[test]
fn mobilefacenet_v2_variable_names() {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = MobileFaceNetV2::new(&vs.root(), 512).unwrap();
    let shapes = shapes(&vs);
    assert_eq!(shapes["main_module.0.conv.weight"], [64, 3, 3, 3]);
    assert_eq!(shapes["main_module.1.0.conv.weight"], [64, 1, 3, 3]);
    assert_eq!(shapes["main_module.1.1.conv_dw.conv.weight"], [128, 1, 3, 3]);
    assert_eq!(shapes["main_module.2.0.model.3.conv.conv.weight"], [128, 64, 1, 1]);
    assert_eq!(shapes["main_module.3.1.project.conv.weight"], [128, 512, 1, 1]);
    assert_eq!(shapes["main_module.4.0.model.1.conv_dw.bn.weight"], [256]);
    assert_eq!(shapes["main_module.5.1.conv.weight"], [512, 1, 7, 7]);
    assert_eq!(shapes["main_module.6.0.weight"], [512, 512]);
    assert_eq!(shapes["main_module.6.1.running_mean"], [512]);
}

#[test]
fn rev_mobilefacenet_variable_names() {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = RevMobileFaceNetV2::new(&vs.root(), 512).unwrap();
    let shapes = shapes(&vs);
    assert_eq!(shapes["main_module.0.0.weight"], [512, 128, 3, 3]);
    assert_eq!(shapes["main_module.0.1.running_mean"], [128]);
    assert_eq!(shapes["main_module.0.3.weight"], [128, 128, 3, 3]);
    assert_eq!(shapes["main_module.0.4.weight"], [128]);
    assert_eq!(shapes["main_module.1.0.weight"], [128, 128, 4, 4]);
    assert_eq!(shapes["main_module.2.0.weight"], [128, 64, 4, 4]);
    assert_eq!(shapes["main_module.3.0.weight"], [64, 64, 4, 4]);
    assert_eq!(shapes["main_module.4.0.weight"], [64, 3, 4, 4]);
    assert!(!shapes.contains_key("main_module.4.1.weight"));
    assert!(!shapes.contains_key("main_module.0.0.bias"));
    assert!(!shapes.contains_key("main_module.4.0.bias"));
}

#[test]
fn decode_from_every_stage() {
    let vs = nn::VarStore::new(Device::Cpu);
    let root = vs.root();
    let encoder = MobileFaceNetV2::new(&(&root / "encoder"), 512).unwrap();
    let decoder = RevMobileFaceNetV2::new(&(&root / "decoder"), 512).unwrap();
    let xs = faces(2);
    for stage in 0..MobileFaceNetV2::STAGE_COUNT {
        let features = encoder.features_t(&xs, stage, false).unwrap();
        let img = decoder.decode_t(&features, stage as i64, false).unwrap();
        assert_eq!(img.size(), [2, 3, 112, 112], "stage {stage}");
        assert!(f64_from(&img.abs().max()) <= 1.0);
    }
    let features = encoder.features_t(&xs, 4, false).unwrap();
    let img = features.apply_t(&decoder, false);
    assert_eq!(img.size(), [2, 3, 112, 112]);
}

#[test]
fn decode_rejects_bad_inputs() {
    let vs = nn::VarStore::new(Device::Cpu);
    let decoder = RevMobileFaceNetV2::new(&vs.root(), 512).unwrap();
    let emb = Tensor::randn([2, 256], kind::FLOAT_CPU);
    assert!(matches!(decoder.decode_t(&emb, 6, false), Err(FaceError::Shape(_))));
    let emb = Tensor::randn([2, 512], kind::FLOAT_CPU);
    assert!(matches!(decoder.decode_t(&emb, -1, false), Err(FaceError::StageOutOfRange { .. })));
    let img = decoder.decode_t(&emb.view([2, 512, 1, 1]), 5, false).unwrap();
    assert_eq!(img.size(), [2, 3, 112, 112]);
}

#[test]
fn decode_rejects_mismatched_features() {
    let vs = nn::VarStore::new(Device::Cpu);
    let decoder = RevMobileFaceNetV2::new(&vs.root(), 512).unwrap();
    let features = Tensor::randn([2, 64, 56, 56], kind::FLOAT_CPU);
    assert!(matches!(decoder.decode_t(&features, 3, false), Err(FaceError::Shape(_))));
    let features = Tensor::randn([2, 128, 14, 14], kind::FLOAT_CPU);
    assert!(matches!(decoder.decode_t(&features, 4, false), Err(FaceError::Shape(_))));
    let img = decoder.decode_t(&features, 2, false).unwrap();
    assert_eq!(img.size(), [2, 3, 112, 112]);
}
