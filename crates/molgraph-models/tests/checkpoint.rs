use molgraph_core::Targets;
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::{
    EdgePredMolecularEncoder, EdgePredParams, EncoderConfig, Error, GnnMolecularPredictor,
    GnnParams, MolecularEstimator, PredictorConfig, RpgnnMolecularPredictor, RpgnnParams, TaskType,
};
use molgraph_test_data::MoleculeDataset;
use serde_json::json;

fn predictor(emb_dim: usize) -> GnnMolecularPredictor {
    GnnMolecularPredictor::new(PredictorConfig {
        num_tasks: 2,
        arch: GnnParams {
            num_layer: 2,
            emb_dim,
            ..Default::default()
        },
        training: TrainingConfig {
            epochs: 2,
            batch_size: 8,
            ..Default::default()
        },
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_predictor_round_trip() {
    let data = MoleculeDataset::classification().unwrap();
    let y = Targets::from(data.targets());
    let mut model = predictor(16);
    model.fit(&data.smiles, &y, None, None).unwrap();
    let expected = model.predict(&data.smiles).unwrap().prediction;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("permeability.safetensors");
    model.save_to_local(&path).unwrap();
    assert!(path.exists());

    let mut restored = predictor(32);
    let summary = restored.load_from_local(&path).unwrap();
    assert_eq!(summary.model_name, "permeability");
    assert_eq!(summary.num_changed(), 1);
    let first = &summary.parameters[0];
    assert_eq!(first.parameter, "emb_dim");
    assert_eq!(first.old_value, json!(32));
    assert_eq!(first.new_value, json!(16));

    assert!(restored.is_fitted());
    assert_eq!(restored.model_name(), "permeability");
    assert_eq!(restored.config().arch.emb_dim, 16);
    let actual = restored.predict(&data.smiles).unwrap().prediction;
    for (a, b) in actual.iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_save_and_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let model = predictor(16);
    let err = model
        .save_to_local(dir.path().join("unfitted.safetensors"))
        .unwrap_err();
    assert!(matches!(err, Error::NotFitted));

    let mut model = predictor(16);
    let err = model
        .load_from_local(dir.path().join("missing.safetensors"))
        .unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(_)));

    let data = MoleculeDataset::classification().unwrap();
    let y = Targets::from(data.targets());
    model.fit(&data.smiles, &y, None, None).unwrap();
    let err = model
        .save_to_local(dir.path().join("model.pt"))
        .unwrap_err();
    assert!(matches!(err, Error::Checkpoint(_)));
}

fn rpgnn_regressor() -> RpgnnMolecularPredictor {
    RpgnnMolecularPredictor::new(PredictorConfig {
        task_type: TaskType::Regression,
        arch: RpgnnParams {
            num_layer: 1,
            emb_dim: 8,
            ..Default::default()
        },
        training: TrainingConfig {
            epochs: 2,
            batch_size: 8,
            ..Default::default()
        },
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_failed_load_leaves_estimator_unchanged() {
    let data = MoleculeDataset::classification().unwrap();
    let y = Targets::from(data.targets());
    let mut gnn = predictor(16);
    gnn.fit(&data.smiles, &y, None, None).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gnn.safetensors");
    gnn.save_to_local(&path).unwrap();

    // unfitted target: stays unfitted with its own settings
    let mut rpgnn = rpgnn_regressor();
    let before = rpgnn.get_params();
    let err = rpgnn.load_from_local(&path).unwrap_err();
    assert!(matches!(err, Error::Checkpoint(_)));
    assert!(!rpgnn.is_fitted());
    assert_eq!(rpgnn.get_params(), before);
    assert_eq!(rpgnn.model_name(), "RPGNNMolecularPredictor");
    assert!(matches!(
        rpgnn.predict(&data.smiles).unwrap_err(),
        Error::NotFitted
    ));

    // fitted target: keeps its trained weights
    let regression = MoleculeDataset::regression().unwrap();
    let y = Targets::from(regression.task(0));
    let mut rpgnn = rpgnn_regressor();
    rpgnn.fit(&regression.smiles, &y, None, None).unwrap();
    let expected = rpgnn.predict(&regression.smiles).unwrap().prediction;
    let before = rpgnn.get_params();
    assert!(rpgnn.load_from_local(&path).is_err());
    assert!(rpgnn.is_fitted());
    assert_eq!(rpgnn.get_params(), before);
    assert_eq!(rpgnn.predict(&regression.smiles).unwrap().prediction, expected);
}

#[test]
fn test_encoder_round_trip() {
    let smiles = ["CC(=O)O", "CCO", "CCCC", "c1ccccc1", "CCN"];
    let mut encoder = EdgePredMolecularEncoder::new(EncoderConfig {
        arch: EdgePredParams {
            num_layer: 3,
            hidden_size: 16,
            ..Default::default()
        },
        training: TrainingConfig {
            epochs: 3,
            batch_size: 5,
            ..Default::default()
        },
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap();
    encoder.fit(&smiles[..4]).unwrap();
    let expected = encoder.encode_array(&smiles).unwrap();
    assert_eq!(expected.shape(), &[5, 16]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edgepred.safetensors");
    encoder.save_to_local(&path).unwrap();

    let mut restored = EdgePredMolecularEncoder::new(EncoderConfig {
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap();
    let summary = restored.load_from_local(&path).unwrap();
    assert!(summary.num_changed() >= 2);
    assert_eq!(restored.config().arch.hidden_size, 16);
    let actual = restored.encode_array(&smiles).unwrap();
    for (a, b) in actual.iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}
