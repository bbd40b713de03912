use molgraph_core::{MolError, Targets};
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::{
    Error, GnnMolecularPredictor, GnnParams, MolecularEstimator, PredictorConfig,
    RpgnnMolecularPredictor, RpgnnParams, TaskType,
};
use molgraph_test_data::MoleculeDataset;

fn training(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        batch_size: 8,
        patience: 5,
        ..Default::default()
    }
}

fn gnn_classifier(num_tasks: usize) -> GnnMolecularPredictor {
    GnnMolecularPredictor::new(PredictorConfig {
        num_tasks,
        arch: GnnParams {
            num_layer: 2,
            emb_dim: 16,
            ..Default::default()
        },
        training: training(3),
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_gnn_classification_fit_predict() {
    let data = MoleculeDataset::classification().unwrap();
    let (train, val) = data.split_at(18);
    let y_train = Targets::from(train.targets());
    let y_val = Targets::from(val.targets());

    let mut model = gnn_classifier(data.num_tasks());
    model
        .fit(&train.smiles, &y_train, Some(val.smiles.as_slice()), Some(&y_val))
        .unwrap();
    assert!(model.is_fitted());
    assert!(!model.fitting_loss().is_empty() && model.fitting_loss().len() <= 3);
    assert!(model.fitting_epoch() < 3);
    assert!(model.fitting_loss().iter().all(|l| l.is_finite()));

    let prediction = model.predict(&val.smiles).unwrap().prediction;
    assert_eq!(prediction.shape(), &[val.len(), 2]);
    assert!(prediction.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_rpgnn_regression_without_validation() {
    let data = MoleculeDataset::regression().unwrap();
    let y = Targets::from(data.task(0));
    let mut model = RpgnnMolecularPredictor::new(PredictorConfig {
        task_type: TaskType::Regression,
        arch: RpgnnParams {
            num_layer: 2,
            emb_dim: 16,
            num_perm: 2,
            ..Default::default()
        },
        training: TrainingConfig {
            grad_clip_value: Some(1.0),
            ..training(2)
        },
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap();
    model.fit(&data.smiles, &y, None, None).unwrap();

    let first = model.predict(&data.smiles[..4]).unwrap().prediction;
    let second = model.predict(&data.smiles[..4]).unwrap().prediction;
    assert_eq!(first.shape(), &[4, 1]);
    assert_eq!(first, second);
}

#[test]
fn test_custom_evaluation_function() {
    let data = MoleculeDataset::regression().unwrap();
    let y = Targets::from(data.task(0));
    let mut model = GnnMolecularPredictor::new(PredictorConfig {
        task_type: TaskType::Regression,
        arch: GnnParams {
            num_layer: 1,
            emb_dim: 8,
            ..Default::default()
        },
        training: training(2),
        device: Some("cpu".into()),
        ..Default::default()
    })
    .unwrap()
    .with_evaluate_fn(
        "max_abs_error",
        |y_true, y_pred| {
            y_true
                .iter()
                .zip(y_pred.iter())
                .map(|(t, p)| (t - p).abs())
                .fold(0.0, f32::max)
        },
        false,
    );
    model.fit(&data.smiles, &y, None, None).unwrap();
    assert_eq!(model.evaluate_name(), "max_abs_error");
    assert!(model.is_fitted());
}

#[test]
fn test_fit_rejects_bad_inputs() {
    let data = MoleculeDataset::classification().unwrap();
    let y = Targets::from(data.targets());
    let mut model = gnn_classifier(2);

    let err = model
        .fit(&data.smiles, &y, Some(data.smiles.as_slice()), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)));

    let smiles = vec!["CCO".to_string(), "C1CC".to_string()];
    let y = Targets::from(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let err = model.fit(&smiles, &y, None, None).unwrap_err();
    match err {
        Error::Core(MolError::InvalidSmiles(messages)) => {
            assert_eq!(messages.len(), 1);
            assert!(messages[0].contains("index 1"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let overflow = vec!["[C+100+100]".to_string(), "C[CH256]".to_string()];
    let err = model.fit(&overflow, &y, None, None).unwrap_err();
    match err {
        Error::Core(MolError::InvalidSmiles(messages)) => {
            assert_eq!(messages.len(), 2);
            assert!(messages[0].contains("charge out of range"));
            assert!(messages[1].contains("hydrogen count out of range"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let y = Targets::from(vec![1.0f32, 0.0]);
    let err = model.fit(&smiles[..1], &y, None, None).unwrap_err();
    assert!(matches!(err, Error::Core(MolError::Targets(_))));
    assert!(!model.is_fitted());
}
