use molgraph_core::Targets;
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::{
    Error, GnnMolecularPredictor, GnnParams, MolecularEstimator, ParameterSpec, PredictorConfig,
    SearchSpace, TaskType,
};
use molgraph_test_data::MoleculeDataset;
use ndarray::Array2;

fn regressor() -> GnnMolecularPredictor {
    GnnMolecularPredictor::new(PredictorConfig {
        task_type: TaskType::Regression,
        arch: GnnParams {
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
        verbose: true,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_autofit_keeps_best_trial() {
    let data = MoleculeDataset::regression().unwrap();
    let (train, val) = data.split_at(14);
    let y_train = Targets::from(train.task(0));
    let y_val = Targets::from(val.task(0));

    let mut space = SearchSpace::new();
    space.insert("gnn_type".into(), ParameterSpec::categorical(["gin", "gcn"]));
    space.insert("num_layer".into(), ParameterSpec::integer(1, 2));
    space.insert("emb_dim".into(), ParameterSpec::integer(8, 12));

    let mut model = regressor();
    model
        .autofit(
            &train.smiles,
            &y_train,
            Some(val.smiles.as_slice()),
            Some(&y_val),
            Some(space),
            3,
        )
        .unwrap();
    assert!(model.is_fitted());
    let config = model.config();
    assert!((1..=2).contains(&config.arch.num_layer));
    assert!((8..=12).contains(&config.arch.emb_dim));
    assert!(!model.fitting_loss().is_empty());

    // the kept weights reproduce the best trial's validation score
    let prediction = model.predict(&val.smiles).unwrap().prediction;
    assert_eq!(prediction.nrows(), val.len());
    let labels = Array2::from_shape_vec((val.len(), 1), val.task(0)).unwrap();
    let score = model.config().metric().compute(&labels, &prediction).unwrap();
    let best = model.best_score().unwrap();
    assert!((score as f64 - best).abs() < 1e-5, "{score} != {best}");
}

#[test]
fn test_autofit_rejects_unknown_parameters() {
    let data = MoleculeDataset::regression().unwrap();
    let y = Targets::from(data.task(0));
    let mut space = SearchSpace::new();
    space.insert("hidden_size".into(), ParameterSpec::integer(8, 16));
    let err = regressor()
        .autofit(&data.smiles, &y, None, None, Some(space), 1)
        .unwrap_err();
    match err {
        Error::InvalidParameter(msg) => {
            assert!(msg.contains("hidden_size"));
            assert!(msg.contains("emb_dim"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_autofit_without_successful_trials() {
    let data = MoleculeDataset::regression().unwrap();
    let y = Targets::from(data.task(0));
    let mut space = SearchSpace::new();
    // every sampled value fails validation
    space.insert("drop_ratio".into(), ParameterSpec::float(1.0, 1.0));
    let mut model = regressor();
    let err = model
        .autofit(&data.smiles, &y, None, None, Some(space), 2)
        .unwrap_err();
    assert!(matches!(err, Error::Search(_)));
    assert!(!model.is_fitted());
}
