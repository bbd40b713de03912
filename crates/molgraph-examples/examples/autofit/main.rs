use anyhow::Result;
use clap::Parser;
use molgraph_core::Targets;
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::{
    GnnMolecularPredictor, MolecularEstimator, ParameterSpec, PredictorConfig, SearchSpace,
    TaskType,
};
use molgraph_test_data::MoleculeDataset;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value = "5")]
    n_trials: usize,

    #[arg(long, default_value = "10")]
    epochs: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let data = MoleculeDataset::regression()?;
    let (train, val) = data.split_at(15);
    let y_train = Targets::from(train.task(0));
    let y_val = Targets::from(val.task(0));

    let mut model = GnnMolecularPredictor::new(PredictorConfig {
        task_type: TaskType::Regression,
        training: TrainingConfig {
            epochs: args.epochs,
            batch_size: 8,
            ..Default::default()
        },
        device: args.cpu.then(|| "cpu".to_string()),
        verbose: true,
        ..Default::default()
    })?;

    let mut space = SearchSpace::new();
    space.insert("gnn_type".into(), ParameterSpec::categorical(["gin", "gcn", "gin-virtual"]));
    space.insert("num_layer".into(), ParameterSpec::integer(2, 4));
    space.insert("emb_dim".into(), ParameterSpec::integer(16, 64));
    space.insert("learning_rate".into(), ParameterSpec::log_float(1e-4, 1e-2));

    model.autofit(
        &train.smiles,
        &y_train,
        Some(val.smiles.as_slice()),
        Some(&y_val),
        Some(space),
        args.n_trials,
    )?;
    println!("{}", model.describe());

    let prediction = model.predict(&val.smiles)?.prediction;
    for ((smiles, truth), predicted) in val
        .smiles
        .iter()
        .zip(val.task(0))
        .zip(prediction.column(0))
    {
        println!("{smiles:<30} true {truth:>6.2}  predicted {predicted:>6.2}");
    }
    Ok(())
}
