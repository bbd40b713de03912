use anyhow::Result;
use clap::Parser;
use molgraph_core::Targets;
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::nn::GnnType;
use molgraph_models::{GnnMolecularPredictor, GnnParams, MolecularEstimator, PredictorConfig};
use molgraph_test_data::MoleculeDataset;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value = "gin-virtual")]
    gnn_type: GnnType,

    #[arg(long, default_value = "20")]
    epochs: usize,

    /// Where to write the trained model.
    #[arg(long, default_value = "checkpoints/gnn_predictor.safetensors")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let data = MoleculeDataset::classification()?;
    let (train, test) = data.split_at(18);
    let y_train = Targets::from(train.targets());
    let y_test = Targets::from(test.targets());

    let mut model = GnnMolecularPredictor::new(PredictorConfig {
        num_tasks: data.num_tasks(),
        arch: GnnParams {
            gnn_type: args.gnn_type,
            num_layer: 3,
            emb_dim: 64,
            ..Default::default()
        },
        training: TrainingConfig {
            epochs: args.epochs,
            batch_size: 8,
            ..Default::default()
        },
        device: args.cpu.then(|| "cpu".to_string()),
        verbose: true,
        ..Default::default()
    })?;
    println!("{}", model.describe());

    model.fit(&train.smiles, &y_train, Some(test.smiles.as_slice()), Some(&y_test))?;
    println!(
        "Best epoch {} of {}",
        model.fitting_epoch(),
        model.fitting_loss().len()
    );

    let prediction = model.predict(&test.smiles)?.prediction;
    for (smiles, row) in test.smiles.iter().zip(prediction.rows()) {
        println!("{smiles:<30} {row}");
    }

    model.save_to_local(&args.output)?;
    let mut restored = GnnMolecularPredictor::new(PredictorConfig::default())?;
    let summary = restored.load_from_local(&args.output)?;
    println!(
        "Reloaded `{}`: {} parameters changed, {} unchanged",
        summary.model_name,
        summary.num_changed(),
        summary.num_unchanged()
    );
    Ok(())
}
