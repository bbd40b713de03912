use anyhow::Result;
use clap::Parser;
use molgraph_models::estimator::TrainingConfig;
use molgraph_models::{EdgePredMolecularEncoder, EdgePredParams, EncoderConfig, MolecularEstimator};
use molgraph_test_data::TestFile;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run on CPU rather than on GPU.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value = "10")]
    epochs: usize,

    #[arg(long, default_value = "32")]
    hidden_size: usize,

    /// Load `<stem>.safetensors` from this model hub repository instead of training.
    #[arg(long)]
    repo_id: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    // the last line of the fixture is deliberately malformed
    let smiles: Vec<&str> = TestFile::molecules_smi()
        .as_str()
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    let (valid, invalid) = smiles.split_at(smiles.len() - 1);

    let mut encoder = EdgePredMolecularEncoder::new(EncoderConfig {
        arch: EdgePredParams {
            num_layer: 3,
            hidden_size: args.hidden_size,
            ..Default::default()
        },
        training: TrainingConfig {
            epochs: args.epochs,
            batch_size: 4,
            ..Default::default()
        },
        device: args.cpu.then(|| "cpu".to_string()),
        verbose: true,
        ..Default::default()
    })?;

    match &args.repo_id {
        Some(repo_id) => {
            encoder.load_from_hub("checkpoints/edgepred.safetensors", repo_id)?;
        }
        None => {
            encoder.fit(valid)?;
        }
    }

    let embeddings = encoder.encode_array(valid)?;
    println!("Embeddings: {:?}", embeddings.shape());
    for (smiles, row) in valid.iter().zip(embeddings.rows()) {
        let norm = row.dot(&row).sqrt();
        println!("{smiles:<40} |z| = {norm:.3}");
    }

    if let Err(e) = encoder.encode_array(invalid) {
        println!("Rejected input: {e}");
    }
    Ok(())
}
