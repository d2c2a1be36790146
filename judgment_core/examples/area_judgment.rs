//! End-to-end area judgment run.
//!
//! With a config path argument this runs that configuration. Without one it
//! writes a small synthetic square-stimulus dataset to a temp directory and
//! trains and evaluates both heads on it.
//!
//! Run with: cargo run --example area_judgment -- [config.toml]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use judgment_core::{
    run, Checkpointable, JudgmentTag, PipelineConfig, StimulusDataset,
};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const SIDE: usize = 16;

/// Images of 1-4 random filled squares; MA is the mean square area and AA the
/// total covered area.
fn square_stimuli(samples: usize, seed: u64) -> Result<StimulusDataset, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut images = Array4::zeros((samples, SIDE, SIDE, 1));
    let mut mean_area = Vec::with_capacity(samples);
    let mut aggregate_area = Vec::with_capacity(samples);

    for n in 0..samples {
        let count = rng.gen_range(1..=4);
        let mut sizes = Vec::with_capacity(count);
        for _ in 0..count {
            let size = rng.gen_range(1..=5);
            let y0 = rng.gen_range(0..=SIDE - size);
            let x0 = rng.gen_range(0..=SIDE - size);
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    images[[n, y, x, 0]] = 1.0;
                }
            }
            sizes.push((size * size) as f32);
        }
        mean_area.push(sizes.iter().sum::<f32>() / count as f32);
        aggregate_area.push(images.slice(ndarray::s![n, .., .., ..]).sum());
    }

    let mut measurements = BTreeMap::new();
    measurements.insert(JudgmentTag::MeanArea, mean_area);
    measurements.insert(JudgmentTag::AggregateArea, aggregate_area);
    Ok(StimulusDataset::new(images, measurements)?)
}

fn demo_config(dir: &Path) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    square_stimuli(64, 7)?.save_checkpoint(dir.join("training.bin"))?;
    square_stimuli(8, 11)?.save_checkpoint(dir.join("test.bin"))?;

    let toml = format!(
        r#"
[pipeline]
heads = "both"
references = 10
ladder_range = "max_observed"
log_dir = "{dir}/logs"

[architecture]
channels = [8, 4]

[autoencoder]
epochs = 2
batch_size = 16

[head]
epochs = 20
learning_rate = 0.01

[train]
dataset = "{dir}/training.bin"
model_dir = "{dir}/models"
key = "{dir}/models/key.json"

[evaluate]
test_data = "{dir}/test.bin"
results = "{dir}/test_results.tsv"
"#,
        dir = dir.display()
    );
    Ok(PipelineConfig::from_str(&toml)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load_from_file(path)?,
        None => {
            let dir: PathBuf = std::env::temp_dir().join("area_judgment_demo");
            std::fs::create_dir_all(&dir)?;
            println!("Writing synthetic stimuli to {}", dir.display());
            demo_config(&dir)?
        }
    };

    let outcome = run(&config)?;
    for head in &outcome.heads.heads {
        let exact = head.report.as_ref().map(|r| r.final_exact_match);
        println!(
            "  {} head: {} references, exact match {:?}",
            head.classifier.tag(),
            head.ladder.len(),
            exact
        );
    }
    if let Some(summary) = outcome.evaluation {
        println!(
            "Wrote {} responses to {} ({} floored)",
            summary.rows_written,
            summary.results.display(),
            summary.floored
        );
    }
    Ok(())
}
