use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::{prelude::*, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{info, warn};

use spine_disc_rs::{collect_uploads, AppContext, Config, DiscClassifierNet, Response, SegmentationNet};

#[derive(Serialize)]
struct Record<'a> {
    input: &'a Path,
    #[serde(flatten)]
    response: &'a Response,
}

/// Loads a model, leaving its slot empty on failure so requests report it instead of
/// the process refusing to start.
fn load_or_warn<T>(name: &str, load: impl FnOnce() -> spine_disc_rs::Result<T>) -> Option<T> {
    match load() {
        Ok(model) => Some(model),
        Err(e) => {
            warn!(model = name, error = %e, "model unavailable; requests will fail");
            None
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    ensure!(config.input.exists(), "Input path does not exist");

    ThreadPoolBuilder::new()
        .num_threads(config.jobs as usize)
        .build_global()?;

    let segmenter = load_or_warn("segmentation", || {
        SegmentationNet::new(&config.segmentation_model, config.segmentation_logits)
    });
    let classifier = load_or_warn("classification", || {
        DiscClassifierNet::new(&config.categorical_model, &config.binary_model)
    });
    let context = AppContext::new(segmenter, classifier, config.settings());

    let uploads: Vec<PathBuf> = collect_uploads(&config.input);
    ensure!(!uploads.is_empty(), "No supported images found under the input path");

    let progress_bar = ProgressBar::new(uploads.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let responses: Vec<Response> = uploads
        .par_iter()
        .progress_with(progress_bar.clone())
        .map(|upload| context.respond(upload))
        .collect();

    progress_bar.finish();

    let mut failures = 0;
    for (input, response) in uploads.iter().zip(&responses) {
        if response.is_failure() {
            failures += 1;
        }
        let line = serde_json::to_string(&Record { input, response })
            .with_context(|| format!("Failed to serialize result for {}", input.display()))?;
        println!("{line}");
    }

    info!(
        total = uploads.len(),
        failures,
        output_dir = %config.output_dir.display(),
        "processing finished"
    );

    Ok(())
}
