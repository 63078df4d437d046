use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use image_relay::classify::ErrorClassifier;
use image_relay::coordinator::GenerationCoordinator;
use image_relay::events::{ImageEvent, DONE_FRAME};
use image_relay::mime::is_valid_image;
use image_relay::models::{
    Config, GenerationOutcome, GenerationRequest, ProviderKind, PARAM_ASPECT_RATIO,
    PARAM_RESOLUTION,
};
use image_relay::prompts;
use image_relay::providers::build_provider;
use image_relay::storage::OutputStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "image-relay")]
#[command(about = "Generate or edit images through a remote image model")]
struct CliArgs {
    /// Text prompt, or the edit instruction when --image is given.
    #[arg(value_name = "PROMPT")]
    prompt: String,

    /// google, openrouter, tuzi or openai. Defaults to DEFAULT_PROVIDER.
    #[arg(long, value_parser = parse_provider_arg)]
    provider: Option<ProviderKind>,

    /// Model ID; defaults to the provider's default model.
    #[arg(long)]
    model: Option<String>,

    /// Number of images to generate (1-5).
    #[arg(long, short = 'n', default_value_t = 1)]
    count: usize,

    /// Sampling temperature in [0, 1].
    #[arg(long)]
    temperature: Option<f32>,

    /// Aspect ratio hint such as 16:9.
    #[arg(long)]
    aspect_ratio: Option<String>,

    /// Resolution hint such as 2K.
    #[arg(long)]
    resolution: Option<String>,

    /// Reference image to edit; repeat for several.
    #[arg(long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,

    /// Overrides the provider's API key from the environment.
    #[arg(long)]
    api_key: Option<String>,

    /// Print Server-Sent-Events records on stdout.
    #[arg(long)]
    sse: bool,
}

fn parse_provider_arg(input: &str) -> std::result::Result<ProviderKind, String> {
    input.parse().map_err(|e: image_relay::Error| e.to_string())
}

fn read_reference_images(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            if !is_valid_image(&bytes) {
                bail!("{} is not a PNG, JPEG, WebP or GIF image", path.display());
            }
            Ok(bytes)
        })
        .collect()
}

fn build_request(args: &CliArgs, config: &Config, kind: ProviderKind) -> Result<GenerationRequest> {
    let images = read_reference_images(&args.images)?;
    let edit = !images.is_empty();

    let prompt = if edit {
        prompts::edit_prompt(&args.prompt, images.len())
    } else {
        args.prompt.clone()
    };
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| kind.default_model().to_string());

    let mut request = GenerationRequest::new(prompt, model)
        .with_temperature(args.temperature.unwrap_or(config.default_temperature(edit)));
    for image in images {
        request = request.with_reference_image(image);
    }
    if let Some(ratio) = &args.aspect_ratio {
        request = request.with_param(PARAM_ASPECT_RATIO, ratio);
    }
    if let Some(resolution) = &args.resolution {
        request = request.with_param(PARAM_RESOLUTION, resolution);
    }
    request.validate()?;
    Ok(request)
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_env()?;
    let kind = args.provider.unwrap_or(config.default_provider);
    let api_key = match &args.api_key {
        Some(key) => key.clone(),
        None => config.api_key_for(kind)?,
    };

    let request = Arc::new(build_request(&args, &config, kind)?);
    info!(
        "Request: provider={}, model={}, count={}, edit={}, temperature={}",
        kind,
        request.model,
        args.count,
        request.is_edit(),
        request.temperature
    );

    // One connection pool shared by the adapter and the extractor's URL fetches.
    let http_client = reqwest::Client::new();
    let provider = build_provider(kind, api_key, http_client, &config);
    let store = OutputStore::create(&config.output_dir, request.is_edit())?;

    let coordinator = GenerationCoordinator::default();
    let mut stream = coordinator.stream(Arc::clone(&request), args.count, provider);
    let mut saved = 0usize;

    while let Some(item) = stream.next().await {
        match item {
            Ok(outcome) => {
                let stored = match &outcome {
                    GenerationOutcome::Success { index, image } => match store.save(*index, image) {
                        Ok(stored) => {
                            saved += 1;
                            Some(stored)
                        }
                        Err(e) => {
                            error!("Failed to save image #{}: {}", index, e);
                            None
                        }
                    },
                    GenerationOutcome::Failure { index, kind, message } => {
                        warn!("Image #{} failed ({}): {}", index, kind, message);
                        None
                    }
                };
                if args.sse {
                    let event = ImageEvent::from_outcome(&outcome, stored.as_ref());
                    print!("{}", event.to_sse_frame()?);
                }
            }
            Err(e) => {
                let kind = ErrorClassifier.classify(&e);
                error!("Generation failed ({}): {}", kind, e);
                if args.sse {
                    print!("{}", ImageEvent::request_failed(kind, &e).to_sse_frame()?);
                }
            }
        }
    }

    if args.sse {
        print!("{}", DONE_FRAME);
    }

    if saved == 0 {
        bail!("No images were generated");
    }
    info!(
        "Saved {} of {} image(s) to {}",
        saved,
        args.count,
        store.dir().display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    info!("Starting image-relay");

    match run(args).await {
        Ok(()) => {
            info!("Generation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Generation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
