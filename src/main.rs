use anyhow::{anyhow, bail, Result};
use clap::Parser;
use scenesmith::agent::Generator;
use scenesmith::backend::{BackendRegistry, MODEL_CHOICES};
use scenesmith::config::{self, Config};
use scenesmith::host::BlenderHost;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "scenesmith",
    about = "Generate Blender scenes from natural-language prompts",
    version
)]
struct Args {
    /// What to build, e.g. "draw a red cube at origin"
    prompt: Option<String>,

    /// Model identifier (see --list-models)
    #[arg(short, long, default_value = "chatgpt")]
    model: String,

    /// Path to the Blender binary used to execute generated code
    #[arg(long, default_value = "blender")]
    blender: PathBuf,

    /// Seconds to wait for script execution before giving up
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Validate generated code without executing it
    #[arg(long)]
    check: bool,

    /// List known model identifiers and exit
    #[arg(long)]
    list_models: bool,

    /// Interactively store the OpenAI API key
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.setup {
        return config::setup_api_key_interactive().map_err(|e| anyhow!(e));
    }

    if args.list_models {
        println!("Known models (anything else is sent to the local Ollama server):");
        for (id, label) in MODEL_CHOICES {
            println!("  {:18} {}", id, label);
        }
        return Ok(());
    }

    let prompt = match args.prompt.as_deref().map(str::trim) {
        Some(prompt) if !prompt.is_empty() => prompt.to_string(),
        _ => bail!("Please enter a prompt before submitting."),
    };

    let config = Config::load();
    let backend = BackendRegistry::default()
        .resolve(&args.model, &config)
        .map_err(|e| anyhow!("{}", e))?;
    let host = BlenderHost::new(args.blender, Duration::from_secs(args.timeout));

    eprintln!("  Model: {}", args.model);
    eprintln!("  Prompt: {}", prompt);

    let mut generator = Generator::new(backend, host);
    if args.check {
        generator = generator.check_only();
    }

    let outcome = generator.run(&prompt).await;
    if outcome.is_success() {
        println!("{}", outcome.message());
        Ok(())
    } else {
        bail!("{}", outcome.message());
    }
}
