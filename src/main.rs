use log::{error, info};
use std::env;

use recipe_stream::providers::ProviderFactory;
use recipe_stream::{load_config, server, HttpSubscriber, Provider, RecipeStream, SessionState};

const USAGE: &str = "Usage:
  recipe-stream serve
  recipe-stream generate <base-url> <ingredient>... [--preferences <text>] [--provider <name>]";

struct GenerateArgs {
    base_url: String,
    ingredients: Vec<String>,
    preferences: Option<String>,
    provider: Provider,
}

fn parse_generate_args(args: &[String]) -> Result<GenerateArgs, Box<dyn std::error::Error>> {
    let mut iter = args.iter();
    let base_url = iter.next().ok_or("Please provide the server base URL")?.clone();

    let mut ingredients = Vec::new();
    let mut preferences = None;
    let mut provider = Provider::default();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--preferences" => {
                preferences = Some(iter.next().ok_or("--preferences needs a value")?.clone());
            }
            "--provider" => {
                let name = iter.next().ok_or("--provider needs a value")?;
                provider = name.parse().map_err(|_| {
                    format!(
                        "Unknown provider '{}', expected one of: {}",
                        name,
                        ProviderFactory::available_providers().join(", ")
                    )
                })?;
            }
            _ => ingredients.push(arg.clone()),
        }
    }

    Ok(GenerateArgs {
        base_url,
        ingredients,
        preferences,
        provider,
    })
}

async fn generate(args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream =
        RecipeStream::new(HttpSubscriber::new(&args.base_url)).with_provider(args.provider);
    stream.generate(args.ingredients, args.preferences)?;

    let mut snapshots = stream.watch().ok_or("no active session")?;
    let mut printed = 0;
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.buffer.len() > printed {
            print!("{}", &snapshot.buffer[printed..]);
            printed = snapshot.buffer.len();
        }
        if snapshot.is_terminal() || snapshots.changed().await.is_err() {
            break;
        }
    }
    println!();

    let snapshot = stream.snapshot();
    if snapshot.state == SessionState::Error {
        return Err(snapshot
            .error
            .unwrap_or_else(|| "generation failed".to_string())
            .into());
    }

    let recipe = stream.finalize()?;
    println!("{}", serde_json::to_string_pretty(&recipe)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().ok_or(USAGE)?;

    match command.as_str() {
        "serve" => {
            let config = load_config()?;
            info!(
                "Starting server on {}:{}",
                config.server.host, config.server.port
            );
            server::serve(config).await
        }
        "generate" => {
            let generate_args = parse_generate_args(&args[1..])?;
            if let Err(e) = generate(generate_args).await {
                error!("Generation failed: {}", e);
                return Err(e);
            }
            Ok(())
        }
        _ => Err(USAGE.into()),
    }
}
