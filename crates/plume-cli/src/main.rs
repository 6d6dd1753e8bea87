use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plume_contracts::{Credential, NormalizedRequest, ProviderId};
use plume_engine::Gateway;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const VOLC_VISUAL_MODEL_PREFIX: &str = "high_aes_";

#[derive(Debug, Parser)]
#[command(name = "plume", version, about = "Image generation gateway CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images through one vendor and print the result.
    Generate(GenerateArgs),
    /// List provider ids and their models.
    Providers,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long = "reference")]
    references: Vec<String>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    negative_prompt: Option<String>,
    /// Vendor option as key=value; values that parse as JSON keep their type.
    #[arg(long = "option")]
    options: Vec<String>,
    /// JSON request file; flags given alongside override its fields.
    #[arg(long)]
    request: Option<PathBuf>,
    /// Print the markdown summary instead of the JSON result.
    #[arg(long)]
    summary: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("plume error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let gateway = Gateway::from_env().context("failed to set up the gateway")?;
    match cli.command {
        Command::Generate(args) => run_generate(&gateway, args),
        Command::Providers => {
            for provider in gateway.providers() {
                println!("{}\t{}", provider.id(), provider.models().join(", "));
            }
            Ok(0)
        }
    }
}

fn run_generate(gateway: &Gateway, args: GenerateArgs) -> Result<i32> {
    let request = build_request(&args)?;
    let credential = credential_for(&args.provider, request.model())?;
    let result = gateway.generate(&args.provider, &request, &credential);

    if args.summary {
        println!("{}", result.summary);
    } else {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    }
    Ok(if result.is_success() { 0 } else { 2 })
}

fn build_request(args: &GenerateArgs) -> Result<NormalizedRequest> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut request: NormalizedRequest = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse request {}", path.display()))?;
            if let Some(prompt) = &args.prompt {
                request = request.with_prompt(prompt.clone());
            }
            request
        }
        None => NormalizedRequest::new(args.prompt.clone().unwrap_or_default()),
    };

    if let Some(model) = &args.model {
        request = request.with_model(model.clone());
    }
    if let Some(size) = &args.size {
        request = request.with_size(size.clone());
    }
    if !args.references.is_empty() {
        request = request.with_reference_images(args.references.iter().cloned());
    }
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }
    if let Some(negative_prompt) = &args.negative_prompt {
        request = request.with_negative_prompt(negative_prompt.clone());
    }
    for option in &args.options {
        let (key, value) = parse_option(option)?;
        request = request.with_option(key, value);
    }
    Ok(request)
}

fn parse_option(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("option '{raw}' must look like key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("option '{raw}' has an empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn credential_for(provider: &str, model: Option<&str>) -> Result<Credential> {
    let Some(id) = ProviderId::parse(provider) else {
        // The gateway reports unknown providers itself.
        return Ok(Credential::api_key(""));
    };
    match id {
        ProviderId::Xai => api_key_from("XAI_API_KEY"),
        ProviderId::SiliconFlow => api_key_from("SILICONFLOW_API_KEY"),
        ProviderId::Tongyi => api_key_from("ALIBABA_API_KEY"),
        ProviderId::Zhipu => api_key_from("ZHIPUAI_API_KEY"),
        ProviderId::Hunyuan => key_pair_from("TENCENT_SECRET_ID", "TENCENT_SECRET_KEY"),
        ProviderId::Doubao => match model {
            Some(model) if model.starts_with(VOLC_VISUAL_MODEL_PREFIX) => {
                key_pair_from("VOLC_ACCESS_KEY_ID", "VOLC_SECRET_ACCESS_KEY")
            }
            _ => api_key_from("ARK_API_KEY"),
        },
    }
}

fn env_value(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn api_key_from(name: &str) -> Result<Credential> {
    Ok(Credential::api_key(env_value(name)?))
}

fn key_pair_from(id_name: &str, secret_name: &str) -> Result<Credential> {
    Ok(Credential::key_pair(env_value(id_name)?, env_value(secret_name)?))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::{build_request, parse_option, Cli, Command};

    #[test]
    fn option_values_keep_json_types() -> anyhow::Result<()> {
        assert_eq!(parse_option("n=2")?, ("n".to_string(), json!(2)));
        assert_eq!(parse_option("logo_add=true")?, ("logo_add".to_string(), json!(true)));
        assert_eq!(parse_option("style=riso")?, ("style".to_string(), json!("riso")));
        assert!(parse_option("novalue").is_err());
        assert!(parse_option("=1").is_err());
        Ok(())
    }

    #[test]
    fn flags_override_request_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"prompt":"a cat","model":"cogview-3","vendorOptions":{"user_id":"u1"}}"#,
        )?;
        let cli = Cli::try_parse_from([
            "plume",
            "generate",
            "--provider",
            "zhipuai-image",
            "--request",
            path.to_str().unwrap_or_default(),
            "--model",
            "cogview-4",
            "--option",
            "quality=hd",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        let request = build_request(&args)?;
        assert_eq!(request.prompt(), "a cat");
        assert_eq!(request.model(), Some("cogview-4"));
        assert_eq!(request.option_str("user_id"), Some("u1"));
        assert_eq!(request.option_str("quality"), Some("hd"));
        Ok(())
    }

    #[test]
    fn prompt_flag_fills_a_promptless_request_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{"model":"cogview-3","size":"1024x1024"}"#)?;
        let cli = Cli::try_parse_from([
            "plume",
            "generate",
            "--provider",
            "zhipuai-image",
            "--request",
            path.to_str().unwrap_or_default(),
            "--prompt",
            "a cat",
        ])?;
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        let request = build_request(&args)?;
        assert_eq!(request.prompt(), "a cat");
        assert_eq!(request.model(), Some("cogview-3"));
        assert_eq!(request.size(), Some("1024x1024"));
        Ok(())
    }
}
