use anyhow::{bail, Context, Result};
use serial_collector::{logging, AppConfig, Service};

#[derive(Debug)]
struct Cli {
    config_path: String,
    headless: bool,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path: Option<String> = None;
        let mut headless = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                    config_path = Some(value);
                }
                "--headless" => headless = true,
                "--help" | "-h" => {
                    println!(
                        "Usage: serial-collector [--config <path>] [--headless]\n\
                         --config <path>   Path to JSON or TOML configuration (default: config.json)\n\
                         --headless        Log port status instead of drawing the status table"
                    );
                    std::process::exit(0);
                }
                other => {
                    if config_path.is_none() {
                        config_path = Some(other.to_string());
                    } else {
                        bail!("unknown argument '{other}'");
                    }
                }
            }
        }

        Ok(Self {
            config_path: config_path.unwrap_or_else(|| AppConfig::default_path().into()),
            headless,
        })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse()?;

    let config = AppConfig::load_or_bootstrap(&cli.config_path)
        .with_context(|| format!("unable to load configuration from {}", cli.config_path))?;

    let _guard = logging::init(&config, cli.headless)?;

    Service::new(config).headless(cli.headless).run().await
}
