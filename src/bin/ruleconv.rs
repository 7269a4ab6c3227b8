//! ruleconv: convert rule-sets and run configured endpoints from the command line.

use clap::{Parser, Subcommand};
use ruleconv::convertor::{Behavior, ConvertOptions, ConvertorType, Format, SourceOptions, TargetOptions};
use ruleconv::metadata;
use ruleconv::{Options, Server};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ruleconv")]
#[command(version)]
#[command(about = "Convert rule-sets between sing-box, Clash, Surge and AdGuard formats", long_about = None)]
struct Cli {
    /// Log level (overrides the configuration)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a local rule-set file
    Convert {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source type: source, binary, adguard, clash or surge
        #[arg(long)]
        from: String,

        /// Target type: source, binary, adguard, clash or surge
        #[arg(long)]
        to: String,

        /// Clash source format: text, yaml or mrs
        #[arg(long)]
        source_format: Option<String>,

        /// Source behavior: domain, ipcidr, classical, rule-set or domain-set
        #[arg(long)]
        source_behavior: Option<String>,

        /// Clash target format: text, yaml or mrs
        #[arg(long)]
        target_format: Option<String>,

        /// Target behavior: domain, ipcidr, classical, rule-set or domain-set
        #[arg(long)]
        target_behavior: Option<String>,

        /// Keep AdGuard extended filter syntax
        #[arg(long)]
        accept_extended_rules: bool,

        /// Client User-Agent used to pick the sing-box rule-set version
        #[arg(long, default_value = "")]
        user_agent: String,
    },

    /// Validate a configuration file
    Check {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one configured endpoint through the full pipeline
    Fetch {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Route of the endpoint, as written in the configuration
        #[arg(short, long)]
        route: String,

        /// Route parameters as key=value
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Client User-Agent
        #[arg(long, default_value = "")]
        user_agent: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();

    let options = match &cli.command {
        Commands::Check { config } | Commands::Fetch { config, .. } => match Options::load(config) {
            Ok(options) => Some(options),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Convert { .. } => None,
    };
    let level = cli
        .log_level
        .clone()
        .or_else(|| options.as_ref().map(|o| o.log.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            from,
            to,
            source_format,
            source_behavior,
            target_format,
            target_behavior,
            accept_extended_rules,
            user_agent,
        } => build_convert_options(
            &from,
            &to,
            source_format.as_deref(),
            source_behavior.as_deref(),
            target_format.as_deref(),
            target_behavior.as_deref(),
            accept_extended_rules,
        )
        .and_then(|convert| {
            let convert = convert.with_metadata(metadata::detect(&user_agent));
            convert_file(&input, output.as_deref(), &convert)
        }),
        Commands::Check { .. } => options.as_ref().map_or(Ok(()), check),
        Commands::Fetch {
            route,
            params,
            user_agent,
            output,
            ..
        } => match options.as_ref() {
            Some(options) => fetch(options, &route, &params, &user_agent, output.as_deref()),
            None => Ok(()),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn build_convert_options(
    from: &str,
    to: &str,
    source_format: Option<&str>,
    source_behavior: Option<&str>,
    target_format: Option<&str>,
    target_behavior: Option<&str>,
    accept_extended_rules: bool,
) -> CliResult<ConvertOptions> {
    let source = SourceOptions {
        source_type: ConvertorType::parse(from)?,
        accept_extended_rules,
        source_format: source_format.map(Format::parse).transpose()?,
        source_behavior: source_behavior.map(Behavior::parse).transpose()?,
    };
    let target = TargetOptions {
        target_type: ConvertorType::parse(to)?,
        target_format: target_format.map(Format::parse).transpose()?,
        target_behavior: target_behavior.map(Behavior::parse).transpose()?,
    };
    Ok(ConvertOptions::new(source, target))
}

fn write_output(output: Option<&Path>, content: &[u8]) -> CliResult<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, content)?;
            log::info!("wrote {:?} ({} bytes)", path, content.len());
        }
        None => std::io::stdout().write_all(content)?,
    }
    Ok(())
}

fn convert_file(input: &Path, output: Option<&Path>, options: &ConvertOptions) -> CliResult<()> {
    log::debug!("reading {:?}", input);
    let content = fs::read(input)?;
    let converted = ruleconv::convert(&content, options)?;
    log::info!(
        "converted {:?} from {} to {}",
        input,
        options.source.source_type,
        options.target.target_type
    );
    write_output(output, &converted)
}

fn check(options: &Options) -> CliResult<()> {
    let server = Server::new(options)?;
    let routes: Vec<_> = server.routes().collect();
    println!("configuration ok: {} endpoints", routes.len());
    for route in routes {
        println!("  {}", route);
    }
    Ok(())
}

fn parse_params(params: &[String]) -> CliResult<HashMap<String, String>> {
    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => Err(format!("invalid parameter {:?}, expected key=value", param).into()),
        })
        .collect()
}

fn fetch(
    options: &Options,
    route: &str,
    params: &[String],
    user_agent: &str,
    output: Option<&Path>,
) -> CliResult<()> {
    let server = Server::new(options)?;
    let endpoint = server
        .endpoint(route)
        .ok_or_else(|| format!("no endpoint for route {}", route))?;
    let params = parse_params(params)?;

    server.start()?;
    let served = endpoint.serve(&params, user_agent);
    server.close()?;
    let served = served?;
    log::info!("{} ({}, etag {:?})", route, served.content_type, served.etag);
    write_output(output, &served.content)
}
