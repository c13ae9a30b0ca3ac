use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

mod config;
mod engine;
mod env;
mod error;
mod host;
mod index;
mod logging;
mod networking;
mod process;
mod prompt;
mod storage;
mod util;
mod version;

use config::{RunContext, UpdaterConfig};
use engine::UpdateResolver;
use host::{Arch, RegistryHostInfo, StaticHostInfo};
use networking::Credentials;
use process::PowerShellInstaller;
use prompt::{AssumeYes, ConsolePrompt, OperatorPrompt};

const DEFAULT_ACCOUNT: &str = "w11updater";

#[derive(Parser, Debug)]
#[command(
    name = "Triquetra Updater",
    author,
    version,
    about = "Installs the latest Windows cumulative update from a community mirror"
)]
struct Cli {
    /// Primary update server. Defaults to the first configured mirror.
    #[arg(long)]
    base_url: Option<String>,

    /// Additional mirror; may be repeated. Replaces the configured extras.
    #[arg(long = "mirror")]
    mirrors: Vec<String>,

    #[arg(long, default_value = DEFAULT_ACCOUNT)]
    user: String,

    #[arg(long, default_value = DEFAULT_ACCOUNT)]
    password: String,

    /// Install this exact build instead of the newest one.
    #[arg(short, long)]
    build: Option<String>,

    /// Download packages but install nothing.
    #[arg(long)]
    dry_run: bool,

    /// Use the failsafe server over plain HTTP.
    #[arg(long)]
    failsafe: bool,

    /// Take the first reachable mirror instead of the fastest.
    #[arg(long)]
    no_speed_test: bool,

    /// Answer yes to every question.
    #[arg(short, long)]
    yes: bool,

    /// Exit without waiting for Enter.
    #[arg(long)]
    no_pause: bool,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Pretend the installed build is this one.
    #[arg(long)]
    local_version: Option<String>,

    /// Force the package architecture (amd64 or arm64).
    #[arg(long, value_parser = parse_arch)]
    arch: Option<Arch>,

    /// Pretend the installed release channel is this one, e.g. 24H2.
    #[arg(long)]
    display_version: Option<String>,

    /// Rules file to use instead of updater.json.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_arch(value: &str) -> Result<Arch, String> {
    Arch::parse(value).ok_or_else(|| format!("unknown architecture: {value}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(env::default_data_dir);
    if let Err(err) = env::ensure_data_dir(&data_dir) {
        eprintln!("cannot create {}: {err}", data_dir.display());
    }
    logging::init(&env::log_file(&data_dir), cli.verbose);
    info!("Triquetra Updater {}", env!("CARGO_PKG_VERSION"));

    let code = match run(&cli, data_dir).await {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            1
        }
    };
    if !cli.no_pause && !cli.yes {
        prompt::pause();
    }
    std::process::exit(code);
}

async fn run(cli: &Cli, data_dir: PathBuf) -> error::Result<()> {
    let rules = UpdaterConfig::load(cli.config.as_deref(), &data_dir)?;
    let ctx = build_context(cli, data_dir, rules);
    if ctx.dry_run {
        warn!("Dry run: packages will be downloaded but not installed.");
    }

    let host = RegistryHostInfo::new(StaticHostInfo {
        version: cli.local_version.clone(),
        display_channel: cli.display_version.clone(),
        arch: cli.arch,
    });
    let prompt: Arc<dyn OperatorPrompt> = if cli.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(ConsolePrompt)
    };

    let mut resolver = UpdateResolver::new(
        ctx,
        Arc::new(host),
        Arc::new(PowerShellInstaller::new()),
        prompt,
    );
    let outcome = resolver.run().await?;
    info!("Finished: {outcome:?}");
    Ok(())
}

fn build_context(cli: &Cli, data_dir: PathBuf, rules: UpdaterConfig) -> RunContext {
    let (mirrors, speed_test) = if cli.failsafe {
        (vec![rules.failsafe_url.clone()], false)
    } else {
        (mirror_list(cli, &rules), !cli.no_speed_test)
    };
    RunContext {
        data_dir,
        credentials: Some(Credentials {
            user: cli.user.clone(),
            password: cli.password.clone(),
        }),
        mirrors,
        speed_test,
        downgrade_https: cli.failsafe,
        dry_run: cli.dry_run,
        build_override: cli.build.clone(),
        rules,
    }
}

fn mirror_list(cli: &Cli, rules: &UpdaterConfig) -> Vec<String> {
    let mut mirrors = Vec::new();
    match &cli.base_url {
        Some(base) => mirrors.push(base.clone()),
        None => mirrors.extend(rules.mirrors.first().cloned()),
    }
    if cli.mirrors.is_empty() {
        mirrors.extend(rules.mirrors.iter().skip(1).cloned());
    } else {
        mirrors.extend(cli.mirrors.iter().cloned());
    }
    mirrors.dedup();
    mirrors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> UpdaterConfig {
        UpdaterConfig::embedded().unwrap()
    }

    #[test]
    fn default_mirrors_come_from_config() {
        let cli = Cli::parse_from(["triquetra"]);
        let ctx = build_context(&cli, PathBuf::from("data"), rules());
        assert_eq!(
            ctx.mirrors,
            vec!["https://updates.smce.pl/", "https://updates2.smce.pl/"]
        );
        assert!(ctx.speed_test);
        assert!(!ctx.downgrade_https);
        assert_eq!(
            ctx.credentials,
            Some(Credentials {
                user: "w11updater".into(),
                password: "w11updater".into()
            })
        );
    }

    #[test]
    fn failsafe_uses_single_plain_http_server() {
        let cli = Cli::parse_from(["triquetra", "--failsafe", "--base-url", "https://x/"]);
        let ctx = build_context(&cli, PathBuf::from("data"), rules());
        assert_eq!(ctx.mirrors, vec!["http://109.196.126.21:8042/"]);
        assert!(!ctx.speed_test);
        assert!(ctx.downgrade_https);
    }

    #[test]
    fn explicit_mirrors_replace_configured_extras() {
        let cli = Cli::parse_from([
            "triquetra",
            "--base-url",
            "https://a/",
            "--mirror",
            "https://b/",
            "--no-speed-test",
            "-b",
            "26100.2000",
            "--arch",
            "arm64",
        ]);
        let ctx = build_context(&cli, PathBuf::from("data"), rules());
        assert_eq!(ctx.mirrors, vec!["https://a/", "https://b/"]);
        assert!(!ctx.speed_test);
        assert_eq!(ctx.build_override.as_deref(), Some("26100.2000"));
        assert_eq!(cli.arch, Some(Arch::Arm64));
    }
}
