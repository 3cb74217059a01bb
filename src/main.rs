use anyhow::Context;
use clap::Parser;
use drivesync::auth::{authorise_instructions, Anonymous, CredentialProvider, KeyFileCredentials};
use drivesync::logging::init_logging;
use drivesync::{DeletePolicy, Direction, SyncConfig, Synchronizer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "drivesync",
    version,
    about = "Synchronise a local folder with cloud storage in one direction"
)]
struct Cli {
    /// Local folder to synchronise
    #[arg(long)]
    local: Option<PathBuf>,

    /// Remote folder to synchronise
    #[arg(long)]
    remote: Option<String>,

    /// Direction of synchronisation: up (local is authoritative) or down (remote is authoritative)
    #[arg(long)]
    direction: Option<Direction>,

    /// Number of worker tasks
    #[arg(long)]
    threads: Option<usize>,

    /// Attempts per item before giving up
    #[arg(long)]
    tries: Option<u32>,

    /// Only log what would change
    #[arg(long)]
    dry_run: bool,

    /// Do not descend into sub-folders
    #[arg(long)]
    no_recursive: bool,

    /// Always compare content hashes, not just sizes and timestamps
    #[arg(long)]
    hash_compare: bool,

    /// Skip files larger than this many KB
    #[arg(long, value_name = "KB")]
    max_size: Option<u64>,

    /// File with one ignore pattern per line
    #[arg(long, value_name = "FILE")]
    ignore: Option<PathBuf>,

    /// Delete items that only exist on the non-authoritative side
    #[arg(long)]
    delete_extraneous: bool,

    /// Key file holding the remote credential
    #[arg(long, value_name = "FILE")]
    keyfile: Option<PathBuf>,

    /// Configuration file (default: <config dir>/drivesync/config.json)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (or 1-7)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write the log to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print how to set up the remote credential and exit
    #[arg(long)]
    authorise: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut SyncConfig) -> anyhow::Result<()> {
        if let Some(local) = &self.local {
            config.local_path = Some(local.clone());
        }
        if let Some(remote) = &self.remote {
            config.remote_path = Some(remote.clone());
        }
        if let Some(direction) = self.direction {
            config.direction = Some(direction);
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(tries) = self.tries {
            config.tries = tries;
        }
        if let Some(max_size) = self.max_size {
            config.max_size_kb = max_size;
        }
        if let Some(ignore) = &self.ignore {
            config
                .load_ignore_file(ignore)
                .with_context(|| format!("无法读取忽略文件 {:?}", ignore))?;
        }
        if let Some(keyfile) = &self.keyfile {
            config.key_file = Some(keyfile.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(file) = &self.log_file {
            config.log.file = Some(file.clone());
        }
        config.dry_run |= self.dry_run;
        config.hash_compare |= self.hash_compare;
        if self.no_recursive {
            config.recursive = false;
        }
        if self.delete_extraneous {
            config.delete_policy = DeletePolicy::Delete;
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(SyncConfig::default_path);
    let mut config = SyncConfig::load(&config_path)?;
    cli.apply(&mut config)?;

    let _guard = init_logging(&config.log);
    tracing::info!("drivesync 版本 {}", env!("CARGO_PKG_VERSION"));
    if let Some(file) = &config.log.file {
        tracing::info!("日志同时写入 {:?}", file);
    }

    let key_file = config
        .key_file
        .clone()
        .unwrap_or_else(KeyFileCredentials::default_path);

    if cli.authorise {
        println!("{}", authorise_instructions(&config.remote, &key_file));
        return Ok(ExitCode::SUCCESS);
    }

    config.validate()?;

    let credentials: Arc<dyn CredentialProvider> = if config.remote.needs_credentials() {
        Arc::new(KeyFileCredentials::new(key_file))
    } else {
        Arc::new(Anonymous)
    };

    let report = Synchronizer::new(config, credentials).run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(if report.has_failures() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::from(2)
        }
    }
}
