use dra::{rpc::SessionConfig, Config};
use std::{path::PathBuf, process::exit, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "dra", about = "Dependency inference for coverage-guided kernel fuzzing.")]
struct Settings {
    /// Cfg dump of the target kernel, see model/load.rs.
    #[structopt(short, long)]
    module: PathBuf,
    /// Analysis unit config, mapping each unit to its static result and source paths.
    #[structopt(short, long)]
    config: PathBuf,
    /// File with the address base of the kernel, last line wins.
    #[structopt(short = "b", long)]
    address_base: Option<PathBuf>,
    /// Cover file to replay before connecting: signature, program and trace lines.
    #[structopt(long)]
    cover: Option<PathBuf>,
    /// Address of the fuzzer, e.g. 127.0.0.1:22222. Replay only if absent.
    #[structopt(short, long)]
    peer: Option<String>,
    /// Seconds to wait after a batch of inputs.
    #[structopt(long, default_value = "10")]
    poll_interval: u64,
    /// Seconds to wait before reconnecting.
    #[structopt(long, default_value = "60")]
    reconnect_backoff: u64,
    /// Timeout of one rpc call in seconds.
    #[structopt(long, default_value = "30")]
    rpc_timeout: u64,
    /// Log level: error, warn, info, debug or trace.
    #[structopt(short, long, default_value = "info")]
    log_level: simplelog::LevelFilter,
}

pub fn main() {
    let settings = Settings::from_args();
    simplelog::CombinedLogger::init(vec![simplelog::TermLogger::new(
        settings.log_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )])
    .unwrap();

    let conf = Config {
        module: settings.module,
        config: settings.config,
        address_base: settings.address_base,
        cover: settings.cover,
        peer: settings.peer,
        session: SessionConfig {
            poll_interval: Duration::from_secs(settings.poll_interval),
            reconnect_backoff: Duration::from_secs(settings.reconnect_backoff),
        },
        rpc_timeout: Duration::from_secs(settings.rpc_timeout),
    };

    if let Err(e) = dra::start(conf) {
        log::error!("{}", e);
        exit(1);
    }
}
