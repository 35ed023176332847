#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod utils;
pub mod addr;
pub mod config;
pub mod context;
pub mod dcc;
pub mod fuzz;
pub mod model;
pub mod rpc;
pub mod sta;
#[cfg(test)]
mod testing;

use crate::{
    addr::AddrError,
    config::{ConfigError, DraConfig},
    context::Context,
    dcc::{CheckError, ControlCenter},
    model::load::LoadError,
    rpc::{RpcError, Session, SessionConfig, TcpRpc},
    sta::ResultError,
};

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("address: {0}")]
    Addr(#[from] AddrError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("cfg: {0}")]
    Load(#[from] LoadError),
    #[error("static result: {0}")]
    Result(#[from] ResultError),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("check: {0}")]
    Check(#[from] CheckError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub struct Config {
    /// Cfg dump of the kernel.
    pub module: PathBuf,
    /// Analysis unit config.
    pub config: PathBuf,
    /// File holding the address base, for replaying a cover file offline.
    pub address_base: Option<PathBuf>,
    /// Cover file to replay before the session starts.
    pub cover: Option<PathBuf>,
    /// Address of the fuzzer, `None` to stop after the replay.
    pub peer: Option<String>,
    pub session: SessionConfig,
    pub rpc_timeout: Duration,
}

pub fn start(conf: Config) -> Result<(), Error> {
    let program = model::load::load(&conf.module)?;
    let dra_conf = DraConfig::load(&conf.config)?;
    let mut ctx = Context::with_static_results(program, dra_conf)?;

    if let Some(path) = conf.address_base.as_ref() {
        let base = ctx.translator.load_base(path)?;
        log::info!("address base: {:#x}", base);
    }
    if let Some(cover) = conf.cover.as_ref() {
        if ctx.translator.is_ready() {
            ctx.load_cover_file(cover)?;
        } else {
            log::warn!("no address base, cover file {} skipped", cover.display());
        }
    }

    let dcc = ControlCenter::new(ctx);
    match conf.peer {
        Some(peer) => {
            let rpc = TcpRpc::new(&peer, conf.rpc_timeout);
            let mut session = Session::new(rpc, dcc, conf.session);
            session.run();
        }
        None => {
            let ctx = dcc.context();
            let pending: usize = ctx.ledger.iter().map(|(_, i)| i.pending.len()).sum();
            log::info!(
                "offline: {}/{} blocks covered, {} inputs, {} pending conditions",
                ctx.program.number_basic_blocks_covered(),
                ctx.program.number_basic_blocks(),
                ctx.ledger.len(),
                pending
            );
            ctx.stats.report();
        }
    }
    Ok(())
}
