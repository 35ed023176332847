//! The polling loop driving the whole pipeline.
use super::{DependencyRpc, RpcError};
use crate::{
    dcc::{CheckError, ControlCenter},
    fuzz::stats::*,
};

use std::{fmt, thread::sleep, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Done with the inputs of this round, answering conditions and metrics.
    Draining,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Draining => "draining",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause after a batch of inputs.
    pub poll_interval: Duration,
    /// Pause before reconnecting, when the fuzzer had nothing or the connection broke.
    pub reconnect_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(60),
        }
    }
}

pub struct Session<R> {
    rpc: R,
    dcc: ControlCenter,
    conf: SessionConfig,
    state: SessionState,
}

impl<R: DependencyRpc> Session<R> {
    pub fn new(rpc: R, dcc: ControlCenter, conf: SessionConfig) -> Self {
        Self {
            rpc,
            dcc,
            conf,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn control_center(&self) -> &ControlCenter {
        &self.dcc
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// Run until the fuzzer ends the session.
    pub fn run(&mut self) {
        while self.step() {}
        self.dcc.context().stats.report();
        log::info!("session closed by peer");
    }

    /// One round of the loop, returns false once the fuzzer ended the session.
    pub fn step(&mut self) -> bool {
        if self.state == SessionState::Disconnected {
            if let Err(e) = self.connect() {
                log::warn!("connect failed: {}", e);
                self.lose_connection();
                return true;
            }
        }

        match self.round() {
            Ok(alive) => {
                if alive {
                    self.state = SessionState::Connected;
                }
                alive
            }
            Err(CheckError::Rpc(e)) => {
                log::warn!("connection lost: {}", e);
                self.lose_connection();
                true
            }
            Err(CheckError::Addr(e)) => {
                // base is learned on connect, so this is a broken peer.
                log::error!("address translation failed: {}", e);
                self.state = SessionState::Disconnected;
                true
            }
        }
    }

    fn round(&mut self) -> Result<bool, CheckError> {
        match self.rpc.pull_new_inputs()? {
            Some(batch) if !batch.is_empty() => {
                log::info!("{} new inputs", batch.len());
                self.dcc.handle_batch(&mut self.rpc, &batch)?;
                sleep(self.conf.poll_interval);
            }
            _ => {
                log::info!("no new input, reconnect in {:?}", self.conf.reconnect_backoff);
                sleep(self.conf.reconnect_backoff);
                self.connect()?;
                self.dcc.report_pending(&mut self.rpc)?;
            }
        }

        self.state = SessionState::Draining;
        if let Some(conds) = self.rpc.pull_conditions()? {
            self.dcc.check_conditions(&mut self.rpc, &conds)?;
        }
        let covered = self.dcc.context().program.number_basic_blocks_covered();
        self.rpc.report_basic_block_covered(covered)?;
        self.dcc.context().stats.report();
        Ok(self.rpc.session_alive()?)
    }

    /// (Re)open the connection, learn the address base and announce the block total.
    fn connect(&mut self) -> Result<(), RpcError> {
        self.rpc.reconnect()?;
        let base = self.rpc.address_base()?;
        let total = self.dcc.context().program.number_basic_blocks();
        let ctx = self.dcc.context_mut();
        ctx.translator.set_base(base);
        self.rpc.report_basic_block_total(total)?;
        self.state = SessionState::Connected;
        log::info!("session up, base {:#x}, {} blocks", base, total);
        Ok(())
    }

    fn lose_connection(&mut self) {
        self.state = SessionState::Disconnected;
        self.dcc.context().stats.inc(SESSION_RECONNECTS);
        sleep(self.conf.reconnect_backoff);
    }
}
