//! Dependency control center: turns pending conditions into reports for the fuzzer.
//!
//! For every uncovered arm an input reached, a [`Dependency`] tells the fuzzer
//! whether taking the arm depends on global state, how much code lies behind
//! it and which blocks write the state the branch reads.
use crate::{
    addr::AddrError,
    context::Context,
    fuzz::stats::*,
    model::InputId,
    rpc::{
        Condition, Dependency, DependencyInput, DependencyRpc, Encode, RpcError, RunTimeData,
        UncoveredAddressKind, WriteAddress, WriteAddressAttributes, WriteAddresses,
        WriteStatementKind, MAX_MESSAGE_SIZE,
    },
    sta::{Classification, Mod, WriteSet},
};

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

pub mod ops;

/// Offset added to the static priority of a writer before it is sent.
pub const PRIO_BIAS: i32 = 100;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("address: {0}")]
    Addr(#[from] AddrError),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
}

pub struct ControlCenter {
    ctx: Context,
    max_report_size: usize,
    /// Ingested inputs whose reports are not all sent yet, oldest first.
    unreported: VecDeque<InputId>,
}

impl ControlCenter {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            max_report_size: MAX_MESSAGE_SIZE,
            unreported: VecDeque::new(),
        }
    }

    /// Reports whose encoding takes `size` bytes or more are dropped.
    pub fn with_max_report_size(mut self, size: usize) -> Self {
        self.max_report_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Ingest every input of `batch`, then report their pending conditions.
    ///
    /// Ingestion needs no peer, so a broken connection only delays reports:
    /// inputs not fully reported stay queued for [`ControlCenter::report_pending`].
    pub fn handle_batch<R: DependencyRpc>(
        &mut self,
        rpc: &mut R,
        batch: &[crate::rpc::Input],
    ) -> Result<usize, CheckError> {
        for input in batch {
            log::info!("new input: {}", input.sig);
            let id = self.ctx.ingest_input(input)?;
            if !self.unreported.contains(&id) {
                self.unreported.push_back(id);
            }
        }
        self.report_pending(rpc)
    }

    /// Report on queued inputs until the queue is empty or a call fails.
    pub fn report_pending<R: DependencyRpc>(&mut self, rpc: &mut R) -> Result<usize, CheckError> {
        let mut sent = 0;
        while let Some(&id) = self.unreported.front() {
            sent += self.check_input(rpc, id)?;
            self.unreported.pop_front();
        }
        Ok(sent)
    }

    pub fn unreported(&self) -> usize {
        self.unreported.len()
    }

    /// Send one report per pending condition of `id`, returns how many were sent.
    pub fn check_input<R: DependencyRpc>(&mut self, rpc: &mut R, id: InputId) -> Result<usize, CheckError> {
        let input = self.ctx.ledger.get(id);
        let number_conditions = input.condition_addresses.len() as u32;
        let addrs: Vec<u64> = input.condition_addresses.iter().copied().collect();
        let pending = input.pending.clone();

        let mut number_conditions_dependency = 0;
        for addr in addrs {
            if self
                .ctx
                .resolver
                .resolve_at(&self.ctx.program, addr, 0)
                .is_resolved()
            {
                number_conditions_dependency += 1;
            }
        }

        let mut sent = 0;
        for cond in pending.iter() {
            let dep = self.build_dependency(id, cond, number_conditions, number_conditions_dependency)?;
            match dep {
                Some(dep) => {
                    if self.send_dependency(rpc, &dep)? {
                        sent += 1;
                    }
                }
                None => {
                    self.ctx.stats.inc(REPORT_SKIPPED);
                }
            }
        }
        self.sync_cache_stats();
        Ok(sent)
    }

    /// Report on `cond`, `None` if its branch is not in the program.
    pub fn build_dependency(
        &mut self,
        id: InputId,
        cond: &Condition,
        number_conditions: u32,
        number_conditions_dependency: u32,
    ) -> Result<Option<Dependency>, CheckError> {
        if self.ctx.program.block_at(cond.condition_address).is_none() {
            log::debug!("condition {:#x} not in program", cond.condition_address);
            return Ok(None);
        }
        let ws = self.ctx.resolver.resolve(&self.ctx.program, cond);

        let ctx = &self.ctx;
        let tr = &ctx.translator;
        let input = ctx.ledger.get(id);
        let condition_address = tr.to_symbolic(cond.condition_address)?;
        let uncovered_address = tr.to_symbolic(cond.uncovered_address)?;

        let mut dep = Dependency {
            input: DependencyInput {
                sig: input.sig.to_string(),
                program: input.program.clone(),
                number_conditions,
                number_conditions_dependency,
                uncovered_address: BTreeMap::new(),
            },
            ..Default::default()
        };
        dep.input.uncovered_address.insert(uncovered_address, cond.idx);

        let ua = &mut dep.uncovered_address;
        ua.condition_address = condition_address;
        ua.uncovered_address = uncovered_address;
        for &a in cond.right_branch_address.iter() {
            ua.right_branch_address.push(tr.to_symbolic(a)?);
        }
        if let Some(target) = ctx.program.block_at(cond.uncovered_address) {
            ua.number_arrive_basicblocks = ctx.program.arrival_uncovered_count(target);
            ua.number_dominator_instructions = ctx.program.dominator_uncovered_count(target);
        }

        match ws.classify() {
            Classification::InputRelated => ua.kind = UncoveredAddressKind::InputRelated,
            Classification::DependencyUnwritten => {
                ua.kind = UncoveredAddressKind::DependencyRelated
            }
            Classification::DependencyWritten => {
                ua.kind = UncoveredAddressKind::DependencyRelated;
                ua.input.insert(input.sig.to_string(), cond.idx);
                let rtd = RunTimeData::untested(
                    &input.program,
                    cond.idx,
                    condition_address,
                    uncovered_address,
                );
                ua.run_time_data = Some(rtd.clone());
                for m in ws.writers() {
                    let mut wa = match write_address(ctx, m)? {
                        Some(wa) => wa,
                        None => continue,
                    };
                    let attrs = attributes(m, wa.write_address);
                    ua.write_address.insert(wa.write_address, attrs.clone());
                    wa.uncovered_address.insert(uncovered_address, attrs);
                    wa.run_time_data = rtd.clone();
                    dep.write_address.push(wa);
                }
            }
        }
        Ok(Some(dep))
    }

    /// Send `dep` unless it is too big for the wire. Returns whether it was sent.
    fn send_dependency<R: DependencyRpc>(&self, rpc: &mut R, dep: &Dependency) -> Result<bool, RpcError> {
        let sz = dep.encoded_len();
        if sz >= self.max_report_size {
            log::warn!(
                "dependency of {:#x} too big: {} bytes, dropped",
                dep.uncovered_address.uncovered_address,
                sz
            );
            self.ctx.stats.inc(REPORT_DROPPED);
            return Ok(false);
        }
        rpc.push_dependency(dep)?;
        self.ctx.stats.inc(REPORT_SENT);
        self.ctx
            .stats
            .add(REPORT_WRITE_ADDRESSES, dep.write_address.len() as u64);
        Ok(true)
    }

    /// Answer conditions the fuzzer asked about with their writers.
    ///
    /// Conditions without analysis are skipped.
    pub fn check_conditions<R: DependencyRpc>(
        &mut self,
        rpc: &mut R,
        conds: &[Condition],
    ) -> Result<usize, CheckError> {
        let mut sent = 0;
        for cond in conds {
            let ws = self.ctx.resolver.resolve(&self.ctx.program, cond);
            if let WriteSet::Unresolved = ws {
                continue;
            }
            let mut wa = WriteAddresses {
                condition: cond.clone(),
                write_address: Vec::new(),
            };
            for m in ws.writers() {
                if let Some(w) = write_address(&self.ctx, m)? {
                    wa.write_address.push(w);
                }
            }
            rpc.push_write_addresses(&wa)?;
            self.ctx
                .stats
                .add(REPORT_WRITE_ADDRESSES, wa.write_address.len() as u64);
            sent += 1;
        }
        self.sync_cache_stats();
        Ok(sent)
    }

    fn sync_cache_stats(&self) {
        let stats = &self.ctx.stats;
        stats.store(CACHE_HITS, self.ctx.resolver.hits());
        stats.store(CACHE_MISSES, self.ctx.resolver.misses());
    }
}

/// Wire form of writer `m`, `None` if its block has no address.
fn write_address(ctx: &Context, m: &Mod) -> Result<Option<WriteAddress>, AddrError> {
    let p = &ctx.program;
    let addr = match p.block_address(m.block) {
        Some(a) => a,
        None => {
            log::debug!("writer block {} has no address", p.block(m.block).name);
            return Ok(None);
        }
    };

    let mut file_operations_function = BTreeMap::new();
    for c in m.contexts.iter() {
        let entry = match c.chain.first().and_then(|&a| p.block_at(a)) {
            Some(b) => p.block(b).function,
            None => continue,
        };
        let name = &p.function(entry).name;
        match ctx.config.operation_of(name) {
            Some(op) => {
                file_operations_function.insert(op.group.clone(), ops::kind_flag(&op.kind));
            }
            None => log::debug!("{}: not a file operation", name),
        }
    }

    let input = p
        .block(m.block)
        .inputs
        .iter()
        .map(|(&id, &n)| (ctx.ledger.get(id).sig.to_string(), n))
        .collect();

    Ok(Some(WriteAddress {
        write_address: ctx.translator.to_symbolic(addr)?,
        kind: if m.trait_fixed {
            WriteStatementKind::Constant
        } else {
            WriteStatementKind::Nonconstant
        },
        file_operations_function,
        uncovered_address: BTreeMap::new(),
        run_time_data: RunTimeData::default(),
        input,
    }))
}

fn attributes(m: &Mod, write_address: u64) -> WriteAddressAttributes {
    WriteAddressAttributes {
        write_address,
        repeat: m.repeat,
        prio: m.prio + PRIO_BIAS,
    }
}
