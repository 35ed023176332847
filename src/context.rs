//! State shared by every stage of the pipeline, built once at startup.
use crate::{
    addr::{AddrError, AddressTranslator},
    config::DraConfig,
    fuzz::{stats::*, Ledger, Stats},
    model::{BlockId, InputId, Program},
    rpc,
    sta::{AnalysisUnit, ResultError, StaticResult, WriteSetResolver},
    Error,
};

use std::{fs::read_to_string, path::Path};

pub struct Context {
    pub translator: AddressTranslator,
    pub program: Program,
    pub ledger: Ledger,
    pub resolver: WriteSetResolver,
    pub config: DraConfig,
    pub stats: Stats,
}

impl Context {
    pub fn new(program: Program, config: DraConfig, resolver: WriteSetResolver) -> Self {
        Self {
            translator: AddressTranslator::new(),
            program,
            ledger: Ledger::new(),
            resolver,
            config,
            stats: Stats::new(),
        }
    }

    /// Load the static result of every configured unit against `program`.
    pub fn with_static_results(program: Program, config: DraConfig) -> Result<Self, ResultError> {
        let mut resolver = WriteSetResolver::new();
        for unit in config.units.iter() {
            let res = StaticResult::load(&unit.static_result, &program)?;
            log::info!(
                "unit {}: {} analysed branches from {}",
                unit.name,
                res.len(),
                unit.static_result.display()
            );
            resolver.add_unit(AnalysisUnit {
                name: unit.name.clone().into_boxed_str(),
                prefixes: unit.prefixes.clone(),
                oracle: Box::new(res),
            });
        }
        Ok(Self::new(program, config, resolver))
    }

    /// Fold one observation of a fuzzer input into the ledger and the program.
    pub fn ingest_input(&mut self, input: &rpc::Input) -> Result<InputId, AddrError> {
        let mut pcs = Vec::new();
        let mut trace = Vec::new();
        for call in input.calls.values() {
            for &pc in call.addresses.keys() {
                pcs.push(pc);
                trace.push((self.translator.to_runtime(pc)?, call.idx));
            }
        }
        let id = self.register(&input.sig, &input.program);
        self.ledger.get_mut(id).fold_trace(pcs);
        self.observe(id, &trace);
        Ok(id)
    }

    /// Same as [`Context::ingest_input`] for a textual trace.
    pub fn ingest_trace(&mut self, sig: &str, program: &str, raw: &str) -> Result<InputId, AddrError> {
        if !self.translator.is_ready() {
            return Err(AddrError::BaseUnset);
        }
        let id = self.register(sig, program);
        let covered = self.program.ingest_coverage_trace(
            &self.translator,
            self.ledger.get_mut(id),
            id,
            raw,
        )?;
        self.after_cover(id, &covered);
        Ok(id)
    }

    /// Replay a cover file made of `signature`, `program`, `[pc ...]` line triples.
    pub fn load_cover_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, Error> {
        let content = read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let mut n = 0;
        for triple in lines.chunks(3) {
            if let [sig, prog, trace] = triple {
                self.ingest_trace(sig.trim(), prog, trace)?;
                n += 1;
            } else {
                log::warn!("cover file: trailing {} lines ignored", triple.len());
            }
        }
        log::info!("cover file: {} observations, {} inputs", n, self.ledger.len());
        Ok(n)
    }

    fn register(&mut self, sig: &str, program: &str) -> InputId {
        let (id, new) = self.ledger.register_or_update(sig, program);
        if new {
            self.stats.inc(INPUT_TOTAL);
        }
        self.stats.inc(INPUT_OBSERVATIONS);
        id
    }

    fn observe(&mut self, id: InputId, trace: &[(u64, u32)]) {
        let covered = self.program.ingest_addresses(id, trace);
        self.after_cover(id, &covered);
    }

    /// Infer the conditions of `id` and prune those any input satisfied.
    fn after_cover(&mut self, id: InputId, covered: &[(BlockId, u32)]) {
        let added = self
            .program
            .infer_conditions(self.ledger.get_mut(id), covered);
        let pruned = self.ledger.prune_all(&self.program);
        self.stats.add(INPUT_CONDITIONS, added as u64);
        self.stats.add(INPUT_PRUNED, pruned as u64);
        self.stats.store(
            SESSION_BLOCKS_COVERED,
            u64::from(self.program.number_basic_blocks_covered()),
        );
        log::debug!(
            "input {}: {} blocks, {} new conditions, {} pruned",
            self.ledger.get(id).sig,
            covered.len(),
            added,
            pruned
        );
    }
}
