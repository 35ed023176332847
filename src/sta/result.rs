//! Write sets computed offline, loaded from the json file of an analysis unit.
//!
//! ```json
//! {"conditions": [{"block": "0xffffffff81000040", "branch": 0,
//!   "writers": [{"block": 96, "trait_fixed": true, "repeat": 1, "prio": 3,
//!                "contexts": [{"cmds": [19458], "chain": [96, 100]}]}]}]}
//! ```
//!
//! A branch absent from the file is unknown to the analysis, `"writers": []`
//! means no writer was found and `"tainted": false` marks a branch no global
//! data flows into.
use super::{CallContext, Mod, WriteSetOracle};
use crate::{
    model::{BlockId, Program},
    utils::json_addr,
};

use std::{fs::read_to_string, io, path::Path};

use json::JsonValue;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] json::Error),
    #[error("malformed static result: {0}")]
    Malformed(String),
}

#[derive(Debug, Default)]
pub struct StaticResult {
    entries: FxHashMap<(BlockId, usize), Vec<Mod>>,
}

impl StaticResult {
    pub fn load<P: AsRef<Path>>(path: P, program: &Program) -> Result<Self, ResultError> {
        let content = read_to_string(path)?;
        Self::parse(&content, program)
    }

    pub fn parse(content: &str, program: &Program) -> Result<Self, ResultError> {
        let root = json::parse(content)?;
        if !root["conditions"].is_array() {
            return Err(ResultError::Malformed("missing 'conditions'".into()));
        }

        let mut entries = FxHashMap::default();
        let mut skipped = 0;
        for cond in root["conditions"].members() {
            let addr = json_addr(&cond["block"])
                .ok_or_else(|| ResultError::Malformed(format!("bad block: {}", cond["block"])))?;
            let branch = cond["branch"].as_usize().unwrap_or(0);
            if cond["tainted"].as_bool() == Some(false) {
                continue;
            }
            let terminal = match program.block_at(addr) {
                Some(b) => program.terminal_block(b),
                None => {
                    skipped += 1;
                    continue;
                }
            };
            let mut mods = Vec::new();
            for w in cond["writers"].members() {
                if let Some(m) = Self::parse_writer(w, program)? {
                    mods.push(m);
                }
            }
            entries.insert((terminal, branch), mods);
        }
        if skipped != 0 {
            log::debug!("{} analysed branches not in program", skipped);
        }
        Ok(Self { entries })
    }

    fn parse_writer(w: &JsonValue, program: &Program) -> Result<Option<Mod>, ResultError> {
        let addr = json_addr(&w["block"])
            .ok_or_else(|| ResultError::Malformed(format!("bad writer: {}", w["block"])))?;
        let block = match program.block_at(addr) {
            Some(b) => b,
            None => {
                log::debug!("writer {:#x} not in program", addr);
                return Ok(None);
            }
        };
        let contexts = w["contexts"]
            .members()
            .map(|c| CallContext {
                cmds: c["cmds"].members().filter_map(JsonValue::as_u64).collect(),
                chain: c["chain"].members().filter_map(json_addr).collect(),
            })
            .collect();
        Ok(Some(Mod {
            block,
            trait_fixed: w["trait_fixed"].as_bool().unwrap_or(false),
            repeat: w["repeat"].as_u32().unwrap_or(0),
            prio: w["prio"].as_i32().unwrap_or(0),
            contexts,
        }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl WriteSetOracle for StaticResult {
    fn write_set(&self, _: &Program, terminal: BlockId, branch: usize) -> Option<Vec<Mod>> {
        self.entries.get(&(terminal, branch)).cloned()
    }
}
