//! Build the program graph from a cfg dump.
//!
//! The dump is a json document:
//! `{"functions":[{"path","name","compiled","blocks":[{"name","trace_pc","instructions":[[addr,line]],"successors":[idx]}]}]}`,
//! where successors are indices into the blocks of the same function and the
//! first block is the entry.
use super::Program;
use crate::utils::json_addr;

use std::{fs::read_to_string, io, path::Path};

use json::JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] json::Error),
    #[error("malformed cfg dump: {0}")]
    Malformed(String),
}

pub fn load<P: AsRef<Path>>(path: P) -> Result<Program, LoadError> {
    let content = read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Program, LoadError> {
    let root = json::parse(content)?;
    if !root["functions"].is_array() {
        return Err(LoadError::Malformed("missing 'functions'".into()));
    }

    let mut p = Program::new();
    for f in root["functions"].members() {
        let name = f["name"]
            .as_str()
            .ok_or_else(|| LoadError::Malformed("function without name".into()))?;
        let path = f["path"].as_str().unwrap_or("");
        let compiled = f["compiled"].as_bool().unwrap_or(true);
        let fid = p.add_function(path, name, compiled);

        let mut ids = Vec::new();
        let mut succs = Vec::new();
        for (i, b) in f["blocks"].members().enumerate() {
            let bname = b["name"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("bb{}", i));
            let trace_pc = if b["trace_pc"].is_null() {
                None
            } else {
                Some(json_addr(&b["trace_pc"]).ok_or_else(|| {
                    LoadError::Malformed(format!("{}::{}: bad trace pc", name, bname))
                })?)
            };
            let bid = p.add_block(fid, &bname, trace_pc);
            for inst in b["instructions"].members() {
                let addr = json_addr(&inst[0]).ok_or_else(|| {
                    LoadError::Malformed(format!("{}::{}: bad instruction", name, bname))
                })?;
                p.add_instruction(bid, addr, inst[1].as_u32().unwrap_or(0));
            }
            succs.push(
                b["successors"]
                    .members()
                    .filter_map(JsonValue::as_usize)
                    .collect::<Vec<_>>(),
            );
            ids.push(bid);
        }

        for (from, targets) in succs.into_iter().enumerate() {
            for t in targets {
                match ids.get(t) {
                    Some(&to) => p.add_edge(ids[from], to),
                    None => log::warn!("{}: successor {} out of range", name, t),
                }
            }
        }
    }

    log::info!(
        "cfg loaded: {} functions, {} blocks, {} instrumented",
        p.functions().count(),
        p.block_count(),
        p.number_basic_blocks()
    );
    Ok(p)
}
