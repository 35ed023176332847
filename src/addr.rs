//! Translation between the fuzzer's pc values and the addresses of the program graph.
//!
//! The fuzzer reports the low 32 bits of each `__sanitizer_cov_trace_pc` return
//! address. The program graph is keyed by full kernel addresses, i.e. the fuzzer's
//! value plus the kernel's high word, minus the size of the call instruction.
//! Within this crate the former is called *symbolic* and the latter *runtime*.
use std::{fs::read_to_string, io, path::Path};

use thiserror::Error;

/// Distance between the return address kcov records and the call instruction itself.
pub const PC_CORRECTION: u64 = 5;

#[derive(Debug, Error)]
pub enum AddrError {
    #[error("address base is not set")]
    BaseUnset,
    #[error("bad address base '{0}'")]
    BadBase(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Clone)]
pub struct AddressTranslator {
    base: Option<u64>,
}

impl AddressTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: u32) -> Self {
        let mut t = Self::new();
        t.set_base(base);
        t
    }

    /// Set the 32-bit offset learned from the peer, it becomes the high word of runtime addresses.
    pub fn set_base(&mut self, base: u32) {
        self.base = Some(u64::from(base) << 32);
    }

    /// Read the offset from a file holding one decimal number per line, the last one wins.
    pub fn load_base<P: AsRef<Path>>(&mut self, path: P) -> Result<u32, AddrError> {
        let content = read_to_string(path)?;
        let line = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| AddrError::BadBase(String::new()))?;
        let base = line
            .parse::<u32>()
            .map_err(|_| AddrError::BadBase(line.to_string()))?;
        self.set_base(base);
        Ok(base)
    }

    pub fn is_ready(&self) -> bool {
        self.base.is_some()
    }

    /// Shifted base, `None` before the peer told us.
    pub fn base(&self) -> Option<u64> {
        self.base
    }

    pub fn to_runtime(&self, symbolic: u64) -> Result<u64, AddrError> {
        let base = self.base.ok_or(AddrError::BaseUnset)?;
        Ok(symbolic.wrapping_add(base).wrapping_sub(PC_CORRECTION))
    }

    pub fn to_symbolic(&self, runtime: u64) -> Result<u64, AddrError> {
        let base = self.base.ok_or(AddrError::BaseUnset)?;
        Ok(runtime.wrapping_sub(base).wrapping_add(PC_CORRECTION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{remove_file, write};

    #[test]
    fn translation_is_inverse() {
        let samples = [
            0,
            1,
            PC_CORRECTION - 1,
            PC_CORRECTION,
            0x10,
            0x8100_0000,
            0xffff_ffff,
            0xffff_ffff_8100_0000,
            u64::MAX,
        ];
        for base in [0, 1, 0xffff_ffff] {
            let t = AddressTranslator::with_base(base);
            for &x in samples.iter() {
                assert_eq!(t.to_symbolic(t.to_runtime(x).unwrap()).unwrap(), x);
                assert_eq!(t.to_runtime(t.to_symbolic(x).unwrap()).unwrap(), x);
            }
        }
    }

    #[test]
    fn base_goes_to_high_word() {
        let t = AddressTranslator::with_base(0xffff_ffff);
        assert_eq!(t.base(), Some(0xffff_ffff_0000_0000));
        assert_eq!(
            t.to_runtime(0x8100_0005).unwrap(),
            0xffff_ffff_8100_0000
        );
    }

    #[test]
    fn unset_base_fails_fast() {
        let t = AddressTranslator::new();
        assert!(!t.is_ready());
        assert!(matches!(t.to_runtime(0x10), Err(AddrError::BaseUnset)));
        assert!(matches!(t.to_symbolic(0x10), Err(AddrError::BaseUnset)));
    }

    #[test]
    fn load_base_from_file() {
        let path = std::env::temp_dir().join(format!("dra-base-{}", std::process::id()));
        write(&path, "12\n4294967295\n\n").unwrap();
        let mut t = AddressTranslator::new();
        let base = t.load_base(&path).unwrap();
        remove_file(&path).unwrap();
        assert_eq!(base, 0xffff_ffff);
        assert_eq!(t.base(), Some(0xffff_ffff_0000_0000));
    }
}
