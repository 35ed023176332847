//! Members of the kernel's `struct file_operations`.
//!
//! A write reached through one of these gets tagged with `1 << index`, so the
//! fuzzer knows which kind of call on the file to try.
use rustc_hash::FxHashMap;

pub const FILE_OPERATIONS: [&str; 31] = [
    "llseek",
    "read",
    "write",
    "read_iter",
    "write_iter",
    "iopoll",
    "iterate",
    "iterate_shared",
    "poll",
    "unlocked_ioctl",
    "compat_ioctl",
    "mmap",
    "open",
    "flush",
    "release",
    "fsync",
    "fasync",
    "lock",
    "sendpage",
    "get_unmapped_area",
    "check_flags",
    "flock",
    "splice_write",
    "splice_read",
    "setlease",
    "fallocate",
    "show_fdinfo",
    "mmap_capabilities",
    "copy_file_range",
    "remap_file_range",
    "fadvise",
];

lazy_static! {
    static ref KIND_INDEX: FxHashMap<&'static str, u32> = FILE_OPERATIONS
        .iter()
        .enumerate()
        .map(|(i, &k)| (k, i as u32))
        .collect();
}

/// Position of `kind` in [`FILE_OPERATIONS`], 0 for unknown members.
pub fn kind_index(kind: &str) -> u32 {
    match KIND_INDEX.get(kind) {
        Some(&i) => i,
        None => {
            log::debug!("unknown file operation '{}'", kind);
            0
        }
    }
}

pub fn kind_flag(kind: &str) -> u32 {
    1 << kind_index(kind)
}
