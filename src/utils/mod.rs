use std::time::{SystemTime, UNIX_EPOCH};

pub mod tokio_rt;

macro_rules! fxhashmap {
    ($($key:expr => $value:expr,)+) => { fxhashmap!($($key => $value),+) };
    ($($key:expr => $value:expr),*) => {
        {
            let mut _map = ::rustc_hash::FxHashMap::default();
            $(
                let _ = _map.insert($key, $value);
            )*
            _map.shrink_to_fit();
            _map
        }
    };
}

pub(crate) fn to_boxed_str<T: AsRef<str>>(s: T) -> Box<str> {
    let t = s.as_ref();
    String::into_boxed_str(t.to_string())
}

/// Seconds since UNIX epoch, 0 if the clock is before it.
pub(crate) fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse an address given either as a decimal number or a `0x` prefixed hex string.
pub(crate) fn parse_addr_str(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

pub(crate) fn json_addr(val: &json::JsonValue) -> Option<u64> {
    if let Some(s) = val.as_str() {
        parse_addr_str(s)
    } else {
        val.as_u64()
    }
}
