//! Utility functions for countdown math, clocks, and presentation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::abi::AbiDecode;
use ethers::types::{Address, U256};

/// Selector of Solidity's `Error(string)`.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Selector of Solidity's `Panic(uint256)`.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Seconds until the next claim: `max(0, last_claim + cooldown - now)`.
pub fn seconds_remaining(last_claim: u64, cooldown: u64, now: u64) -> u64 {
    last_claim.saturating_add(cooldown).saturating_sub(now)
}

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        // A clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self { now: AtomicU64::new(now) }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Narrow a contract quantity to `u64`, saturating on overflow.
pub fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

/// Parse a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Hex quantity encoding used by wallet RPC methods.
pub fn to_hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Render a countdown as `"Hh Mm Ss"`, or a ready message at zero.
pub fn format_countdown(seconds: u64) -> String {
    if seconds == 0 {
        return "Ready to claim!".to_string();
    }
    let hrs = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{}h {}m {}s", hrs, mins, secs)
}

/// Shorten an address to `0x1234…abcd`.
pub fn short_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

/// Wei to an ether string without trailing zeros (`1e15` → `"0.001"`).
pub fn format_ether(wei: U256) -> String {
    let formatted = ethers::utils::format_ether(wei);
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{}.0", whole)
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => format!("{}.0", formatted),
    }
}

/// Decode revert data returned by a failed call.
///
/// Understands `Error(string)` and `Panic(uint256)`; anything else yields `None`.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, body) = data.split_at(4);
    if selector == ERROR_STRING_SELECTOR {
        return String::decode(body).ok();
    }
    if selector == PANIC_SELECTOR {
        return U256::decode(body).ok().map(|code| format!("panic code {:#x}", code));
    }
    None
}
