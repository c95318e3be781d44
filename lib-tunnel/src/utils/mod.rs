//! Byte-stream utilities and proxy-chain resolution

pub mod bytes;
pub mod real_ip;

pub use bytes::{concat, split_checked, take_checked};
pub use real_ip::{parse_forwarded_for, resolve_real_ip, Cidr, TrustProxy};
