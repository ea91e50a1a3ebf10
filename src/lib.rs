#![doc = include_str!("RUSTDOC.md")]

pub mod auth;
pub mod platform;
pub mod util;

#[cfg(test)]
pub mod test_support;
