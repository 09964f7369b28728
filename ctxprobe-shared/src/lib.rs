#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod probe;
pub mod report;
