//! Core drivers for Renesas RZ/A platforms.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod dmac;
