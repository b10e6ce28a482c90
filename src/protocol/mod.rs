//! Wire-level protocol stacks

pub mod airplay;
pub mod companion;
pub mod crypto;
pub mod dmap;
pub mod hap;
pub mod mrp;
pub mod raop;
