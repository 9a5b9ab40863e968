#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate byteorder;
extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate io;

pub mod frame;
pub mod session_proto;
pub mod kern_proto;
pub mod moninj_proto;
