#![no_std]
#[cfg(not(feature = "user"))]
compile_error!("`mmio-shim` needs a backend, enable feature `crate/user`");

extern crate alloc;

#[cfg(feature = "user")]
extern crate std;

#[cfg(feature = "user")]
pub mod user;

#[cfg(feature = "user")]
pub use user::*;
