pub mod io;
pub mod utils;

pub use io::IoMem;
pub use log;

use core::num::TryFromIntError;

use libc::c_int;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(pub c_int);

impl Error {
    pub const EINVAL: Self = Error(-(libc::EINVAL as c_int));
    pub const ENOMEM: Self = Error(-(libc::ENOMEM as c_int));
    pub const EFAULT: Self = Error(-(libc::EFAULT as c_int));
    pub const EAGAIN: Self = Error(-(libc::EAGAIN as c_int));
    pub const EINTR: Self = Error(-(libc::EINTR as c_int));
    pub const ETIME: Self = Error(-(libc::ETIME as c_int));
    pub const ENODEV: Self = Error(-(libc::ENODEV as c_int));
    pub const EIO: Self = Error(-(libc::EIO as c_int));
    pub const EBUSY: Self = Error(-(libc::EBUSY as c_int));
    pub const EACCES: Self = Error(-(libc::EACCES as c_int));

    pub fn from_kernel_errno(errno: c_int) -> Error {
        Error(errno)
    }

    pub fn to_kernel_errno(&self) -> c_int {
        self.0
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut ::core::fmt::Formatter) -> core::fmt::Result {
        match -self.0 as c_int {
            libc::EINVAL => write!(fmt, "EINVAL"),
            libc::ENOMEM => write!(fmt, "ENOMEM"),
            libc::EFAULT => write!(fmt, "EFAULT"),
            libc::EAGAIN => write!(fmt, "EAGAIN"),
            libc::EINTR => write!(fmt, "EINTR"),
            libc::ETIME => write!(fmt, "ETIME"),
            libc::ENODEV => write!(fmt, "ENODEV"),
            libc::EIO => write!(fmt, "EIO"),
            libc::EBUSY => write!(fmt, "EBUSY"),
            libc::EACCES => write!(fmt, "EACCES"),
            _ => write!(fmt, "Unknown error {}", self.0),
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Error {
        Error::EINVAL
    }
}

pub type KernelResult<T> = Result<T, Error>;
