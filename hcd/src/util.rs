#![allow(dead_code)]

use core::fmt;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    crate::console::print(args);
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        $crate::util::_print(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(concat!($fmt, "\n"), $($arg)*));
}

pub use crate::kprintln;

/// Driver-level errors surfaced to the USB host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// No topology record for the address, the device is disconnected, or
    /// its controller is not registered.
    InvalidDevice,
    /// The controller has no QHD slot for the address.
    ResourceExhausted,
    /// DMA mapping failed.
    NoMemory,
    /// A descriptor pool landed somewhere the controller cannot address.
    Invalid,
    AlreadyExists,
}

impl fmt::Display for KError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KError::InvalidDevice => "invalid device",
            KError::ResourceExhausted => "no free device slot",
            KError::NoMemory => "out of DMA memory",
            KError::Invalid => "invalid argument",
            KError::AlreadyExists => "already exists",
        };
        f.write_str(s)
    }
}

pub type KResult<T> = core::result::Result<T, KError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        assert_eq!(KError::InvalidDevice.to_string(), "invalid device");
        assert_eq!(KError::ResourceExhausted.to_string(), "no free device slot");
    }
}
