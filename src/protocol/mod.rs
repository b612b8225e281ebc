//! Wire protocols spoken by the device drivers.

pub mod sony;
