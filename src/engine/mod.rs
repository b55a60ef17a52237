//! Transport engines that plug into the manager through [`crate::native`].

pub mod loopback;

#[cfg(feature = "quinn")]
pub mod quinn;
