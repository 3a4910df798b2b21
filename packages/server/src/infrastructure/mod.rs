//! Infrastructure: external collaborators and wire-format DTOs.
//!
//! Everything here talks to the outside world (media relays, the persistor,
//! the reputation service) or defines the shapes that cross it.

pub mod dto;
pub mod persistence;
pub mod relay;
pub mod reputation;
