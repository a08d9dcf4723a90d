//! Boot flash programming and configuration sequencing for iCE40 style
//! FPGAs that load their bitstream from an SPI NOR flash.
//!
//! A session stops the FPGA by holding creset low, erases and rewrites the
//! flash sector by sector, reads it back to verify, and finally releases
//! creset with the configuration clock running until done rises.
//!
//! # Features
//!
//! - `log` (default) - log through the `log` facade
//! - `defmt` - log through `defmt` and derive `defmt::Format` on public types
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod async_comms;
pub mod board;
pub mod bus;
pub mod comms;
pub mod config;
pub mod error;
pub mod fpga;
pub mod geometry;
pub mod opcode;
pub mod poll;
pub mod programmer;
pub mod session;
pub mod traits;
pub mod verify;

#[cfg(test)]
mod sim;

pub use async_comms::AsyncFlashTransport;
pub use board::{BoardVariant, PinMap};
pub use comms::{FlashId, FlashTransport};
pub use error::{ConfigError, Error};
pub use fpga::{ConfigController, ConfigState};
pub use geometry::FlashAddress;
pub use poll::{CancelToken, PollConfig};
pub use programmer::{AsyncSectorProgrammer, ProgramReport, SectorProgrammer};
pub use session::{Orchestrator, SessionError};
pub use traits::{AsyncFlashDevice, BitstreamStore, FlashDevice};
pub use verify::{AsyncVerifier, Verification, Verifier};
