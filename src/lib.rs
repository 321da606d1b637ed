//! Target-side core of a CIP Safety communication stack: connection
//! establishment (SafetyOpen / SafetyClose), the Safety Supervisor Object
//! with its state machine and explicit services, and the non-volatile
//! safety identifiers.
//!
//! The surrounding system plugs in at four seams, all passed to
//! [`SafetyCore::new`] as trait objects: the safety application
//! ([`sapl::SafetyApp`]), the lower transport ([`transport::Transport`]),
//! the indicator outputs ([`transport::Indicators`]) and the safety
//! validator engines ([`validator::ValidatorPool`]).

pub mod assembly;
pub mod cip;
pub mod core;
pub mod dispatch;
pub mod establish;
pub mod ids;
pub mod sapl;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod unid;
pub mod validator;

mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::core::{CoreConfig, CoreError, SafetyCore};
pub use crate::dispatch::{ExplicitRequest, ExplicitResponse};
