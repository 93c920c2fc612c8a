//! Detection stage.
//!
//! Two independent detectors run on the same fixed 2-second tick, each
//! reading windowed slices from the [`crate::store::Store`] and appending
//! [`crate::model::Alert`]s. Neither mutates the event table; both accept
//! their thresholds fresh at each tick so a config reload never misbehaves
//! mid-tick.

pub mod deauth;
pub mod rogue;

pub use deauth::DeauthDetector;
pub use rogue::RogueDetector;
