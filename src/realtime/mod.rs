// =============================================================================
// Realtime fan-out hub (C12)
// =============================================================================

pub mod hub;

pub use hub::{Envelope, RealtimeHub, Topic};
