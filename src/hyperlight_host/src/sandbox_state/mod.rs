/// Traits related to reset and restorarion of the `Sandbox` state
pub mod reset;
/// The standarized `Sandbox` trait and the ways it ban be transitioned
/// to a different `Sandbox` trait
pub mod sandbox;
/// Metadata about transitions between `Sandbox` states
pub mod transition;
