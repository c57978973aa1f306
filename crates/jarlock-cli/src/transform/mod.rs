//! Class-level transformations: target selection, prologue injection and
//! the synthesized gate class.

pub mod gate_shim;
pub mod planner;
pub mod prologue;

/// Internal name of the synthesized gate.
pub const GATE_CLASS: &str = "jarlock/runtime/LicenseGate";
/// Package entry the gate is written to.
pub const GATE_ENTRY: &str = "jarlock/runtime/LicenseGate.class";
pub const GATE_METHOD: &str = "check";
pub const GATE_DESCRIPTOR: &str = "()Z";

/// The license client the gate delegates to, shaded into the plugin.
pub const CLIENT_CLASS: &str = "jarlock/runtime/LicenseClient";
