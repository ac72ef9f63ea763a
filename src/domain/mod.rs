// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define the core
// concepts of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything else in the crate speaks in these terms: an
// Attribute, a LabelTriple, a RawRecord, a PipelineError.

// Attributes, label triples and manifest rows
pub mod labels;

// Typed failures and the pipeline stage they are reported against
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
