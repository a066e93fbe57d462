#![deny(missing_docs)]
#![doc = "Core types shared by the morphing engine crates: the canonical error surface, deterministic seeding, schema descriptors and the injected event sink."]

pub mod errors;
pub mod events;
pub mod provenance;
pub mod rng;

pub use errors::{ErrorClass, ErrorInfo, MorphError};
pub use events::{Event, EventSink, Level, MemorySink, NullSink};
pub use provenance::{BasisProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, RngHandle};
