//! Configuration-resolution engine: descriptors, paths, defaults,
//! visibility and field arrays. Pure, synchronous, no I/O.

pub mod defaults;
pub mod descriptor;
pub mod diagnostics;
pub mod field_array;
pub mod path;
pub mod values;
pub mod visibility;

pub use descriptor::{Condition, FieldDescriptor, LeafField, LeafKind};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use field_array::{ArrayState, FieldArrays, ItemId};
pub use values::FormValues;
pub use visibility::{HiddenValuePolicy, NodeKind, ResolvedForm, ResolvedNode};
