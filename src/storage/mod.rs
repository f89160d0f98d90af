//! Storage layout extraction and upgrade verification.
//!
//! [`extract_layouts`] turns compiler ASTs into a [`StorageDump`]: for every
//! contract and library, the shape of each struct it declares. Dumps are
//! serializable, the dump of the live deployment is diffed against the new
//! one with [`compare_dumps`] and the deployment is gated by
//! [`ensure_compatible`].
//!
//! [`ensure_unique_slots`] independently checks that no two contracts anchor
//! their namespace at the same slot.

mod error;
mod extract;
mod layout;
mod mutation;
mod namespace;


pub use error::{StorageError, StorageResult};
pub use extract::{StorageSelection, extract_layouts};
pub use layout::{
    ArraySlot, BuiltinValue, ElementaryType, EnumSlot, Footprint, LayoutKind, MappingSlot,
    Packing, SlotPosition, StorageDump, StorageLayout, StorageSlot, StructLayout, StructSlot,
    WORD_SIZE, packing,
};
pub use mutation::{
    MutationKind, Severity, StorageMutation, StorageReport, compare_dumps, ensure_compatible,
};
pub use namespace::{
    SlotAssignment, SlotCollision, SlotValue, collect_slot_assignments, ensure_unique_slots,
    find_slot_collisions,
};

pub(crate) use extract::{Declaration, DeclarationIndex};
