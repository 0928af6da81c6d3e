pub mod slot;
pub mod slot_defs;

pub use slot::{PyComparisonOp, PyTypeFlags, PyTypeSlots};
pub use slot_defs::{find_slot_defs_by_name, SlotAccessor, SlotDef, SlotSignature, SLOT_DEFS};
