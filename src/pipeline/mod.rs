pub mod slot;

pub use slot::{LatestSlot, SlotRead};
