pub mod entity;
pub mod error;
pub mod events;
pub mod field_value;
pub mod ids;
pub mod palette;
pub mod rule;

pub use entity::{Entity, EntityRow, Folder, NewEntity, Note};
pub use error::CoreError;
pub use events::{BusEvent, ChangeBus, Envelope};
pub use field_value::{FieldValue, Patch};
pub use ids::*;
pub use palette::Color;
pub use rule::AutomationRule;
