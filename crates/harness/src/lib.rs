mod board;
mod faults;

pub use board::{TestBoard, init_tracing};
pub use faults::{FlakyGateway, RecordingDispatcher};
