// crates/stagecast-core/src/consumer.rs
//
// The output seam. Physical drivers (SDI, NDI, screen, file) live outside
// this crate and implement this contract; the engine only pushes sealed
// frames at channel cadence and orders consumers by priority index.

use crate::error::CoreError;
use crate::format::VideoFormatDesc;
use crate::frame::ConstFrame;

pub trait Consumer {
    fn initialize(
        &mut self,
        format_desc: &VideoFormatDesc,
        channel_index: i32,
    ) -> Result<(), CoreError>;

    /// Deliver one mixed frame. `Ok(false)` asks the channel to detach this
    /// consumer.
    fn send(&mut self, frame: ConstFrame) -> Result<bool, CoreError>;

    fn name(&self) -> &str;

    fn print(&self) -> String {
        self.name().to_string()
    }

    /// Whether this consumer paces the channel (e.g. an SDI clock).
    fn has_synchronization_clock(&self) -> bool {
        true
    }

    /// Priority key; the channel sends to lower indexes first.
    fn index(&self) -> i32;
}
