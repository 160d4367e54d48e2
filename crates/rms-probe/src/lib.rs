#![doc = "Preemption measurement core: fixed-priority tasks, sample store, and platforms."]

pub mod analysis;
pub mod clock;
pub mod context;
pub mod host;
pub mod platform;
pub mod realtime;
pub mod reporter;
pub mod sim;
pub mod tasks;

pub use analysis::*;
pub use clock::*;
pub use context::*;
pub use host::*;
pub use platform::*;
pub use realtime::*;
pub use reporter::*;
pub use sim::*;
pub use tasks::*;
