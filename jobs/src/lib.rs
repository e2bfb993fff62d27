pub mod queue;
pub mod worker;

pub use queue::ChannelQueue;
pub use worker::Worker;
