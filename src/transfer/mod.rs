//! Handle transfer between the dispatcher and the worker pool.

pub mod channel;
pub mod codec;

pub use channel::{ChannelReceiver, ChannelSender, DispatchChannel};
pub use codec::{recv_handle, send_handle, Receipt, HANDLE_COUNT};
