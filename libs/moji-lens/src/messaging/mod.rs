mod handle;
mod types;

pub use handle::{ChannelError, ContextHandle};
pub use types::{Envelope, Message, OcrReply, PageStatus, Reply};
