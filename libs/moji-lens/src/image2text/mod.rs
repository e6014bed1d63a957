mod types;
pub use types::{RelayError, VisionConfig};

mod vision_api_call;
pub use vision_api_call::{handle_claude_ocr, parse_data_url, VisionClient};

mod relay;
pub use relay::{ChannelRelay, OcrRelay};
