mod fetch;
mod types;
mod utils;

pub use fetch::{HttpImageFetcher, ImageFetcher};
pub use types::{FetchError, FetchedImage, NormalizeConfig};
pub use utils::encode_data_url;
pub use utils::image_url_to_data_url;
pub use utils::scaled_dimensions;
