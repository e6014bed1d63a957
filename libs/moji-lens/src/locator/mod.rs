mod utils;

pub use utils::collect_image_candidates;
pub use utils::extract_css_url;
pub use utils::MIN_IMAGE_SIZE;
