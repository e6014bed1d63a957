pub mod common;
pub mod detector;
pub mod page;
pub mod locator;
pub mod image_utils;
pub mod cache;
pub mod store;
pub mod messaging;
pub mod image2text;
pub mod injector;
pub mod orchestrator;
pub mod background;
pub mod content;
pub mod popup;
pub mod runtime;
