mod document;
mod render;
mod types;

pub use document::{Document, Node, NodeKey, NodeKind, SharedDocument};
pub use types::{
    ComputedStyle, Display, ElementData, ElementSnapshot, Float, NodeSnapshot, PageError,
    PageSnapshot, Position, Rect,
};
