//! Board geometry: shapes, distances, layers and the item interface

pub mod distance;
pub mod items;
pub mod layers;
pub mod shapes;

pub use items::{BoardItem, DesignItem};
pub use layers::{LayerId, LayerSet, LayerTable};
pub use shapes::{Aabb, Shape};
