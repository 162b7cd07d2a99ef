mod backend;
pub mod backends;
mod registry;
mod result;
pub mod tiling;

pub use backend::{DetectionCapability, DetectionProvider};
pub use backends::{MotionDetector, ScriptedProvider};
pub use registry::{ProviderRegistry, SharedProvider};
pub use result::{BBox, Detection, Keypoint, Point};
pub use tiling::{suppress_overlaps, tile_grid, Tile, TileDetector, TilingConfig};
