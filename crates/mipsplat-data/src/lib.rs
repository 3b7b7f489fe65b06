pub mod error;
pub mod ply;
pub mod splat;
pub mod store;

pub use error::{SplatError, SplatResult};
pub use ply::{load_ply, read_ply, save_ply, write_ply, PlyVariant};
pub use splat::{RenderSplat, Splat, SplatRows};
pub use store::{compact_rows, SplatParamsMut, SplatStats, SplatStore};
