pub mod camera;
pub mod config;
pub mod density;
pub mod error;
pub mod filter;
pub mod model;
pub mod optim;
pub mod schedule;
pub mod transform;


pub use camera::{load_viewpoints, orbit_viewpoints, Viewpoint};
pub use config::DensifyConfig;
pub use density::{DensifyParams, DensifyReport, DensityController};
pub use error::{TrainError, TrainResult};
pub use filter::{FilterSummary, VisibilityFilter};
pub use model::GaussianModel;
pub use optim::{AdamState, MomentState, OptimizerStateBridge, ParamGroup};
pub use schedule::ExponentialLr;
