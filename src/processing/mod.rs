pub mod autobias;
pub mod filters;
pub mod pipeline;
pub mod rate;
pub mod raster;
