pub mod classifier;
pub mod detection;
pub mod features;
pub mod forest_model;
pub mod history;
pub mod light_segmenter;
pub mod pixel;
pub mod smoother;
pub mod tracker;
