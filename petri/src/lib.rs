//! Colony growth tracking for time-lapse photographs of petri dishes.
//!
//! A run locates the dishes once, builds per-dish temporal masks from the
//! reference and calibration frames, then counts colonies in every
//! (frame, dish) unit and folds the counts into one series per dish.

pub mod binary_mask;
pub mod blob_separation;
pub mod circle_detection;
pub mod color_utils;
pub mod colony_counting;
pub mod config;
pub mod dish_detection;
pub mod frames;
pub mod image_input;
pub mod morphology;
pub mod output_manager;
pub mod params;
pub mod progress;
pub mod segmentation;
pub mod shared_metadata;
pub mod still_processing;
pub mod temporal_masks;
pub mod threshold;
pub mod time_series;
pub mod timelapse_processing;
pub mod visualization;
