// Library exports for the emotion overlay

pub mod capture;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod features;
pub mod models;
pub mod overlay;
pub mod scaler;
pub mod session;
