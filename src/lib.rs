//! Historical analog engine: pattern scanning and clustering over price
//! history, a step-wise strategy simulator with risk gates and an
//! autopilot, and a validation harness that runs many simulations in
//! parallel and turns them into verdicts.

pub mod autopilot;
pub mod batch;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod regime;
pub mod risk;
pub mod scanner;
pub mod signals;
pub mod similarity;
pub mod simulation;
pub mod store;
pub mod validation;
