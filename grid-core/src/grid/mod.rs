//! The Grid Generator (spec §4.2).

pub mod generator;

pub use generator::{
    generate_grid, geometric_sizes, GridGenerationError, GridSpec, MinSizes, Precisions, SideFunds,
    WeightDistribution,
};
