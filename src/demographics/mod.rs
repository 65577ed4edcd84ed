//! Demographic score post-processing.
//!
//! The remote model returns a raw feature vector. Dotting it with a per-demographic
//! weight vector and adding a bias gives the score for that demographic. Tables
//! are versioned with the model and loaded through a [`DemographicStore`].

mod key;
mod registry;
mod store;
mod table;

pub use key::{AgeGroup, DemographicKey, Gender};
pub use registry::DemographicRegistry;
pub use store::{
    BiasRecord, DemographicStore, FileDemographicStore, MemoryDemographicStore, WeightRecord,
};
pub use table::DemographicScoreTable;
