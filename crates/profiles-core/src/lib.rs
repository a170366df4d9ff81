pub mod cache;
pub mod calibration;
pub mod config;
pub mod error;
pub mod legs;
pub mod meta;
pub mod model;
pub mod profile;
pub mod profile_set;
pub mod quality_filters;
pub mod raw_profile;
pub mod regrid;
pub mod resolver;
pub mod store;
pub mod thermo;
pub mod wind;

pub use cache::{CoefficientCache, CoefficientTables, LoadReport};
pub use config::{CoefficientSource, ProcessingConfig};
pub use error::{ProfileError, Result};
pub use profile::{build_profile, Profile, ProfileOptions};
pub use profile_set::{Flight, ProfileSet};
pub use resolver::{Resolver, ValidityRule};
