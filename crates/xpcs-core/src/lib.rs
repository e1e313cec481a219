pub mod bins;
pub mod compute;
pub mod config;
pub mod consts;
pub mod correlator;
pub mod error;
pub mod io;
pub mod params;

pub use bins::Bin;
pub use config::{CorrelationMethod, CorrelatorConfig, DiagonalStrategy};
pub use correlator::Correlator;
pub use error::{Result, XpcsError};
pub use params::CorrelatorParams;
