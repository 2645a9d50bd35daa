//! Feature extraction: binary STL geometry and time-series calendar
//! features.

pub mod calendar;
pub mod stl;
pub mod timeseries;

pub use calendar::HolidayCalendar;
pub use stl::{parse_stl, StlMetrics, StlParseError};
pub use timeseries::{derive_features, DemandObservation, PointFeatures};
