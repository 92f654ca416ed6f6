//! Concrete background jobs.

pub mod confirmation_delivery;
pub mod weather_report;

pub use confirmation_delivery::ConfirmationDeliveryJob;
pub use weather_report::WeatherReportJob;
