pub mod evaluate;
pub mod forecast;
pub mod forecast_sector;
pub mod import_series;
pub mod sectors;
