pub mod cache;
pub mod csv_export;
pub mod decoder;
pub mod destination;
pub mod line_item;
pub mod object_source;
pub mod tokens;
