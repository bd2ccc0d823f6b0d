pub mod display;

pub use display::{clean_title, format_duration, format_size};
