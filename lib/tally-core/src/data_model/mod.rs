//! Data model.

mod point;
pub use self::point::{DataPoint, Value};

mod tags;
pub use self::tags::{is_valid_name, TagSet};
