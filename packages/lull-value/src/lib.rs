pub mod error;
pub mod map;
pub mod value;

pub use error::ValueError;
pub use map::IdleMap;
pub use value::IdleValue;
