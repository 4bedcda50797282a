pub mod array_value;
pub mod codec;
pub mod map_value;
pub mod value;

pub use array_value::ArrayValue;
pub use map_value::MapValue;
pub use value::{FirestoreValue, SentinelValue, ValueKind};
