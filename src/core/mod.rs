pub mod actor;
pub mod bits;
pub mod buffer;
pub mod checksum;
pub mod endian;
pub mod error;
pub mod frame;
pub mod function;
pub mod layout;
pub mod register;
pub mod transports;

pub use actor::*;
pub use bits::*;
pub use buffer::*;
pub use endian::*;
pub use error::*;
pub use frame::*;
pub use function::*;
pub use layout::*;
pub use register::*;
pub use transports::*;
