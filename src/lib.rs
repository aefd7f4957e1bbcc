#[macro_use]
extern crate enum_primitive;
pub mod core;

#[cfg(test)]
pub mod test;

pub mod prelude {
    pub use crate::core::*;
}
