use num::traits::ToBytes;

/// Byte-order adapter between host scalars and Modbus register data.
///
/// Layout storage keeps every value already in wire order (big-endian per
/// register), which makes frame payloads a straight copy of the storage
/// bytes. Scalars swap on little-endian hosts through their `to_be_bytes`
/// representation; byte strings pass through untouched.
pub trait WireValue: Copy + PartialEq + std::fmt::Debug {
    const SIZE: usize;

    /// Writes the wire representation into `dst[..SIZE]`.
    fn put(self, dst: &mut [u8]);

    /// Reads the value back out of `src[..SIZE]`.
    fn get(src: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($scalar:ty),* $(,)?) => {$(
        impl WireValue for $scalar {
            const SIZE: usize = std::mem::size_of::<$scalar>();

            fn put(self, dst: &mut [u8]) {
                dst[..Self::SIZE].copy_from_slice(ToBytes::to_be_bytes(&self).as_ref());
            }

            fn get(src: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$scalar>()];
                raw.copy_from_slice(&src[..Self::SIZE]);
                Self::from_be_bytes(raw)
            }
        }
    )*};
}

impl_wire_scalar!(u16, u32, u64, i16, i32, i64, f32, f64);

impl<const N: usize> WireValue for [u8; N] {
    const SIZE: usize = N;

    fn put(self, dst: &mut [u8]) {
        dst[..N].copy_from_slice(&self);
    }

    fn get(src: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&src[..N]);
        raw
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip<T: WireValue>(value: T) {
        let mut wire = [0u8; 32];
        value.put(&mut wire);
        assert_eq!(T::get(&wire), value);
    }

    #[test]
    fn scalars_survive_the_wire() {
        round_trip(0x1805u16);
        round_trip(0xc0bc_cccdu32);
        round_trip(-40_000i32);
        round_trip(20.0f32);
        round_trip(0xdead_beef_0102_0304u64);
        round_trip(-2.5e300f64);
    }

    #[test]
    fn scalars_store_big_endian() {
        let mut wire = [0u8; 4];
        0xc0bc_cccdu32.put(&mut wire);
        assert_eq!(wire, [0xc0, 0xbc, 0xcc, 0xcd]);

        0x0006u16.put(&mut wire);
        assert_eq!(&wire[..2], &[0x00, 0x06]);
    }

    #[test]
    fn byte_strings_pass_through() {
        let mut wire = [0u8; 8];
        (*b"Default\0").put(&mut wire);
        assert_eq!(&wire, b"Default\0");
        round_trip(*b"Another\0");
    }
}
