/// implement packbytes serialization for a bilge enum, using its underlying integer
#[macro_export]
macro_rules! pack_enum {
    ($t:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$t>()];

            fn to_le_bytes(self) -> Self::Bytes {
                <$t as bilge::Bitsized>::ArbitraryInt::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                <$t as bilge::Bitsized>::ArbitraryInt::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$t>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$t as bilge::Bitsized>::ArbitraryInt::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$t as bilge::Bitsized>::ArbitraryInt::from_be_bytes(bytes))
            }
        }
    };
}

/// copy a little endian packbytes value out of a byte slice, or `None` if the slice is too short
pub fn read_le<T: packbytes::FromBytes>(bytes: &[u8]) -> Option<T> {
    use packbytes::ByteArray;
    let mut dst = T::Bytes::zeroed();
    let size = T::Bytes::SIZE;
    dst.as_mut().copy_from_slice(bytes.get(.. size)?);
    Some(T::from_le_bytes(dst))
}

/// write a little endian packbytes value at the beginning of a byte slice
pub fn write_le<T: packbytes::ToBytes>(bytes: &mut [u8], value: T) {
    let mut src = value.to_le_bytes();
    let src = src.as_mut();
    bytes[.. src.len()].copy_from_slice(src);
}
