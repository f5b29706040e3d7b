//! Scalars: little-endian, aligned to `min(size, WORD_SIZE)`.

use std::any::type_name;
use std::mem::size_of;

use crate::error::{BlockError, BlockResult};

use super::{
    load_flat, save_flat, scalar_align, Layout, LayoutKind, LoadContext, MeasureContext,
    SaveContext,
};

fn le_bytes<const N: usize>(data: &[u8]) -> BlockResult<[u8; N]> {
    data.try_into().map_err(|_| BlockError::SizeMismatch {
        offset: 0,
        reason: format!("expected {N} bytes, got {}", data.len()),
    })
}

fn invalid<T>(reason: String) -> BlockError {
    BlockError::InvalidEncoding {
        type_name: type_name::<T>(),
        reason,
    }
}

macro_rules! scalar_layout {
    ($($ty:ty),* $(,)?) => {$(
        impl Layout for $ty {
            const KIND: LayoutKind = LayoutKind::Flat { size: size_of::<$ty>() };
            const ALIGN: usize = scalar_align(size_of::<$ty>());

            fn measure(&self, ctx: &mut MeasureContext) {
                ctx.reserve(Self::ALIGN, size_of::<$ty>());
            }

            fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
                save_flat(self, ctx)
            }

            fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
                load_flat(ctx)
            }

            fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
                out.copy_from_slice(&self.to_le_bytes());
                Ok(())
            }

            fn read_flat(data: &[u8]) -> BlockResult<Self> {
                Ok(<$ty>::from_le_bytes(le_bytes(data)?))
            }
        }
    )*};
}

scalar_layout!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

// Pointer-sized integers are stored as 64-bit words on every platform.
macro_rules! word_layout {
    ($ty:ty => $wide:ty) => {
        impl Layout for $ty {
            const KIND: LayoutKind = LayoutKind::Flat { size: 8 };
            const ALIGN: usize = 8;

            fn measure(&self, ctx: &mut MeasureContext) {
                ctx.reserve(Self::ALIGN, 8);
            }

            fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
                save_flat(self, ctx)
            }

            fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
                load_flat(ctx)
            }

            fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
                out.copy_from_slice(&(*self as $wide).to_le_bytes());
                Ok(())
            }

            fn read_flat(data: &[u8]) -> BlockResult<Self> {
                let wide = <$wide>::from_le_bytes(le_bytes(data)?);
                <$ty>::try_from(wide)
                    .map_err(|_| invalid::<$ty>(format!("{wide} out of range")))
            }
        }
    };
}

word_layout!(usize => u64);
word_layout!(isize => i64);

impl Layout for bool {
    const KIND: LayoutKind = LayoutKind::Flat { size: 1 };
    const ALIGN: usize = 1;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(1, 1);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        save_flat(self, ctx)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        load_flat(ctx)
    }

    fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
        out[0] = u8::from(*self);
        Ok(())
    }

    fn read_flat(data: &[u8]) -> BlockResult<Self> {
        match le_bytes::<1>(data)? {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(invalid::<bool>(format!("byte {other:#x}"))),
        }
    }
}

impl Layout for char {
    const KIND: LayoutKind = LayoutKind::Flat { size: 4 };
    const ALIGN: usize = 4;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(4, 4);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        save_flat(self, ctx)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        load_flat(ctx)
    }

    fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
        out.copy_from_slice(&u32::from(*self).to_le_bytes());
        Ok(())
    }

    fn read_flat(data: &[u8]) -> BlockResult<Self> {
        let code = u32::from_le_bytes(le_bytes(data)?);
        char::from_u32(code).ok_or_else(|| invalid::<char>(format!("code point {code:#x}")))
    }
}

impl Layout for () {
    const KIND: LayoutKind = LayoutKind::EMPTY;
    const ALIGN: usize = 1;

    fn measure(&self, _ctx: &mut MeasureContext) {}

    fn save(&self, _ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        Ok(())
    }

    fn load(_ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        Ok(())
    }

    fn write_flat(&self, _out: &mut [u8]) -> BlockResult<()> {
        Ok(())
    }

    fn read_flat(_data: &[u8]) -> BlockResult<Self> {
        Ok(())
    }
}
