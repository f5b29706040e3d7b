//! Tagged unions: a tag word holding the alternative's index, then its
//! payload.

use std::any::type_name;

use crate::address::WORD_SIZE;
use crate::error::{BlockError, BlockResult};

use super::{
    flat_size, flat_slot, flat_slot_mut, load_flat, save_flat, Layout, LayoutKind, LoadContext,
    MeasureContext, SaveContext,
};

/// Tag word of a flat union value.
pub fn read_tag(data: &[u8]) -> BlockResult<u64> {
    let word = flat_slot(data, 0, WORD_SIZE)?;
    let mut tag = [0u8; WORD_SIZE];
    tag.copy_from_slice(word);
    Ok(u64::from_le_bytes(tag))
}

/// Write the tag word of a flat union value.
pub fn write_tag(out: &mut [u8], tag: u64) -> BlockResult<()> {
    flat_slot_mut(out, 0, WORD_SIZE)?.copy_from_slice(&tag.to_le_bytes());
    Ok(())
}

/// Error for a tag outside `0..alternatives`.
pub fn invalid_tag<T>(tag: u64, alternatives: u64) -> BlockError {
    BlockError::InvalidTag {
        tag,
        alternatives,
        type_name: type_name::<T>(),
    }
}

/// Encode an alternative whose payload is `value`.
fn save_alternative<T: Layout>(tag: u64, value: &T, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
    ctx.write_word(tag)?;
    value.save(ctx)
}

impl<T: Layout> Layout for Option<T> {
    const KIND: LayoutKind = LayoutKind::union(&[<() as Layout>::KIND, T::KIND]);
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        if let Some(size) = Self::KIND.static_size() {
            return ctx.reserve(WORD_SIZE, size);
        }
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        if let Some(value) = self {
            value.measure(ctx);
        }
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        if Self::KIND.is_flat() {
            return save_flat(self, ctx);
        }
        match self {
            None => save_alternative(0, &(), ctx),
            Some(value) => save_alternative(1, value, ctx),
        }
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        if Self::KIND.is_flat() {
            return load_flat(ctx);
        }
        match ctx.read_word()? {
            0 => Ok(None),
            1 => T::load(ctx).map(Some),
            tag => Err(invalid_tag::<Self>(tag, 2)),
        }
    }

    fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
        match self {
            None => write_tag(out, 0),
            Some(value) => {
                write_tag(out, 1)?;
                value.write_flat(flat_slot_mut(out, WORD_SIZE, flat_size::<T>()?)?)
            }
        }
    }

    fn read_flat(data: &[u8]) -> BlockResult<Self> {
        match read_tag(data)? {
            0 => Ok(None),
            1 => T::read_flat(flat_slot(data, WORD_SIZE, flat_size::<T>()?)?).map(Some),
            tag => Err(invalid_tag::<Self>(tag, 2)),
        }
    }
}

impl<T: Layout, E: Layout> Layout for Result<T, E> {
    const KIND: LayoutKind = LayoutKind::union(&[T::KIND, E::KIND]);
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        if let Some(size) = Self::KIND.static_size() {
            return ctx.reserve(WORD_SIZE, size);
        }
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        match self {
            Ok(value) => value.measure(ctx),
            Err(error) => error.measure(ctx),
        }
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        if Self::KIND.is_flat() {
            return save_flat(self, ctx);
        }
        match self {
            Ok(value) => save_alternative(0, value, ctx),
            Err(error) => save_alternative(1, error, ctx),
        }
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        if Self::KIND.is_flat() {
            return load_flat(ctx);
        }
        match ctx.read_word()? {
            0 => T::load(ctx).map(Ok),
            1 => E::load(ctx).map(Err),
            tag => Err(invalid_tag::<Self>(tag, 2)),
        }
    }

    fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
        match self {
            Ok(value) => {
                write_tag(out, 0)?;
                value.write_flat(flat_slot_mut(out, WORD_SIZE, flat_size::<T>()?)?)
            }
            Err(error) => {
                write_tag(out, 1)?;
                error.write_flat(flat_slot_mut(out, WORD_SIZE, flat_size::<E>()?)?)
            }
        }
    }

    fn read_flat(data: &[u8]) -> BlockResult<Self> {
        match read_tag(data)? {
            0 => T::read_flat(flat_slot(data, WORD_SIZE, flat_size::<T>()?)?).map(Ok),
            1 => E::read_flat(flat_slot(data, WORD_SIZE, flat_size::<E>()?)?).map(Err),
            tag => Err(invalid_tag::<Self>(tag, 2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::{decode_from_slice, encode_to_vec, encoded_size};

    use super::*;

    #[test]
    fn option_of_sized_payload_is_dynamic() {
        assert_eq!(<Option<u32> as Layout>::KIND, LayoutKind::Dynamic);
        assert_eq!(encoded_size(&None::<u32>), 8);
        assert_eq!(encoded_size(&Some(1u32)), 12);
    }

    #[test]
    fn option_of_unit_is_flat() {
        assert_eq!(<Option<()> as Layout>::KIND, LayoutKind::Flat { size: 8 });
        let data = encode_to_vec(&Some(())).unwrap();
        assert_eq!(data, 1u64.to_le_bytes().to_vec());
        assert_eq!(decode_from_slice::<Option<()>>(&data).unwrap(), Some(()));
    }

    #[test]
    fn option_roundtrip() {
        let value = vec![Some("x".to_string()), None];
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(decode_from_slice::<Vec<Option<String>>>(&data).unwrap(), value);
    }

    #[test]
    fn result_of_equal_sizes_is_flat() {
        assert_eq!(<Result<u32, i32> as Layout>::KIND, LayoutKind::Flat { size: 12 });
        let value: Result<u32, i32> = Err(-3);
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(&data[..8], &1u64.to_le_bytes());
        assert_eq!(decode_from_slice::<Result<u32, i32>>(&data).unwrap(), value);
    }

    #[test]
    fn result_with_dynamic_alternative() {
        let value: Result<u8, String> = Err("bad".into());
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(decode_from_slice::<Result<u8, String>>(&data).unwrap(), value);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let data = 2u64.to_le_bytes();
        match decode_from_slice::<Option<()>>(&data).unwrap_err() {
            BlockError::InvalidTag {
                tag, alternatives, ..
            } => {
                assert_eq!(tag, 2);
                assert_eq!(alternatives, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        let mut data = 5u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            decode_from_slice::<Option<u32>>(&data).unwrap_err(),
            BlockError::InvalidTag { tag: 5, .. }
        ));
    }
}
