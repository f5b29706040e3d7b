//! Variable-length sequences, fixed arrays and tuples.
//!
//! Sequences are a count word followed by their elements:
//!
//! ```text
//! [8 bytes: element count][element 0][pad][element 1]...
//! ```

use std::any::type_name;
use std::collections::{LinkedList, VecDeque};

use crate::address::{align_up, WORD_SIZE};
use crate::error::{BlockError, BlockResult};

use super::{
    flat_size, flat_slot, flat_slot_mut, load_flat, max_align, save_flat, Layout, LayoutKind,
    LoadContext, MeasureContext, SaveContext,
};

impl Layout for String {
    const KIND: LayoutKind = LayoutKind::Dynamic;
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        ctx.reserve(1, self.len());
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        ctx.write_word(self.len() as u64)?;
        ctx.write_bytes(1, self.as_bytes())
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        let len = ctx.read_count::<u8>()?;
        let bytes = ctx.take(1, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| BlockError::InvalidEncoding {
            type_name: type_name::<String>(),
            reason: e.to_string(),
        })
    }
}

impl<T: Layout> Layout for Vec<T> {
    const KIND: LayoutKind = LayoutKind::Dynamic;
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        T::measure_slice(self, ctx);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        ctx.write_count::<T>(self.len())?;
        T::save_slice(self, ctx)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        let count = ctx.read_count::<T>()?;
        T::load_many(count, ctx)
    }
}

impl<T: Layout> Layout for VecDeque<T> {
    const KIND: LayoutKind = LayoutKind::Dynamic;
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        let (front, back) = self.as_slices();
        T::measure_slice(front, ctx);
        T::measure_slice(back, ctx);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        ctx.write_count::<T>(self.len())?;
        let (front, back) = self.as_slices();
        T::save_slice(front, ctx)?;
        T::save_slice(back, ctx)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        let count = ctx.read_count::<T>()?;
        T::load_many(count, ctx).map(VecDeque::from)
    }
}

impl<T: Layout> Layout for LinkedList<T> {
    const KIND: LayoutKind = LayoutKind::Dynamic;
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(WORD_SIZE, WORD_SIZE);
        self.iter().for_each(|item| item.measure(ctx));
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        ctx.write_count::<T>(self.len())?;
        self.iter().try_for_each(|item| item.save(ctx))
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        let count = ctx.read_count::<T>()?;
        (0..count).map(|_| T::load(ctx)).collect()
    }
}

impl<T: Layout, const N: usize> Layout for [T; N] {
    const KIND: LayoutKind = T::KIND.array(T::ALIGN, N);
    const ALIGN: usize = T::ALIGN;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.align_to(Self::ALIGN);
        T::measure_slice(self, ctx);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        ctx.align_to(Self::ALIGN)?;
        T::save_slice(self, ctx)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        ctx.align_to(Self::ALIGN)?;
        let items = T::load_many(N, ctx)?;
        items
            .try_into()
            .map_err(|items: Vec<T>| ctx.mismatch(format!("expected {N} elements, got {}", items.len())))
    }

    fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
        if N == 0 {
            return Ok(());
        }
        let size = flat_size::<T>()?;
        let stride = align_up(size, T::ALIGN);
        for (i, item) in self.iter().enumerate() {
            item.write_flat(flat_slot_mut(out, i * stride, size)?)?;
        }
        Ok(())
    }

    fn read_flat(data: &[u8]) -> BlockResult<Self> {
        if N == 0 {
            return Vec::new().try_into().map_err(|_: Vec<T>| BlockError::SizeMismatch {
                offset: 0,
                reason: "expected an empty array".into(),
            });
        }
        let size = flat_size::<T>()?;
        let stride = align_up(size, T::ALIGN);
        let items = (0..N)
            .map(|i| T::read_flat(flat_slot(data, i * stride, size)?))
            .collect::<BlockResult<Vec<T>>>()?;
        items.try_into().map_err(|_| BlockError::SizeMismatch {
            offset: 0,
            reason: format!("expected {N} elements"),
        })
    }
}

macro_rules! tuple_layout {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Layout),+> Layout for ($($name,)+) {
            const KIND: LayoutKind = LayoutKind::EMPTY
                $(.then($name::KIND, $name::ALIGN))+;
            const ALIGN: usize = max_align(&[$($name::ALIGN),+]);

            fn measure(&self, ctx: &mut MeasureContext) {
                match Self::KIND.static_size() {
                    Some(size) => ctx.reserve(Self::ALIGN, size),
                    None => {
                        ctx.align_to(Self::ALIGN);
                        $(self.$idx.measure(ctx);)+
                    }
                }
            }

            fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
                if Self::KIND.is_flat() {
                    return save_flat(self, ctx);
                }
                ctx.align_to(Self::ALIGN)?;
                $(self.$idx.save(ctx)?;)+
                Ok(())
            }

            fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
                if Self::KIND.is_flat() {
                    return load_flat(ctx);
                }
                ctx.align_to(Self::ALIGN)?;
                Ok(($($name::load(ctx)?,)+))
            }

            #[allow(unused_assignments)]
            fn write_flat(&self, out: &mut [u8]) -> BlockResult<()> {
                let mut at = 0usize;
                $(
                    at = align_up(at, $name::ALIGN);
                    let size = flat_size::<$name>()?;
                    self.$idx.write_flat(flat_slot_mut(out, at, size)?)?;
                    at += size;
                )+
                Ok(())
            }

            #[allow(unused_assignments)]
            fn read_flat(data: &[u8]) -> BlockResult<Self> {
                let mut at = 0usize;
                Ok(($({
                    at = align_up(at, $name::ALIGN);
                    let size = flat_size::<$name>()?;
                    let value = $name::read_flat(flat_slot(data, at, size)?)?;
                    at += size;
                    value
                },)+))
            }
        }
    };
}

tuple_layout!(A: 0);
tuple_layout!(A: 0, B: 1);
tuple_layout!(A: 0, B: 1, C: 2);
tuple_layout!(A: 0, B: 1, C: 2, D: 3);
tuple_layout!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_layout!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::layout::{decode_from_slice, encode_to_vec, encoded_size};

    use super::*;

    #[test]
    fn string_layout() {
        let data = encode_to_vec(&"hi".to_string()).unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(&data[..8], &2u64.to_le_bytes());
        assert_eq!(&data[8..], b"hi");
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut data = 2u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        let err = decode_from_slice::<String>(&data).unwrap_err();
        assert!(matches!(err, BlockError::InvalidEncoding { .. }));
    }

    #[test]
    fn vec_of_flat_elements_is_packed() {
        let items: Vec<u16> = vec![1, 2, 3];
        let data = encode_to_vec(&items).unwrap();
        assert_eq!(data.len(), 8 + 6);
        assert_eq!(&data[8..], &[1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn vec_pads_elements_to_their_alignment() {
        let items: Vec<(u64, u8)> = vec![(1, 2), (3, 4)];
        // (u64, u8) spans 9 bytes with 8-byte alignment: stride 16.
        assert_eq!(encoded_size(&items), 8 + 16 + 9);
        let data = encode_to_vec(&items).unwrap();
        assert_eq!(decode_from_slice::<Vec<(u64, u8)>>(&data).unwrap(), items);
    }

    #[test]
    fn count_beyond_block_is_rejected() {
        let mut data = 1000u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);
        let err = decode_from_slice::<Vec<u32>>(&data).unwrap_err();
        assert!(matches!(err, BlockError::SizeMismatch { .. }));
    }

    #[test]
    fn nested_dynamic_sequences() {
        let value = vec![vec!["a".to_string()], vec![], vec!["bc".into(), "".into()]];
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(decode_from_slice::<Vec<Vec<String>>>(&data).unwrap(), value);
    }

    #[test]
    fn deque_matches_vec_encoding() {
        let mut deque = VecDeque::new();
        deque.push_back(2u32);
        deque.push_back(3);
        deque.push_front(1);
        let from_deque = encode_to_vec(&deque).unwrap();
        assert_eq!(from_deque, encode_to_vec(&vec![1u32, 2, 3]).unwrap());
        assert_eq!(decode_from_slice::<VecDeque<u32>>(&from_deque).unwrap(), deque);
    }

    #[test]
    fn linked_list_matches_vec_encoding() {
        let list: LinkedList<i64> = [5, -6, 7].into_iter().collect();
        let data = encode_to_vec(&list).unwrap();
        assert_eq!(data, encode_to_vec(&vec![5i64, -6, 7]).unwrap());
        assert_eq!(decode_from_slice::<LinkedList<i64>>(&data).unwrap(), list);
    }

    #[test]
    fn arrays_have_static_kind() {
        assert_eq!(<[u32; 3] as Layout>::KIND, LayoutKind::Flat { size: 12 });
        assert_eq!(<[String; 2] as Layout>::KIND, LayoutKind::Dynamic);
        let value = [[1u8, 2], [3, 4]];
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert_eq!(decode_from_slice::<[[u8; 2]; 2]>(&data).unwrap(), value);
    }

    #[test]
    fn empty_array_consumes_nothing() {
        let value: [u64; 0] = [];
        assert!(encode_to_vec(&value).unwrap().is_empty());
    }

    #[test]
    fn empty_arrays_are_flat_for_any_element() {
        assert_eq!(<[String; 0] as Layout>::KIND, LayoutKind::Flat { size: 0 });
        let value: Vec<[String; 0]> = vec![[], [], []];
        let data = encode_to_vec(&value).unwrap();
        assert_eq!(data, 3u64.to_le_bytes().to_vec());
        assert_eq!(decode_from_slice::<Vec<[String; 0]>>(&data).unwrap().len(), 3);

        let pair: (u8, [String; 0]) = (4, []);
        let data = encode_to_vec(&pair).unwrap();
        assert_eq!(decode_from_slice::<(u8, [String; 0])>(&data).unwrap().0, 4);
    }

    #[test]
    fn oversized_zero_sized_sequence_is_rejected() {
        let data = u64::MAX.to_le_bytes();
        assert!(matches!(
            decode_from_slice::<Vec<()>>(&data).unwrap_err(),
            BlockError::SizeMismatch { .. }
        ));
        let units = vec![(); 5];
        let data = encode_to_vec(&units).unwrap();
        assert_eq!(decode_from_slice::<Vec<()>>(&data).unwrap(), units);
    }

    #[test]
    fn tuple_kinds() {
        assert_eq!(<(u8, u32) as Layout>::KIND, LayoutKind::Flat { size: 8 });
        assert_eq!(<(u8, u32) as Layout>::ALIGN, 4);
        assert_eq!(<(u8, String) as Layout>::KIND, LayoutKind::Dynamic);
    }

    #[test]
    fn tuple_with_dynamic_member() {
        let value = (7u8, "seven".to_string(), 7.0f32);
        let data = encode_to_vec(&value).unwrap();
        // u8, pad to 8, count word, 5 bytes, pad to 4, f32.
        assert_eq!(data.len(), 8 + 8 + 5 + 3 + 4);
        assert_eq!(decode_from_slice::<(u8, String, f32)>(&data).unwrap(), value);
    }

    proptest! {
        #[test]
        fn sequences_roundtrip(
            words in proptest::collection::vec(any::<u64>(), 0..32),
            names in proptest::collection::vec(".{0,12}", 0..8),
            pairs in proptest::collection::vec((any::<u8>(), any::<i32>()), 0..16),
        ) {
            let value = (words, names, pairs);
            let data = encode_to_vec(&value).unwrap();
            prop_assert_eq!(data.len(), encoded_size(&value));
            let decoded: (Vec<u64>, Vec<String>, Vec<(u8, i32)>) = decode_from_slice(&data).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
