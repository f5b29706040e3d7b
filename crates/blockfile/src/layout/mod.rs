//! Type-driven binary layout of block payloads.
//!
//! Every persistable type implements [`Layout`]: a measure/save/load triple
//! plus an explicit [`LayoutKind`] classification. The classification decides
//! how a value is sized and copied:
//!
//! - `Flat` values have a static size and no references; they are written
//!   with one window acquisition and a raw byte copy (`write_flat`).
//! - `Fixed` values have a static size but need per-field encoding (they
//!   contain block references).
//! - `Dynamic` values contain a variable-length member and always recurse.
//!
//! # Alignment
//!
//! Every value starts at a multiple of its `ALIGN`, which is
//! `min(natural alignment, WORD_SIZE)` for scalars and the largest field
//! alignment for aggregates. Measure, save and load apply the same rule, so
//! static sizes computed in `const` context match what encoding produces.

mod collections;
mod context;
mod macros;
mod primitive;
mod union;

pub use context::{LoadContext, MeasureContext, SaveContext};
pub use union::{invalid_tag, read_tag, write_tag};

use std::any::type_name;

use crate::address::{align_up, WORD_SIZE};
use crate::error::{BlockError, BlockResult};

/// Most elements a sequence of zero-sized values may hold. Such counts
/// cannot be checked against the bytes left in a block.
pub const MAX_ZERO_SIZED_ELEMENTS: usize = 1 << 20;

/// Size classification of a [`Layout`] type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    /// Static size, no references: copied as raw bytes.
    Flat { size: usize },
    /// Static size, encoded field by field.
    Fixed { size: usize },
    /// Size depends on the value.
    Dynamic,
}

impl LayoutKind {
    /// Kind of an aggregate with no fields.
    pub const EMPTY: LayoutKind = LayoutKind::Flat { size: 0 };

    pub const fn static_size(self) -> Option<usize> {
        match self {
            LayoutKind::Flat { size } | LayoutKind::Fixed { size } => Some(size),
            LayoutKind::Dynamic => None,
        }
    }

    pub const fn is_flat(self) -> bool {
        matches!(self, LayoutKind::Flat { .. })
    }

    pub const fn is_dynamic(self) -> bool {
        matches!(self, LayoutKind::Dynamic)
    }

    /// Smallest number of bytes a value of this kind can occupy. Dynamic
    /// values always carry at least one count or tag word.
    pub const fn min_size(self) -> usize {
        match self {
            LayoutKind::Flat { size } | LayoutKind::Fixed { size } => size,
            LayoutKind::Dynamic => WORD_SIZE,
        }
    }

    /// Append a field of kind `field` and alignment `align` to an aggregate.
    pub const fn then(self, field: LayoutKind, align: usize) -> LayoutKind {
        match (self, field) {
            (LayoutKind::Dynamic, _) | (_, LayoutKind::Dynamic) => LayoutKind::Dynamic,
            (LayoutKind::Flat { size }, LayoutKind::Flat { size: field_size }) => LayoutKind::Flat {
                size: align_up(size, align) + field_size,
            },
            (
                LayoutKind::Flat { size } | LayoutKind::Fixed { size },
                LayoutKind::Flat { size: field_size } | LayoutKind::Fixed { size: field_size },
            ) => LayoutKind::Fixed {
                size: align_up(size, align) + field_size,
            },
        }
    }

    /// Kind of `count` back-to-back elements of this kind. An empty array
    /// is flat whatever its element kind.
    pub const fn array(self, align: usize, count: usize) -> LayoutKind {
        if count == 0 {
            return LayoutKind::EMPTY;
        }
        match self {
            LayoutKind::Flat { size } => LayoutKind::Flat {
                size: array_size(size, align, count),
            },
            LayoutKind::Fixed { size } => LayoutKind::Fixed {
                size: array_size(size, align, count),
            },
            LayoutKind::Dynamic => LayoutKind::Dynamic,
        }
    }

    /// Kind of a tagged union over `alternatives`: static only when every
    /// alternative has the same static size.
    pub const fn union(alternatives: &[LayoutKind]) -> LayoutKind {
        let mut payload: Option<usize> = None;
        let mut flat = true;
        let mut i = 0;
        while i < alternatives.len() {
            let size = match alternatives[i] {
                LayoutKind::Flat { size } => size,
                LayoutKind::Fixed { size } => {
                    flat = false;
                    size
                }
                LayoutKind::Dynamic => return LayoutKind::Dynamic,
            };
            match payload {
                Some(existing) if existing != size => return LayoutKind::Dynamic,
                _ => payload = Some(size),
            }
            i += 1;
        }
        let size = match payload {
            Some(size) => WORD_SIZE + size,
            None => WORD_SIZE,
        };
        if flat {
            LayoutKind::Flat { size }
        } else {
            LayoutKind::Fixed { size }
        }
    }
}

/// Bytes spanned by `count` elements of `size` bytes, each aligned to `align`.
pub const fn array_size(size: usize, align: usize, count: usize) -> usize {
    if count == 0 {
        0
    } else {
        align_up(size, align) * (count - 1) + size
    }
}

/// Largest of `aligns`, or 1 when empty.
pub const fn max_align(aligns: &[usize]) -> usize {
    let mut max = 1;
    let mut i = 0;
    while i < aligns.len() {
        if aligns[i] > max {
            max = aligns[i];
        }
        i += 1;
    }
    max
}

/// Alignment of a scalar of `size` bytes: `min(size, WORD_SIZE)`, at least 1.
pub const fn scalar_align(size: usize) -> usize {
    if size == 0 {
        1
    } else if size < WORD_SIZE {
        size
    } else {
        WORD_SIZE
    }
}

/// Binary layout of a persistable type.
pub trait Layout: Sized {
    /// Size classification.
    const KIND: LayoutKind;
    /// Alignment of the value's first byte, at most `WORD_SIZE`.
    const ALIGN: usize;

    /// Advance `ctx` by the encoded size of `self`.
    fn measure(&self, ctx: &mut MeasureContext);

    /// Encode `self` at the context's cursor.
    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()>;

    /// Decode a value at the context's cursor.
    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self>;

    /// Raw copy into exactly `KIND`'s static size. Only flat types support it.
    fn write_flat(&self, _out: &mut [u8]) -> BlockResult<()> {
        Err(BlockError::NotFlat(type_name::<Self>()))
    }

    /// Inverse of [`Layout::write_flat`].
    fn read_flat(_data: &[u8]) -> BlockResult<Self> {
        Err(BlockError::NotFlat(type_name::<Self>()))
    }

    /// Measure a run of elements.
    fn measure_slice(items: &[Self], ctx: &mut MeasureContext) {
        match Self::KIND.static_size() {
            Some(size) => ctx.reserve_array(Self::ALIGN, size, items.len()),
            None => items.iter().for_each(|item| item.measure(ctx)),
        }
    }

    /// Encode a run of elements; flat elements go out in one bulk copy.
    fn save_slice(items: &[Self], ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        match Self::KIND {
            LayoutKind::Flat { size } if size > 0 && !items.is_empty() => {
                let stride = align_up(size, Self::ALIGN);
                let total = array_size(size, Self::ALIGN, items.len());
                ctx.write_with(Self::ALIGN, total, |out| {
                    for (item, chunk) in items.iter().zip(out.chunks_mut(stride)) {
                        item.write_flat(&mut chunk[..size])?;
                    }
                    Ok(())
                })
            }
            _ => items.iter().try_for_each(|item| item.save(ctx)),
        }
    }

    /// Decode `count` elements; flat elements come in one bulk copy.
    fn load_many(count: usize, ctx: &mut LoadContext<'_>) -> BlockResult<Vec<Self>> {
        match Self::KIND {
            LayoutKind::Flat { size } if size > 0 && count > 0 => {
                let stride = align_up(size, Self::ALIGN);
                let total = stride
                    .checked_mul(count - 1)
                    .and_then(|n| n.checked_add(size))
                    .ok_or_else(|| ctx.mismatch(format!("{count} elements overflow")))?;
                let data = ctx.take(Self::ALIGN, total)?;
                data.chunks(stride)
                    .map(|chunk| Self::read_flat(&chunk[..size]))
                    .collect()
            }
            _ => (0..count).map(|_| Self::load(ctx)).collect(),
        }
    }
}

/// Encode a flat value with a single window.
pub fn save_flat<T: Layout>(value: &T, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
    let size = flat_size::<T>()?;
    ctx.write_with(T::ALIGN, size, |out| value.write_flat(out))
}

/// Decode a flat value from a single window.
pub fn load_flat<T: Layout>(ctx: &mut LoadContext<'_>) -> BlockResult<T> {
    let size = flat_size::<T>()?;
    let data = ctx.take(T::ALIGN, size)?;
    T::read_flat(data)
}

/// Static size of a flat type.
pub fn flat_size<T: Layout>() -> BlockResult<usize> {
    match T::KIND {
        LayoutKind::Flat { size } => Ok(size),
        _ => Err(BlockError::NotFlat(type_name::<T>())),
    }
}

/// `size` bytes of `data` starting at `at`.
pub fn flat_slot(data: &[u8], at: usize, size: usize) -> BlockResult<&[u8]> {
    let available = data.len();
    data.get(at..at + size).ok_or_else(|| BlockError::SizeMismatch {
        offset: at as u64,
        reason: format!("flat field of {size} bytes beyond {available}-byte value"),
    })
}

/// Mutable counterpart of [`flat_slot`].
pub fn flat_slot_mut(out: &mut [u8], at: usize, size: usize) -> BlockResult<&mut [u8]> {
    let available = out.len();
    out.get_mut(at..at + size).ok_or_else(|| BlockError::SizeMismatch {
        offset: at as u64,
        reason: format!("flat field of {size} bytes beyond {available}-byte value"),
    })
}

/// Encoded size of `value`.
pub fn encoded_size<T: Layout>(value: &T) -> usize {
    let mut ctx = MeasureContext::new();
    value.measure(&mut ctx);
    ctx.size()
}

/// Encode a value into a fresh buffer.
///
/// Null and committed references encode as their address word; references
/// to uncommitted blocks are rejected, as only a commit can place them.
pub fn encode_to_vec<T: Layout>(value: &T) -> BlockResult<Vec<u8>> {
    let mut buf = vec![0u8; encoded_size(value)];
    let mut ctx = SaveContext::for_buffer(&mut buf);
    value.save(&mut ctx)?;
    ctx.finish()?;
    Ok(buf)
}

/// Decode a value that must span all of `data`.
///
/// References decode unbound: they keep their address but have no manager
/// to load through.
pub fn decode_from_slice<T: Layout>(data: &[u8]) -> BlockResult<T> {
    let mut ctx = LoadContext::new(data, 0, None);
    let value = T::load(&mut ctx)?;
    ctx.finish()?;
    Ok(value)
}
