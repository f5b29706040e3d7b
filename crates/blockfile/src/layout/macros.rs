/// Declare a record or union type together with its [`Layout`] impl.
///
/// Structs are encoded field by field in declaration order, enums as a tag
/// word (the variant's position) followed by the variant's payload. Enum
/// variants are either unit variants or carry exactly one value.
///
/// Block payloads are created with `Default`, so types stored directly in a
/// block should also derive it.
///
/// ```
/// use blockfile::{block_layout, BlockRef};
///
/// block_layout! {
///     #[derive(Debug, Default)]
///     pub struct Node {
///         pub value: u32,
///         pub next: BlockRef<Node>,
///     }
/// }
///
/// block_layout! {
///     #[derive(Debug, Default, PartialEq)]
///     pub enum Shape {
///         #[default]
///         Empty,
///         Circle(f64),
///         Label(String),
///     }
/// }
/// ```
///
/// [`Layout`]: crate::layout::Layout
#[macro_export]
macro_rules! block_layout {
    (@kind) => {
        $crate::layout::LayoutKind::EMPTY
    };
    (@kind $ty:ty) => {
        <$ty as $crate::layout::Layout>::KIND
    };

    (@pattern $name:ident, $variant:ident, $payload:ident) => {
        $name::$variant
    };
    (@pattern $name:ident, $variant:ident, $payload:ident, $ty:ty) => {
        $name::$variant($payload)
    };

    (@measure $ctx:ident, $payload:ident) => {
        ()
    };
    (@measure $ctx:ident, $payload:ident, $ty:ty) => {
        $crate::layout::Layout::measure($payload, $ctx)
    };

    (@save $ctx:ident, $payload:ident) => {
        ()
    };
    (@save $ctx:ident, $payload:ident, $ty:ty) => {
        $crate::layout::Layout::save($payload, $ctx)?
    };

    (@load $ctx:ident, $name:ident, $variant:ident) => {
        $name::$variant
    };
    (@load $ctx:ident, $name:ident, $variant:ident, $ty:ty) => {
        $name::$variant(<$ty as $crate::layout::Layout>::load($ctx)?)
    };

    (@write_flat $out:ident, $payload:ident) => {
        ()
    };
    (@write_flat $out:ident, $payload:ident, $ty:ty) => {
        $crate::layout::Layout::write_flat(
            $payload,
            $crate::layout::flat_slot_mut(
                $out,
                $crate::address::WORD_SIZE,
                $crate::layout::flat_size::<$ty>()?,
            )?,
        )?
    };

    (@read_flat $data:ident, $name:ident, $variant:ident) => {
        $name::$variant
    };
    (@read_flat $data:ident, $name:ident, $variant:ident, $ty:ty) => {
        $name::$variant(<$ty as $crate::layout::Layout>::read_flat(
            $crate::layout::flat_slot(
                $data,
                $crate::address::WORD_SIZE,
                $crate::layout::flat_size::<$ty>()?,
            )?,
        )?)
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $ty ),*
        }

        impl $crate::layout::Layout for $name {
            const KIND: $crate::layout::LayoutKind = $crate::layout::LayoutKind::EMPTY
                $( .then(<$ty as $crate::layout::Layout>::KIND, <$ty as $crate::layout::Layout>::ALIGN) )*;
            const ALIGN: usize =
                $crate::layout::max_align(&[ $( <$ty as $crate::layout::Layout>::ALIGN ),* ]);

            fn measure(&self, ctx: &mut $crate::layout::MeasureContext) {
                match <Self as $crate::layout::Layout>::KIND.static_size() {
                    Some(size) => ctx.reserve(<Self as $crate::layout::Layout>::ALIGN, size),
                    None => {
                        ctx.align_to(<Self as $crate::layout::Layout>::ALIGN);
                        $( $crate::layout::Layout::measure(&self.$field, ctx); )*
                    }
                }
            }

            fn save(&self, ctx: &mut $crate::layout::SaveContext<'_>) -> $crate::BlockResult<()> {
                if <Self as $crate::layout::Layout>::KIND.is_flat() {
                    return $crate::layout::save_flat(self, ctx);
                }
                ctx.align_to(<Self as $crate::layout::Layout>::ALIGN)?;
                $( $crate::layout::Layout::save(&self.$field, ctx)?; )*
                Ok(())
            }

            fn load(ctx: &mut $crate::layout::LoadContext<'_>) -> $crate::BlockResult<Self> {
                if <Self as $crate::layout::Layout>::KIND.is_flat() {
                    return $crate::layout::load_flat(ctx);
                }
                ctx.align_to(<Self as $crate::layout::Layout>::ALIGN)?;
                Ok(Self {
                    $( $field: <$ty as $crate::layout::Layout>::load(ctx)?, )*
                })
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn write_flat(&self, out: &mut [u8]) -> $crate::BlockResult<()> {
                let mut at = 0usize;
                $(
                    at = $crate::address::align_up(at, <$ty as $crate::layout::Layout>::ALIGN);
                    let size = $crate::layout::flat_size::<$ty>()?;
                    $crate::layout::Layout::write_flat(
                        &self.$field,
                        $crate::layout::flat_slot_mut(out, at, size)?,
                    )?;
                    at += size;
                )*
                Ok(())
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn read_flat(data: &[u8]) -> $crate::BlockResult<Self> {
                let mut at = 0usize;
                Ok(Self {
                    $( $field: {
                        at = $crate::address::align_up(at, <$ty as $crate::layout::Layout>::ALIGN);
                        let size = $crate::layout::flat_size::<$ty>()?;
                        let value = <$ty as $crate::layout::Layout>::read_flat(
                            $crate::layout::flat_slot(data, at, size)?,
                        )?;
                        at += size;
                        value
                    }, )*
                })
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident $( ( $ty:ty ) )? ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $(#[$vmeta])* $variant $( ($ty) )? ),*
        }

        impl $crate::layout::Layout for $name {
            const KIND: $crate::layout::LayoutKind = $crate::layout::LayoutKind::union(&[
                $( $crate::block_layout!(@kind $($ty)?) ),*
            ]);
            const ALIGN: usize = $crate::address::WORD_SIZE;

            #[allow(irrefutable_let_patterns, unreachable_code)]
            fn measure(&self, ctx: &mut $crate::layout::MeasureContext) {
                if let Some(size) = <Self as $crate::layout::Layout>::KIND.static_size() {
                    return ctx.reserve($crate::address::WORD_SIZE, size);
                }
                ctx.reserve($crate::address::WORD_SIZE, $crate::address::WORD_SIZE);
                $(
                    if let $crate::block_layout!(@pattern $name, $variant, payload $(, $ty)?) = self {
                        $crate::block_layout!(@measure ctx, payload $(, $ty)?);
                        return;
                    }
                )*
            }

            #[allow(irrefutable_let_patterns, unreachable_code, unused_mut, unused_assignments)]
            fn save(&self, ctx: &mut $crate::layout::SaveContext<'_>) -> $crate::BlockResult<()> {
                if <Self as $crate::layout::Layout>::KIND.is_flat() {
                    return $crate::layout::save_flat(self, ctx);
                }
                let mut tag: u64 = 0;
                $(
                    if let $crate::block_layout!(@pattern $name, $variant, payload $(, $ty)?) = self {
                        ctx.write_word(tag)?;
                        $crate::block_layout!(@save ctx, payload $(, $ty)?);
                        return Ok(());
                    }
                    tag += 1;
                )*
                Err($crate::layout::invalid_tag::<Self>(tag, tag))
            }

            #[allow(unused_mut, unused_assignments)]
            fn load(ctx: &mut $crate::layout::LoadContext<'_>) -> $crate::BlockResult<Self> {
                if <Self as $crate::layout::Layout>::KIND.is_flat() {
                    return $crate::layout::load_flat(ctx);
                }
                let tag = ctx.read_word()?;
                let mut index: u64 = 0;
                $(
                    if tag == index {
                        return Ok($crate::block_layout!(@load ctx, $name, $variant $(, $ty)?));
                    }
                    index += 1;
                )*
                Err($crate::layout::invalid_tag::<Self>(tag, index))
            }

            #[allow(irrefutable_let_patterns, unreachable_code, unused_mut, unused_assignments)]
            fn write_flat(&self, out: &mut [u8]) -> $crate::BlockResult<()> {
                let mut tag: u64 = 0;
                $(
                    if let $crate::block_layout!(@pattern $name, $variant, payload $(, $ty)?) = self {
                        $crate::layout::write_tag(out, tag)?;
                        $crate::block_layout!(@write_flat out, payload $(, $ty)?);
                        return Ok(());
                    }
                    tag += 1;
                )*
                Err($crate::layout::invalid_tag::<Self>(tag, tag))
            }

            #[allow(unused_mut, unused_assignments)]
            fn read_flat(data: &[u8]) -> $crate::BlockResult<Self> {
                let tag = $crate::layout::read_tag(data)?;
                let mut index: u64 = 0;
                $(
                    if tag == index {
                        return Ok($crate::block_layout!(@read_flat data, $name, $variant $(, $ty)?));
                    }
                    index += 1;
                )*
                Err($crate::layout::invalid_tag::<Self>(tag, index))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::error::BlockError;
    use crate::layout::{decode_from_slice, encode_to_vec, encoded_size, Layout, LayoutKind};

    crate::block_layout! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }
    }

    crate::block_layout! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Padded {
            tag: u8,
            weight: f64,
            flags: u16,
        }
    }

    crate::block_layout! {
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct Record {
            pub name: String,
            pub origin: Point,
            pub samples: Vec<Padded>,
        }
    }

    crate::block_layout! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Empty {}
    }

    crate::block_layout! {
        #[derive(Debug, Default, Clone, PartialEq)]
        enum Shape {
            #[default]
            Nothing,
            Dot(Point),
            Named(String),
        }
    }

    crate::block_layout! {
        #[derive(Debug, Default, Clone, Copy, PartialEq)]
        enum Cell {
            #[default]
            Zero,
            Int(i64),
            Float(f64),
        }
    }

    #[test]
    fn flat_struct_kind() {
        assert_eq!(<Point as Layout>::KIND, LayoutKind::Flat { size: 8 });
        assert_eq!(<Point as Layout>::ALIGN, 4);
        // u8, pad to 8, f64, u16
        assert_eq!(<Padded as Layout>::KIND, LayoutKind::Flat { size: 18 });
        assert_eq!(<Padded as Layout>::ALIGN, 8);
        assert_eq!(<Empty as Layout>::KIND, LayoutKind::Flat { size: 0 });
        assert_eq!(<Record as Layout>::KIND, LayoutKind::Dynamic);
    }

    #[test]
    fn flat_struct_bytes() {
        let padded = Padded {
            tag: 9,
            weight: 0.5,
            flags: 0x0102,
        };
        let data = encode_to_vec(&padded).unwrap();
        assert_eq!(data.len(), 18);
        assert_eq!(data[0], 9);
        assert_eq!(&data[1..8], &[0u8; 7]);
        assert_eq!(&data[8..16], &0.5f64.to_le_bytes());
        assert_eq!(&data[16..], &[2, 1]);
        assert_eq!(decode_from_slice::<Padded>(&data).unwrap(), padded);
    }

    #[test]
    fn dynamic_struct_roundtrip() {
        let record = Record {
            name: "sensor".into(),
            origin: Point { x: -1, y: 2 },
            samples: vec![
                Padded {
                    tag: 1,
                    weight: 1.0,
                    flags: 3,
                },
                Padded::default(),
            ],
        };
        let data = encode_to_vec(&record).unwrap();
        assert_eq!(data.len(), encoded_size(&record));
        assert_eq!(decode_from_slice::<Record>(&data).unwrap(), record);
    }

    #[test]
    fn enum_kinds() {
        assert_eq!(<Shape as Layout>::KIND, LayoutKind::Dynamic);
        assert_eq!(<Cell as Layout>::KIND, LayoutKind::Dynamic);
    }

    #[test]
    fn enum_tags_follow_declaration_order() {
        let data = encode_to_vec(&Shape::Named("n".into())).unwrap();
        assert_eq!(&data[..8], &2u64.to_le_bytes());
        assert_eq!(decode_from_slice::<Shape>(&data).unwrap(), Shape::Named("n".into()));

        let data = encode_to_vec(&Shape::Nothing).unwrap();
        assert_eq!(data, 0u64.to_le_bytes().to_vec());

        let dot = Shape::Dot(Point { x: 3, y: 4 });
        let data = encode_to_vec(&dot).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(decode_from_slice::<Shape>(&data).unwrap(), dot);
    }

    #[test]
    fn enum_unknown_tag() {
        let data = 7u64.to_le_bytes();
        match decode_from_slice::<Shape>(&data).unwrap_err() {
            BlockError::InvalidTag {
                tag, alternatives, ..
            } => {
                assert_eq!(tag, 7);
                assert_eq!(alternatives, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    crate::block_layout! {
        #[derive(Debug, Clone, Copy, PartialEq)]
        enum Pair {
            Left(u32),
            Right(f32),
        }
    }

    #[test]
    fn equal_sized_enum_is_flat() {
        assert_eq!(<Pair as Layout>::KIND, LayoutKind::Flat { size: 12 });
        let items = vec![Pair::Left(1), Pair::Right(2.5), Pair::Left(3)];
        let data = encode_to_vec(&items).unwrap();
        // count word + stride 16 * 2 + 12
        assert_eq!(data.len(), 8 + 16 * 2 + 12);
        assert_eq!(decode_from_slice::<Vec<Pair>>(&data).unwrap(), items);
    }

    #[test]
    fn nested_flat_struct_in_array() {
        let grid = [Point { x: 1, y: 2 }, Point { x: 3, y: 4 }];
        let data = encode_to_vec(&grid).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(decode_from_slice::<[Point; 2]>(&data).unwrap(), grid);
        let cell = Cell::Float(1.0);
        assert_eq!(decode_from_slice::<Cell>(&encode_to_vec(&cell).unwrap()).unwrap(), cell);
    }
}
