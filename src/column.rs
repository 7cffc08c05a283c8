//! Columnar storage: two interchangeable backings for one component type within one archetype
//! (spec 4.2, 4.3).
//!
//! Grounded on the dual-backend contract in spec 4.2/4.3 and on spec 9's "duck-typed column
//! interface -> trait with two concrete implementors" re-architecture hint. The write mask uses
//! `bit_set::BitSet` and epochs a plain `Vec<u32>` (both teacher dependencies/patterns).
use std::any::Any;
use std::fmt::Debug;

use bit_set::BitSet;
use fxhash::FxHashMap;

use crate::registry::{ScalarKind, Schema};
use crate::value::{ComponentValues, DynComponent, Scalar};

/// Operations shared by both column backings (spec 4.2). Object-safe so an `Archetype` can hold
/// `Box<dyn Column>` per component type regardless of backing.
pub trait Column: Send + Sync + Debug {
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows backing storage so `capacity() >= n`, doubling (never shrinking) as needed.
    fn ensure_capacity(&mut self, n: usize);

    /// Appends one default-valued row, growing if necessary. Returns the new row index.
    fn push_default(&mut self) -> usize;

    /// Removes `row` by swapping the last row into its place (O(1)); panics if `row >= len()`.
    fn swap_remove(&mut self, row: usize);

    fn write_from_object(&mut self, row: usize, values: &ComponentValues, epoch: u32);
    fn read_to_object(&self, row: usize, out: &mut ComponentValues);

    fn mark_written_range(&mut self, start: usize, end: usize, epoch: u32);

    /// Returns, in increasing order, every row written since the last drain, then clears the
    /// record.
    fn drain_written_rows(&mut self) -> Vec<usize>;

    /// True if `row` has been marked written since the last drain (without consuming the record).
    fn is_row_written(&self, row: usize) -> bool;

    /// A fresh, empty column with the same field layout, pre-sized to `cap_hint`.
    fn spawn_like(&self, cap_hint: usize) -> Box<dyn Column>;

    /// Copies rows `[0, count)` from `self` into `dst`, growing `dst` as needed. Implementations
    /// should special-case a same-backing, same-layout `dst` for a contiguous buffer copy.
    fn copy_range_to(&self, dst: &mut dyn Column, count: usize) {
        let mut tmp = ComponentValues::new();
        dst.ensure_capacity(count);
        for row in 0..count {
            self.read_to_object(row, &mut tmp);
            dst.write_from_object(row, &tmp, 0);
        }
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Copies the value at `row` into `dst_row` of `dst` (which may be a different archetype's
    /// column of the same component type). Used by archetype migration (spec 4.6) to carry
    /// forward components unaffected by the add/remove, one arbitrary row at a time rather than
    /// the `copy_range_to` bulk `[0, count)` path.
    fn clone_row_into(&self, row: usize, dst: &mut dyn Column, dst_row: usize, epoch: u32) {
        let mut tmp = ComponentValues::new();
        self.read_to_object(row, &mut tmp);
        dst.write_from_object(dst_row, &tmp, epoch);
    }
}

// ---------------------------------------------------------------------------------------------
// Typed shared-memory column
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum FieldBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    Bool(Vec<u8>),
}

macro_rules! field_buffer_dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            FieldBuffer::F32($v) => $body,
            FieldBuffer::F64($v) => $body,
            FieldBuffer::I8($v) => $body,
            FieldBuffer::I16($v) => $body,
            FieldBuffer::I32($v) => $body,
            FieldBuffer::U8($v) => $body,
            FieldBuffer::U16($v) => $body,
            FieldBuffer::U32($v) => $body,
            FieldBuffer::Bool($v) => $body,
        }
    };
}

impl FieldBuffer {
    fn new(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::F32 => FieldBuffer::F32(Vec::new()),
            ScalarKind::F64 => FieldBuffer::F64(Vec::new()),
            ScalarKind::I8 => FieldBuffer::I8(Vec::new()),
            ScalarKind::I16 => FieldBuffer::I16(Vec::new()),
            ScalarKind::I32 => FieldBuffer::I32(Vec::new()),
            ScalarKind::U8 => FieldBuffer::U8(Vec::new()),
            ScalarKind::U16 => FieldBuffer::U16(Vec::new()),
            ScalarKind::U32 => FieldBuffer::U32(Vec::new()),
            ScalarKind::Bool => FieldBuffer::Bool(Vec::new()),
        }
    }

    fn kind(&self) -> ScalarKind {
        match self {
            FieldBuffer::F32(_) => ScalarKind::F32,
            FieldBuffer::F64(_) => ScalarKind::F64,
            FieldBuffer::I8(_) => ScalarKind::I8,
            FieldBuffer::I16(_) => ScalarKind::I16,
            FieldBuffer::I32(_) => ScalarKind::I32,
            FieldBuffer::U8(_) => ScalarKind::U8,
            FieldBuffer::U16(_) => ScalarKind::U16,
            FieldBuffer::U32(_) => ScalarKind::U32,
            FieldBuffer::Bool(_) => ScalarKind::Bool,
        }
    }

    fn resize(&mut self, new_len: usize) {
        match self {
            FieldBuffer::F32(v) => v.resize(new_len, 0.0),
            FieldBuffer::F64(v) => v.resize(new_len, 0.0),
            FieldBuffer::I8(v) => v.resize(new_len, 0),
            FieldBuffer::I16(v) => v.resize(new_len, 0),
            FieldBuffer::I32(v) => v.resize(new_len, 0),
            FieldBuffer::U8(v) => v.resize(new_len, 0),
            FieldBuffer::U16(v) => v.resize(new_len, 0),
            FieldBuffer::U32(v) => v.resize(new_len, 0),
            FieldBuffer::Bool(v) => v.resize(new_len, 0),
        }
    }

    fn get(&self, row: usize) -> Scalar {
        match self {
            FieldBuffer::F32(v) => Scalar::F32(v[row]),
            FieldBuffer::F64(v) => Scalar::F64(v[row]),
            FieldBuffer::I8(v) => Scalar::I8(v[row]),
            FieldBuffer::I16(v) => Scalar::I16(v[row]),
            FieldBuffer::I32(v) => Scalar::I32(v[row]),
            FieldBuffer::U8(v) => Scalar::U8(v[row]),
            FieldBuffer::U16(v) => Scalar::U16(v[row]),
            FieldBuffer::U32(v) => Scalar::U32(v[row]),
            FieldBuffer::Bool(v) => Scalar::Bool(v[row] != 0),
        }
    }

    fn set(&mut self, row: usize, value: Scalar) {
        let coerced = Scalar::coerce(self.kind(), value.as_f64());
        match (self, coerced) {
            (FieldBuffer::F32(v), Scalar::F32(x)) => v[row] = x,
            (FieldBuffer::F64(v), Scalar::F64(x)) => v[row] = x,
            (FieldBuffer::I8(v), Scalar::I8(x)) => v[row] = x,
            (FieldBuffer::I16(v), Scalar::I16(x)) => v[row] = x,
            (FieldBuffer::I32(v), Scalar::I32(x)) => v[row] = x,
            (FieldBuffer::U8(v), Scalar::U8(x)) => v[row] = x,
            (FieldBuffer::U16(v), Scalar::U16(x)) => v[row] = x,
            (FieldBuffer::U32(v), Scalar::U32(x)) => v[row] = x,
            (FieldBuffer::Bool(v), Scalar::Bool(x)) => v[row] = if x { 1 } else { 0 },
            _ => unreachable!("Scalar::coerce always returns the target field's own kind"),
        }
    }

    fn len(&self) -> usize {
        field_buffer_dispatch!(self, v => v.len())
    }

    fn swap_remove_slot(&mut self, row: usize, last: usize) {
        if row == last {
            return;
        }
        let moved = self.get(last);
        self.set(row, moved);
    }
}

/// Typed shared-memory column: one contiguous numeric buffer per schema field plus a per-row
/// write mask (spec 4.2).
#[derive(Debug, Clone)]
pub struct TypedColumn {
    schema: Schema,
    fields: Vec<FieldBuffer>,
    len: usize,
    write_mask: BitSet,
}

impl TypedColumn {
    pub fn new(schema: Schema) -> Self {
        let fields = schema.fields().iter().map(|(_, k)| FieldBuffer::new(*k)).collect();
        TypedColumn { schema, fields, len: 0, write_mask: BitSet::new() }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Builds a zero-copy descriptor for the row range `[start, end)` of every field, suitable for
    /// handing to a worker without copying (spec 4.2's "zero-copy slice descriptor").
    pub fn slice_descriptor(&self, start: usize, end: usize) -> ChunkSliceDescriptor {
        assert!(end <= self.len, "slice range exceeds column length");
        let fields = self
            .schema
            .fields()
            .iter()
            .map(|(name, kind)| FieldSliceDescriptor {
                name: name.clone(),
                kind: *kind,
                byte_offset: start * kind.element_bytes(),
                length: end - start,
            })
            .collect();
        ChunkSliceDescriptor { base_row: start, fields, write_mask_len: (self.capacity() + 7) / 8 }
    }

    /// Mutable disjoint field-slice access for a row range, used by the chunk dispatcher's
    /// shared-memory path (spec 9's safe zero-copy substitute — see DESIGN.md).
    pub fn field_slice_mut(&mut self, field_index: usize, start: usize, end: usize) -> FieldSliceMut<'_> {
        assert!(end <= self.len);
        match &mut self.fields[field_index] {
            FieldBuffer::F32(v) => FieldSliceMut::F32(&mut v[start..end]),
            FieldBuffer::F64(v) => FieldSliceMut::F64(&mut v[start..end]),
            FieldBuffer::I8(v) => FieldSliceMut::I8(&mut v[start..end]),
            FieldBuffer::I16(v) => FieldSliceMut::I16(&mut v[start..end]),
            FieldBuffer::I32(v) => FieldSliceMut::I32(&mut v[start..end]),
            FieldBuffer::U8(v) => FieldSliceMut::U8(&mut v[start..end]),
            FieldBuffer::U16(v) => FieldSliceMut::U16(&mut v[start..end]),
            FieldBuffer::U32(v) => FieldSliceMut::U32(&mut v[start..end]),
            FieldBuffer::Bool(v) => FieldSliceMut::Bool(&mut v[start..end]),
        }
    }

    pub fn field_slice(&self, field_index: usize, start: usize, end: usize) -> FieldSlice<'_> {
        assert!(end <= self.len);
        match &self.fields[field_index] {
            FieldBuffer::F32(v) => FieldSlice::F32(&v[start..end]),
            FieldBuffer::F64(v) => FieldSlice::F64(&v[start..end]),
            FieldBuffer::I8(v) => FieldSlice::I8(&v[start..end]),
            FieldBuffer::I16(v) => FieldSlice::I16(&v[start..end]),
            FieldBuffer::I32(v) => FieldSlice::I32(&v[start..end]),
            FieldBuffer::U8(v) => FieldSlice::U8(&v[start..end]),
            FieldBuffer::U16(v) => FieldSlice::U16(&v[start..end]),
            FieldBuffer::U32(v) => FieldSlice::U32(&v[start..end]),
            FieldBuffer::Bool(v) => FieldSlice::Bool(&v[start..end]),
        }
    }

    /// Splits every schema field's live rows `[0, len)` into `chunk_size`-row mutable slices, in
    /// one pass over `self.fields` (`Vec::iter_mut`'s disjoint per-element borrows), and regroups
    /// them by chunk index into one `name -> slice` map per chunk — the safe substitute for
    /// handing N chunk-parallel workers their own non-overlapping writable view of a whole
    /// component without `unsafe` pointer splitting. A single `field_chunks_mut`-per-field call
    /// per field would tie each call's borrow to an exclusive `&mut self`, which the borrow
    /// checker would refuse to let coexist across fields; doing every field in one loop iteration
    /// over `iter_mut()` sidesteps that.
    pub fn schema_field_chunks_mut(&mut self, chunk_size: usize) -> Vec<FxHashMap<String, FieldSliceMut<'_>>> {
        let len = self.len;
        let chunk_size = chunk_size.max(1);
        let n_chunks = if len == 0 { 0 } else { (len + chunk_size - 1) / chunk_size };
        let mut per_chunk: Vec<FxHashMap<String, FieldSliceMut<'_>>> =
            (0..n_chunks).map(|_| FxHashMap::default()).collect();
        let names: Vec<&str> = self.schema.fields().iter().map(|(n, _)| n.as_str()).collect();
        for (field_idx, field) in self.fields.iter_mut().enumerate() {
            let name = names[field_idx];
            macro_rules! distribute {
                ($v:expr, $variant:path) => {
                    for (chunk_idx, s) in $v[..len].chunks_mut(chunk_size).enumerate() {
                        per_chunk[chunk_idx].insert(name.to_string(), $variant(s));
                    }
                };
            }
            match field {
                FieldBuffer::F32(v) => distribute!(v, FieldSliceMut::F32),
                FieldBuffer::F64(v) => distribute!(v, FieldSliceMut::F64),
                FieldBuffer::I8(v) => distribute!(v, FieldSliceMut::I8),
                FieldBuffer::I16(v) => distribute!(v, FieldSliceMut::I16),
                FieldBuffer::I32(v) => distribute!(v, FieldSliceMut::I32),
                FieldBuffer::U8(v) => distribute!(v, FieldSliceMut::U8),
                FieldBuffer::U16(v) => distribute!(v, FieldSliceMut::U16),
                FieldBuffer::U32(v) => distribute!(v, FieldSliceMut::U32),
                FieldBuffer::Bool(v) => distribute!(v, FieldSliceMut::Bool),
            }
        }
        per_chunk
    }

    /// Read-only counterpart to `schema_field_chunks_mut`, for a kernel's read-only components.
    pub fn schema_field_chunks(&self, chunk_size: usize) -> Vec<FxHashMap<String, FieldSlice<'_>>> {
        let len = self.len;
        let chunk_size = chunk_size.max(1);
        let n_chunks = if len == 0 { 0 } else { (len + chunk_size - 1) / chunk_size };
        let mut per_chunk: Vec<FxHashMap<String, FieldSlice<'_>>> =
            (0..n_chunks).map(|_| FxHashMap::default()).collect();
        for (field_idx, (name, _)) in self.schema.fields().iter().enumerate() {
            macro_rules! distribute {
                ($v:expr, $variant:path) => {
                    for (chunk_idx, s) in $v[..len].chunks(chunk_size).enumerate() {
                        per_chunk[chunk_idx].insert(name.clone(), $variant(s));
                    }
                };
            }
            match &self.fields[field_idx] {
                FieldBuffer::F32(v) => distribute!(v, FieldSlice::F32),
                FieldBuffer::F64(v) => distribute!(v, FieldSlice::F64),
                FieldBuffer::I8(v) => distribute!(v, FieldSlice::I8),
                FieldBuffer::I16(v) => distribute!(v, FieldSlice::I16),
                FieldBuffer::I32(v) => distribute!(v, FieldSlice::I32),
                FieldBuffer::U8(v) => distribute!(v, FieldSlice::U8),
                FieldBuffer::U16(v) => distribute!(v, FieldSlice::U16),
                FieldBuffer::U32(v) => distribute!(v, FieldSlice::U32),
                FieldBuffer::Bool(v) => distribute!(v, FieldSlice::Bool),
            }
        }
        per_chunk
    }

    /// A readable-writable row view; writes coerce per field kind and set the row's mask bit.
    pub fn row_view_mut(&mut self, row: usize) -> RowViewMut<'_> {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        RowViewMut { col: self, row }
    }

    /// A read-only row view whose writes are silently ignored (spec 4.2).
    pub fn row_view(&self, row: usize) -> RowView<'_> {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        RowView { col: self, row }
    }
}

impl Column for TypedColumn {
    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.fields.first().map(|f| f.len()).unwrap_or(0)
    }

    fn ensure_capacity(&mut self, n: usize) {
        let mut cap = self.capacity();
        if cap >= n {
            return;
        }
        if cap == 0 {
            cap = 1;
        }
        while cap < n {
            cap *= 2;
        }
        for field in &mut self.fields {
            field.resize(cap);
        }
    }

    fn push_default(&mut self) -> usize {
        let row = self.len;
        self.ensure_capacity(row + 1);
        self.len += 1;
        row
    }

    fn swap_remove(&mut self, row: usize) {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        let last = self.len - 1;
        if row != last {
            for field in &mut self.fields {
                field.swap_remove_slot(row, last);
            }
            let moved_bit = self.write_mask.contains(last);
            self.write_mask.remove(last);
            if moved_bit {
                self.write_mask.insert(row);
            } else {
                self.write_mask.remove(row);
            }
        } else {
            self.write_mask.remove(row);
        }
        self.len -= 1;
    }

    fn write_from_object(&mut self, row: usize, values: &ComponentValues, _epoch: u32) {
        // epoch unused: typed columns track writes via the bitmask, not an epoch (spec 4.3).
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        for (i, (name, kind)) in self.schema.fields().iter().enumerate() {
            let v = values.get(name).unwrap_or_else(|| Scalar::zero(*kind));
            self.fields[i].set(row, v);
        }
        self.write_mask.insert(row);
    }

    fn read_to_object(&self, row: usize, out: &mut ComponentValues) {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        out.retain_keys(self.schema.fields());
        for (i, (name, _)) in self.schema.fields().iter().enumerate() {
            out.set(name.clone(), self.fields[i].get(row));
        }
    }

    fn mark_written_range(&mut self, start: usize, end: usize, _epoch: u32) {
        for row in start..end {
            self.write_mask.insert(row);
        }
    }

    fn drain_written_rows(&mut self) -> Vec<usize> {
        let len = self.len;
        let mut rows: Vec<usize> = self.write_mask.iter().filter(|&r| r < len).collect();
        rows.sort_unstable();
        self.write_mask.clear();
        rows
    }

    fn is_row_written(&self, row: usize) -> bool {
        self.write_mask.contains(row)
    }

    fn spawn_like(&self, cap_hint: usize) -> Box<dyn Column> {
        let mut col = TypedColumn::new(self.schema.clone());
        col.ensure_capacity(cap_hint);
        Box::new(col)
    }

    fn copy_range_to(&self, dst: &mut dyn Column, count: usize) {
        if let Some(typed_dst) = dst.as_any_mut().downcast_mut::<TypedColumn>() {
            if typed_dst.schema == self.schema {
                typed_dst.ensure_capacity(count);
                for (field_idx, field) in self.fields.iter().enumerate() {
                    match (field, &mut typed_dst.fields[field_idx]) {
                        (FieldBuffer::F32(s), FieldBuffer::F32(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::F64(s), FieldBuffer::F64(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::I8(s), FieldBuffer::I8(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::I16(s), FieldBuffer::I16(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::I32(s), FieldBuffer::I32(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::U8(s), FieldBuffer::U8(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::U16(s), FieldBuffer::U16(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::U32(s), FieldBuffer::U32(d)) => d[..count].copy_from_slice(&s[..count]),
                        (FieldBuffer::Bool(s), FieldBuffer::Bool(d)) => d[..count].copy_from_slice(&s[..count]),
                        _ => unreachable!("matching schemas imply matching field kinds"),
                    }
                }
                typed_dst.len = typed_dst.len.max(count);
                return;
            }
        }
        // Fallback: row-by-row, which for a typed destination with a different schema still
        // goes through the coercing write path.
        let mut tmp = ComponentValues::new();
        dst.ensure_capacity(count);
        for row in 0..count {
            self.read_to_object(row, &mut tmp);
            dst.write_from_object(row, &tmp, 0);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Zero-copy description of a typed column's row range, suitable for shipping across the worker
/// protocol boundary (spec 4.2, 6) without copying field data.
#[derive(Debug, Clone)]
pub struct ChunkSliceDescriptor {
    pub base_row: usize,
    pub fields: Vec<FieldSliceDescriptor>,
    pub write_mask_len: usize,
}

#[derive(Debug, Clone)]
pub struct FieldSliceDescriptor {
    pub name: String,
    pub kind: ScalarKind,
    pub byte_offset: usize,
    pub length: usize,
}

#[derive(Debug)]
pub enum FieldSlice<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
    Bool(&'a [u8]),
}

impl<'a> FieldSlice<'a> {
    pub fn len(&self) -> usize {
        match self {
            FieldSlice::F32(v) => v.len(),
            FieldSlice::F64(v) => v.len(),
            FieldSlice::I8(v) => v.len(),
            FieldSlice::I16(v) => v.len(),
            FieldSlice::I32(v) => v.len(),
            FieldSlice::U8(v) => v.len(),
            FieldSlice::U16(v) => v.len(),
            FieldSlice::U32(v) => v.len(),
            FieldSlice::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Option<Scalar> {
        Some(match self {
            FieldSlice::F32(v) => Scalar::F32(*v.get(row)?),
            FieldSlice::F64(v) => Scalar::F64(*v.get(row)?),
            FieldSlice::I8(v) => Scalar::I8(*v.get(row)?),
            FieldSlice::I16(v) => Scalar::I16(*v.get(row)?),
            FieldSlice::I32(v) => Scalar::I32(*v.get(row)?),
            FieldSlice::U8(v) => Scalar::U8(*v.get(row)?),
            FieldSlice::U16(v) => Scalar::U16(*v.get(row)?),
            FieldSlice::U32(v) => Scalar::U32(*v.get(row)?),
            FieldSlice::Bool(v) => Scalar::Bool(*v.get(row)? != 0),
        })
    }
}

#[derive(Debug)]
pub enum FieldSliceMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    I8(&'a mut [i8]),
    I16(&'a mut [i16]),
    I32(&'a mut [i32]),
    U8(&'a mut [u8]),
    U16(&'a mut [u16]),
    U32(&'a mut [u32]),
    Bool(&'a mut [u8]),
}

impl<'a> FieldSliceMut<'a> {
    pub fn len(&self) -> usize {
        match self {
            FieldSliceMut::F32(v) => v.len(),
            FieldSliceMut::F64(v) => v.len(),
            FieldSliceMut::I8(v) => v.len(),
            FieldSliceMut::I16(v) => v.len(),
            FieldSliceMut::I32(v) => v.len(),
            FieldSliceMut::U8(v) => v.len(),
            FieldSliceMut::U16(v) => v.len(),
            FieldSliceMut::U32(v) => v.len(),
            FieldSliceMut::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Option<Scalar> {
        Some(match self {
            FieldSliceMut::F32(v) => Scalar::F32(*v.get(row)?),
            FieldSliceMut::F64(v) => Scalar::F64(*v.get(row)?),
            FieldSliceMut::I8(v) => Scalar::I8(*v.get(row)?),
            FieldSliceMut::I16(v) => Scalar::I16(*v.get(row)?),
            FieldSliceMut::I32(v) => Scalar::I32(*v.get(row)?),
            FieldSliceMut::U8(v) => Scalar::U8(*v.get(row)?),
            FieldSliceMut::U16(v) => Scalar::U16(*v.get(row)?),
            FieldSliceMut::U32(v) => Scalar::U32(*v.get(row)?),
            FieldSliceMut::Bool(v) => Scalar::Bool(*v.get(row)? != 0),
        })
    }

    /// Coerces `value` to this slice's own kind, same contract as `FieldBuffer::set` (spec 4.2).
    pub fn set(&mut self, row: usize, value: Scalar) {
        let kind = match self {
            FieldSliceMut::F32(_) => ScalarKind::F32,
            FieldSliceMut::F64(_) => ScalarKind::F64,
            FieldSliceMut::I8(_) => ScalarKind::I8,
            FieldSliceMut::I16(_) => ScalarKind::I16,
            FieldSliceMut::I32(_) => ScalarKind::I32,
            FieldSliceMut::U8(_) => ScalarKind::U8,
            FieldSliceMut::U16(_) => ScalarKind::U16,
            FieldSliceMut::U32(_) => ScalarKind::U32,
            FieldSliceMut::Bool(_) => ScalarKind::Bool,
        };
        let coerced = Scalar::coerce(kind, value.as_f64());
        match (self, coerced) {
            (FieldSliceMut::F32(v), Scalar::F32(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::F64(v), Scalar::F64(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::I8(v), Scalar::I8(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::I16(v), Scalar::I16(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::I32(v), Scalar::I32(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::U8(v), Scalar::U8(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::U16(v), Scalar::U16(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::U32(v), Scalar::U32(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = x;
                }
            }
            (FieldSliceMut::Bool(v), Scalar::Bool(x)) => {
                if let Some(slot) = v.get_mut(row) {
                    *slot = if x { 1 } else { 0 };
                }
            }
            _ => unreachable!("Scalar::coerce always returns the target field's own kind"),
        }
    }
}

/// Read-write row view over a `TypedColumn`; writes coerce per field kind and set the mask bit
/// (spec 4.2).
pub struct RowViewMut<'a> {
    col: &'a mut TypedColumn,
    row: usize,
}

impl<'a> RowViewMut<'a> {
    pub fn get(&self, name: &str) -> Option<Scalar> {
        let idx = self.col.schema.field_index(name)?;
        Some(self.col.fields[idx].get(self.row))
    }

    pub fn set(&mut self, name: &str, value: Scalar) {
        if let Some(idx) = self.col.schema.field_index(name) {
            self.col.fields[idx].set(self.row, value);
            self.col.write_mask.insert(self.row);
        }
    }
}

/// Read-only row view; writes are silently ignored rather than panicking, so it is safe to hand
/// to debugging/iteration helpers that only ever read (spec 4.2).
pub struct RowView<'a> {
    col: &'a TypedColumn,
    row: usize,
}

impl<'a> RowView<'a> {
    pub fn get(&self, name: &str) -> Option<Scalar> {
        let idx = self.col.schema.field_index(name)?;
        Some(self.col.fields[idx].get(self.row))
    }

    /// No-op: this view is read-only (spec 4.2, invariant 9).
    pub fn set(&self, _name: &str, _value: Scalar) {}
}

// ---------------------------------------------------------------------------------------------
// Heterogeneous array column
// ---------------------------------------------------------------------------------------------

/// Generic column: one boxed value per row, change-tracked by a per-row epoch rather than a
/// write mask (spec 4.3).
#[derive(Debug)]
pub struct ArrayColumn {
    rows: Vec<Option<Box<dyn DynComponent>>>,
    row_epochs: Vec<u32>,
    len: usize,
}

impl ArrayColumn {
    pub fn new() -> Self {
        ArrayColumn { rows: Vec::new(), row_epochs: Vec::new(), len: 0 }
    }

    pub fn get<T: 'static>(&self, row: usize) -> Option<&T> {
        self.rows.get(row)?.as_ref()?.downcast_ref::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self, row: usize) -> Option<&mut T> {
        self.rows.get_mut(row)?.as_mut()?.downcast_mut::<T>()
    }

    pub fn set_value<T: 'static + Clone + Debug + Send + Sync>(&mut self, row: usize, value: T, epoch: u32) {
        self.set_boxed(row, Box::new(value), epoch);
    }

    pub fn set_boxed(&mut self, row: usize, value: Box<dyn DynComponent>, epoch: u32) {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        self.rows[row] = Some(value);
        self.row_epochs[row] = epoch;
    }

    pub fn row_epoch(&self, row: usize) -> u32 {
        self.row_epochs[row]
    }

    /// `changed_since(frame)` reads naturally from the epoch array: idempotent within a frame,
    /// one-shot across frames because callers pass a strictly increasing `since_frame` (DESIGN.md
    /// open-question resolution).
    pub fn changed_since(&self, since_frame: u32) -> Vec<usize> {
        (0..self.len).filter(|&r| self.row_epochs[r] >= since_frame).collect()
    }

    /// Owned clones of rows `[start, end)`, the chunk dispatcher's per-row fallback payload for
    /// array-backed components (spec 4.9: "per-row cloned data for array columns").
    pub fn clone_rows(&self, start: usize, end: usize) -> Vec<Option<Box<dyn DynComponent>>> {
        self.rows[start..end].to_vec()
    }

    /// Writes cloned rows back into `[start, start + values.len())`, bumping each written row's
    /// epoch, the commit half of the chunk dispatcher's array-column fallback path.
    pub fn write_rows_back(&mut self, start: usize, values: Vec<Option<Box<dyn DynComponent>>>, epoch: u32) {
        for (i, v) in values.into_iter().enumerate() {
            let row = start + i;
            assert!(row < self.len, "row {} out of range (len {})", row, self.len);
            self.rows[row] = v;
            self.row_epochs[row] = epoch;
        }
    }
}

impl Default for ArrayColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl Column for ArrayColumn {
    fn len(&self) -> usize {
        self.len
    }

    fn capacity(&self) -> usize {
        self.rows.len()
    }

    fn ensure_capacity(&mut self, n: usize) {
        let mut cap = self.rows.len();
        if cap >= n {
            return;
        }
        if cap == 0 {
            cap = 1;
        }
        while cap < n {
            cap *= 2;
        }
        self.rows.resize_with(cap, || None);
        self.row_epochs.resize(cap, 0);
    }

    fn push_default(&mut self) -> usize {
        let row = self.len;
        self.ensure_capacity(row + 1);
        self.len += 1;
        row
    }

    fn swap_remove(&mut self, row: usize) {
        assert!(row < self.len, "row {} out of range (len {})", row, self.len);
        let last = self.len - 1;
        if row != last {
            self.rows.swap(row, last);
            self.row_epochs.swap(row, last);
        }
        self.rows[last] = None;
        self.len -= 1;
    }

    fn write_from_object(&mut self, _row: usize, _values: &ComponentValues, _epoch: u32) {
        // ArrayColumn stores opaque boxed values, not named schema fields; callers use
        // `set_value`/`get`/`get_mut` directly. This exists so `ArrayColumn` still satisfies the
        // shared `Column` contract for code that is generic over the backing.
    }

    fn read_to_object(&self, _row: usize, out: &mut ComponentValues) {
        out.retain_keys(&[]);
    }

    fn mark_written_range(&mut self, start: usize, end: usize, epoch: u32) {
        for row in start..end {
            self.row_epochs[row] = epoch;
        }
    }

    fn drain_written_rows(&mut self) -> Vec<usize> {
        // Array columns never "drain" the epoch record (it's a standing high-water mark, not a
        // one-shot bitmask); callers use `changed_since` instead.
        (0..self.len).collect()
    }

    fn is_row_written(&self, row: usize) -> bool {
        row < self.len && self.row_epochs[row] > 0
    }

    fn spawn_like(&self, cap_hint: usize) -> Box<dyn Column> {
        let mut col = ArrayColumn::new();
        col.ensure_capacity(cap_hint);
        Box::new(col)
    }

    fn copy_range_to(&self, dst: &mut dyn Column, count: usize) {
        if let Some(arr_dst) = dst.as_any_mut().downcast_mut::<ArrayColumn>() {
            arr_dst.ensure_capacity(count);
            for row in 0..count {
                arr_dst.rows[row] = self.rows[row].clone();
                arr_dst.row_epochs[row] = self.row_epochs[row];
            }
            arr_dst.len = arr_dst.len.max(count);
            return;
        }
        // Copying into a typed column drops epoch metadata (spec 4.3); there is no generic boxed
        // -> named-field mapping, so this is a documented no-op fallback rather than a panic.
        dst.ensure_capacity(count);
    }

    fn clone_row_into(&self, row: usize, dst: &mut dyn Column, dst_row: usize, epoch: u32) {
        if let Some(arr_dst) = dst.as_any_mut().downcast_mut::<ArrayColumn>() {
            arr_dst.rows[dst_row] = self.rows[row].clone();
            arr_dst.row_epochs[dst_row] = epoch;
        }
        // Into a typed column there is no schema mapping for an opaque boxed value, so the
        // migrated row keeps whatever default the destination column already assigned it.
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy_schema() -> Schema {
        Schema::new(vec![("x", ScalarKind::F32), ("y", ScalarKind::F32)])
    }

    #[test]
    fn push_and_length_parity() {
        let mut col = TypedColumn::new(xy_schema());
        for _ in 0..5 {
            col.push_default();
        }
        assert_eq!(col.len(), 5);
        assert!(col.capacity() >= 5);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut col = TypedColumn::new(xy_schema());
        col.push_default();
        let mut values = ComponentValues::new();
        values.set("x", Scalar::F32(1.5));
        values.set("y", Scalar::F32(-2.5));
        col.write_from_object(0, &values, 0);
        let mut out = ComponentValues::new();
        col.read_to_object(0, &mut out);
        assert_eq!(out.get("x"), Some(Scalar::F32(1.5)));
        assert_eq!(out.get("y"), Some(Scalar::F32(-2.5)));
        assert!(col.is_row_written(0));
    }

    #[test]
    fn missing_keys_default_to_zero_and_extra_keys_are_ignored() {
        let mut col = TypedColumn::new(xy_schema());
        col.push_default();
        let mut values = ComponentValues::new();
        values.set("x", Scalar::F32(4.0));
        values.set("bogus", Scalar::F32(99.0));
        col.write_from_object(0, &values, 0);
        let mut out = ComponentValues::new();
        col.read_to_object(0, &mut out);
        assert_eq!(out.get("x"), Some(Scalar::F32(4.0)));
        assert_eq!(out.get("y"), Some(Scalar::F32(0.0)));
        assert!(out.get("bogus").is_none());
    }

    #[test]
    fn swap_remove_moves_last_row_and_write_bit() {
        let mut col = TypedColumn::new(xy_schema());
        for i in 0..3 {
            col.push_default();
            let mut v = ComponentValues::new();
            v.set("x", Scalar::F32(i as f32));
            col.write_from_object(i, &v, 0);
        }
        col.drain_written_rows();
        let mut v = ComponentValues::new();
        v.set("x", Scalar::F32(99.0));
        col.write_from_object(2, &v, 0); // mark row 2 (the "last") written again
        col.swap_remove(0);
        assert_eq!(col.len(), 2);
        let mut out = ComponentValues::new();
        col.read_to_object(0, &mut out);
        assert_eq!(out.get("x"), Some(Scalar::F32(99.0)));
        assert!(col.is_row_written(0));
    }

    #[test]
    fn drain_written_rows_is_sorted_and_clears() {
        let mut col = TypedColumn::new(xy_schema());
        for _ in 0..4 {
            col.push_default();
        }
        let v = ComponentValues::new();
        col.write_from_object(3, &v, 0);
        col.write_from_object(1, &v, 0);
        let drained = col.drain_written_rows();
        assert_eq!(drained, vec![1, 3]);
        assert_eq!(col.drain_written_rows(), Vec::<usize>::new());
    }

    #[test]
    fn read_only_view_ignores_writes() {
        let mut col = TypedColumn::new(xy_schema());
        col.push_default();
        let mut v = ComponentValues::new();
        v.set("x", Scalar::F32(1.0));
        col.write_from_object(0, &v, 0);
        col.drain_written_rows();
        let before = col.clone();
        {
            let view = col.row_view(0);
            view.set("x", Scalar::F32(123.0));
        }
        assert_eq!(col.fields[0].get(0), before.fields[0].get(0));
        assert!(!col.is_row_written(0));
    }

    #[test]
    fn copy_range_to_same_schema_is_contiguous() {
        let mut src = TypedColumn::new(xy_schema());
        for i in 0..3 {
            src.push_default();
            let mut v = ComponentValues::new();
            v.set("x", Scalar::F32(i as f32));
            src.write_from_object(i, &v, 0);
        }
        let mut dst = TypedColumn::new(xy_schema());
        src.copy_range_to(&mut dst, 3);
        let mut out = ComponentValues::new();
        dst.read_to_object(2, &mut out);
        assert_eq!(out.get("x"), Some(Scalar::F32(2.0)));
    }

    #[test]
    fn array_column_copy_range_preserves_epoch() {
        let mut src = ArrayColumn::new();
        src.push_default();
        src.set_value(0, 42i64, 7);
        let mut dst = ArrayColumn::new();
        src.copy_range_to(&mut dst, 1);
        assert_eq!(dst.row_epoch(0), 7);
        assert_eq!(dst.get::<i64>(0), Some(&42));
    }
}
