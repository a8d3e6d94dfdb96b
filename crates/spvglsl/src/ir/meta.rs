//! Name and decoration metadata, keyed by ID.

use super::types::Id;
use bitflags::bitflags;
use log::warn;
use spirv::BuiltIn;
use std::collections::HashMap;

bitflags! {
    /// Boolean decorations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DecorationFlags: u32 {
        const BLOCK = 1 << 0;
        const BUFFER_BLOCK = 1 << 1;
        const ROW_MAJOR = 1 << 2;
        const COL_MAJOR = 1 << 3;
        const NON_WRITABLE = 1 << 4;
        const NON_READABLE = 1 << 5;
        const RESTRICT = 1 << 6;
        const ALIASED = 1 << 7;
        const FLAT = 1 << 8;
        const NO_PERSPECTIVE = 1 << 9;
        const CENTROID = 1 << 10;
        const RELAXED_PRECISION = 1 << 11;
        const PATCH = 1 << 12;
        const SAMPLE = 1 << 13;
        const INVARIANT = 1 << 14;
        const COHERENT = 1 << 15;
        const VOLATILE = 1 << 16;
    }
}

/// Decorations attached to an ID or to one struct member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoration {
    pub name: String,
    pub builtin: Option<BuiltIn>,
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub index: Option<u32>,
    pub binding: Option<u32>,
    pub set: Option<u32>,
    pub offset: Option<u32>,
    pub array_stride: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub spec_id: Option<u32>,
    pub input_attachment_index: Option<u32>,
    pub flags: DecorationFlags,
}

impl Decoration {
    /// Apply one decoration instruction. Unknown decorations are logged and
    /// ignored; they never change emitted code.
    pub fn apply(&mut self, decoration: spirv::Decoration, args: &[u32]) {
        use spirv::Decoration as D;
        let first = args.first().copied();
        match decoration {
            D::BuiltIn => self.builtin = first.and_then(BuiltIn::from_u32),
            D::Location => self.location = first,
            D::Component => self.component = first,
            D::Index => self.index = first,
            D::Binding => self.binding = first,
            D::DescriptorSet => self.set = first,
            D::Offset => self.offset = first,
            D::ArrayStride => self.array_stride = first,
            D::MatrixStride => self.matrix_stride = first,
            D::SpecId => self.spec_id = first,
            D::InputAttachmentIndex => self.input_attachment_index = first,
            D::Block => self.flags |= DecorationFlags::BLOCK,
            D::BufferBlock => self.flags |= DecorationFlags::BUFFER_BLOCK,
            D::RowMajor => self.flags |= DecorationFlags::ROW_MAJOR,
            D::ColMajor => self.flags |= DecorationFlags::COL_MAJOR,
            D::NonWritable => self.flags |= DecorationFlags::NON_WRITABLE,
            D::NonReadable => self.flags |= DecorationFlags::NON_READABLE,
            D::Restrict => self.flags |= DecorationFlags::RESTRICT,
            D::Aliased => self.flags |= DecorationFlags::ALIASED,
            D::Flat => self.flags |= DecorationFlags::FLAT,
            D::NoPerspective => self.flags |= DecorationFlags::NO_PERSPECTIVE,
            D::Centroid => self.flags |= DecorationFlags::CENTROID,
            D::RelaxedPrecision => self.flags |= DecorationFlags::RELAXED_PRECISION,
            D::Patch => self.flags |= DecorationFlags::PATCH,
            D::Sample => self.flags |= DecorationFlags::SAMPLE,
            D::Invariant => self.flags |= DecorationFlags::INVARIANT,
            D::Coherent => self.flags |= DecorationFlags::COHERENT,
            D::Volatile => self.flags |= DecorationFlags::VOLATILE,
            other => warn!("ignoring decoration {other:?}"),
        }
    }

    pub fn has(&self, flag: DecorationFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Metadata for one ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub decoration: Decoration,
    pub members: Vec<Decoration>,
}

impl Meta {
    pub fn member_mut(&mut self, index: usize) -> &mut Decoration {
        if self.members.len() <= index {
            self.members.resize_with(index + 1, Decoration::default);
        }
        &mut self.members[index]
    }

    pub fn member(&self, index: usize) -> Option<&Decoration> {
        self.members.get(index)
    }

    /// Whether any member carries an explicit offset.
    pub fn has_member_offsets(&self) -> bool {
        self.members.iter().any(|m| m.offset.is_some())
    }
}

/// Side table of metadata for every decorated or named ID.
#[derive(Debug, Clone, Default)]
pub struct MetaTable {
    entries: HashMap<Id, Meta>,
}

impl MetaTable {
    pub fn get(&self, id: Id) -> Option<&Meta> {
        self.entries.get(&id)
    }

    pub fn entry(&mut self, id: Id) -> &mut Meta {
        self.entries.entry(id).or_default()
    }

    pub fn decoration(&self, id: Id) -> Option<&Decoration> {
        self.get(id).map(|m| &m.decoration)
    }

    pub fn member_decoration(&self, id: Id, index: usize) -> Option<&Decoration> {
        self.get(id).and_then(|m| m.member(index))
    }

    /// The debug name of `id`, or an empty string.
    pub fn name(&self, id: Id) -> &str {
        self.decoration(id).map_or("", |d| d.name.as_str())
    }

    pub fn member_name(&self, id: Id, index: usize) -> &str {
        self.member_decoration(id, index)
            .map_or("", |d| d.name.as_str())
    }

    pub fn has_flag(&self, id: Id, flag: DecorationFlags) -> bool {
        self.decoration(id).is_some_and(|d| d.has(flag))
    }

    pub fn has_member_flag(&self, id: Id, index: usize, flag: DecorationFlags) -> bool {
        self.member_decoration(id, index).is_some_and(|d| d.has(flag))
    }

    pub fn builtin(&self, id: Id) -> Option<BuiltIn> {
        self.decoration(id).and_then(|d| d.builtin)
    }

    pub fn member_builtin(&self, id: Id, index: usize) -> Option<BuiltIn> {
        self.member_decoration(id, index).and_then(|d| d.builtin)
    }

    /// Copy every decoration from `from` onto `to` (decoration groups).
    pub fn copy_decorations(&mut self, from: Id, to: Id) {
        if let Some(source) = self.get(from).cloned() {
            let target = self.entry(to);
            let name = std::mem::take(&mut target.decoration.name);
            target.decoration = Decoration {
                name,
                ..source.decoration
            };
        }
    }

    /// Copy the group's decorations onto member `index` of `to`.
    pub fn copy_member_decorations(&mut self, from: Id, to: Id, index: usize) {
        if let Some(source) = self.get(from).cloned() {
            let member = self.entry(to).member_mut(index);
            let name = std::mem::take(&mut member.name);
            *member = Decoration {
                name,
                ..source.decoration
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_and_values_accumulate() {
        let mut deco = Decoration::default();
        deco.apply(spirv::Decoration::Binding, &[3]);
        deco.apply(spirv::Decoration::DescriptorSet, &[1]);
        deco.apply(spirv::Decoration::NonWritable, &[]);
        deco.apply(spirv::Decoration::BuiltIn, &[spirv::BuiltIn::Position as u32]);
        assert_eq!(deco.binding, Some(3));
        assert_eq!(deco.set, Some(1));
        assert!(deco.has(DecorationFlags::NON_WRITABLE));
        assert_eq!(deco.builtin, Some(spirv::BuiltIn::Position));
    }

    #[test]
    fn member_table_grows_on_demand() {
        let mut table = MetaTable::default();
        table.entry(7).member_mut(2).offset = Some(16);
        assert_eq!(table.member_decoration(7, 2).and_then(|d| d.offset), Some(16));
        assert!(table.get(7).unwrap().has_member_offsets());
        assert_eq!(table.member_name(7, 0), "");
    }

    #[test]
    fn group_copy_keeps_target_name() {
        let mut table = MetaTable::default();
        table.entry(1).decoration.flags |= DecorationFlags::RESTRICT;
        table.entry(2).decoration.name = "buf".into();
        table.copy_decorations(1, 2);
        assert!(table.has_flag(2, DecorationFlags::RESTRICT));
        assert_eq!(table.name(2), "buf");
    }
}
