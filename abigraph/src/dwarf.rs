//! DWARF adapter: turn the type entries of each compilation unit into
//! descriptors and feed them to a [`Corpus`]
use crate::corpus::{Corpus, CorpusOptions};
use crate::descriptor::{
    DescriptorKind, DescriptorTable, ForeignId, FunctionDescriptor, MemberDescriptor,
    SubrangeDescriptor, TypeDescriptor,
};
use crate::node::{BaseEncoding, Qualifiers};
use crate::reader::{self, DwarfReader};
use anyhow::Result;
use gimli::{
    AttributeValue, DebuggingInformationEntry, Dwarf, Endianity, Expression, Operation, Reader,
    ReaderOffset, Section, Unit, UnitOffset,
};

type Entry<'a> = DebuggingInformationEntry<'a, 'a, DwarfReader>;

/// ids of references that leave the unit; they never resolve
const FOREIGN_UNIT_BIT: u64 = 1 << 63;

/// typedefs and qualifiers followed when sizing a bitfield's storage unit
const MAX_TYPE_CHAIN: usize = 16;

/// tags that name a type this adapter does not model
const UNSUPPORTED_TYPE_TAGS: &[gimli::DwTag] = &[
    gimli::DW_TAG_ptr_to_member_type,
    gimli::DW_TAG_string_type,
    gimli::DW_TAG_set_type,
    gimli::DW_TAG_file_type,
    gimli::DW_TAG_interface_type,
    gimli::DW_TAG_packed_type,
    gimli::DW_TAG_shared_type,
    gimli::DW_TAG_atomic_type,
    gimli::DW_TAG_immutable_type,
    gimli::DW_TAG_coarray_type,
    gimli::DW_TAG_dynamic_type,
];

/// descriptors of every type entry of one compilation unit
pub struct UnitDescriptors<'a> {
    dwarf: &'a Dwarf<DwarfReader>,
    unit: &'a Unit<DwarfReader>,
    big_endian: bool,
    table: DescriptorTable,
}

impl<'a> UnitDescriptors<'a> {
    pub fn read(dwarf: &'a Dwarf<DwarfReader>, unit: &'a Unit<DwarfReader>) -> Result<DescriptorTable> {
        let mut reader = Self {
            dwarf,
            unit,
            big_endian: dwarf.debug_info.reader().endian().is_big_endian(),
            table: DescriptorTable::new(),
        };

        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if let Some(desc) = reader.describe(entry)? {
                reader.table.insert(desc);
            }
        }

        log::debug!("{:>12} {} type entries", "DONE", reader.table.len());
        Ok(reader.table)
    }

    fn describe(&self, entry: &Entry<'_>) -> Result<Option<TypeDescriptor>> {
        let id = ForeignId(entry.offset().0.into_u64());
        let tag = entry.tag();

        let desc = match tag {
            gimli::DW_TAG_base_type => {
                let encoding = match entry.attr_value(gimli::DW_AT_encoding)? {
                    Some(AttributeValue::Encoding(ate)) => base_encoding(ate),
                    _ => BaseEncoding::Other(0),
                };
                let size_bits = self.size_bits(entry)?.unwrap_or(0);
                self.named(TypeDescriptor::new(id, DescriptorKind::Base), entry)?
                    .with_size_bits(size_bits)
                    .with_align_bits(self.align_bits(entry)?.unwrap_or(size_bits))
                    .with_encoding(encoding)
            }
            gimli::DW_TAG_unspecified_type => {
                self.named(TypeDescriptor::new(id, DescriptorKind::Base), entry)?
                    .with_size_bits(0)
                    .with_align_bits(0)
                    .with_encoding(BaseEncoding::Void)
            }
            gimli::DW_TAG_typedef => {
                let desc = self.named(TypeDescriptor::new(id, DescriptorKind::Typedef), entry)?;
                self.referencing(desc, entry)?
            }
            gimli::DW_TAG_pointer_type
            | gimli::DW_TAG_reference_type
            | gimli::DW_TAG_rvalue_reference_type => {
                let size_bits = self
                    .size_bits(entry)?
                    .unwrap_or(u64::from(self.unit.header.address_size()) * 8);
                let desc = TypeDescriptor::new(id, DescriptorKind::Pointer)
                    .with_size_bits(size_bits)
                    .with_align_bits(self.align_bits(entry)?.unwrap_or(size_bits));
                self.referencing(desc, entry)?
            }
            gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type | gimli::DW_TAG_restrict_type => {
                let qualifiers = match tag {
                    gimli::DW_TAG_const_type => Qualifiers::new().with_const(),
                    gimli::DW_TAG_volatile_type => Qualifiers::new().with_volatile(),
                    _ => Qualifiers::new().with_restrict(),
                };
                let desc =
                    TypeDescriptor::new(id, DescriptorKind::Qualified).with_qualifiers(qualifiers);
                self.referencing(desc, entry)?
            }
            gimli::DW_TAG_array_type => {
                let desc = self.referencing(TypeDescriptor::new(id, DescriptorKind::Array), entry)?;
                self.read_subranges(desc, entry)?
            }
            gimli::DW_TAG_subroutine_type => self.read_subroutine(id, entry)?,
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type | gimli::DW_TAG_union_type => {
                let kind = if tag == gimli::DW_TAG_union_type {
                    DescriptorKind::Union
                } else {
                    DescriptorKind::Struct
                };
                self.read_aggregate(id, kind, entry)?
            }
            gimli::DW_TAG_enumeration_type => self.read_enumeration(id, entry)?,
            tag if UNSUPPORTED_TYPE_TAGS.contains(&tag) => {
                log::trace!("{:>12} {}: {}", "unsupported", id, tag);
                TypeDescriptor::new(id, DescriptorKind::Unsupported(tag.0))
            }
            _ => return Ok(None),
        };

        let desc = if attr_flag_is_true(entry.attr(gimli::DW_AT_artificial)?) {
            desc.artificial()
        } else {
            desc
        };
        Ok(Some(desc))
    }

    fn read_subranges(&self, mut desc: TypeDescriptor, entry: &Entry<'_>) -> Result<TypeDescriptor> {
        let mut tree = self.unit.entries_tree(Some(entry.offset()))?;
        let array = tree.root()?;

        let mut children = array.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }

            let lower_bound = entry
                .attr_value(gimli::DW_AT_lower_bound)?
                .and_then(|value| value.sdata_value())
                .unwrap_or(0);
            let upper_bound = match entry.attr_value(gimli::DW_AT_count)? {
                Some(count) => match count.udata_value().filter(|count| *count > 0) {
                    Some(count) => {
                        let upper = upper_from_count(lower_bound, count);
                        if upper.is_none() {
                            desc = desc.malformed(format!(
                                "dimension of {count} elements from {lower_bound} overflows"
                            ));
                        }
                        upper
                    }
                    None => None,
                },
                None => entry
                    .attr_value(gimli::DW_AT_upper_bound)?
                    .and_then(|value| value.sdata_value()),
            };

            desc = desc.with_subrange(SubrangeDescriptor {
                index_type: self.type_ref(entry)?,
                lower_bound,
                upper_bound,
            });
        }
        Ok(desc)
    }

    fn read_subroutine(&self, id: ForeignId, entry: &Entry<'_>) -> Result<TypeDescriptor> {
        let return_id = self.type_ref(entry)?;
        let mut parameter_ids = Vec::new();
        let mut is_variadic = false;

        let mut tree = self.unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            match entry.tag() {
                gimli::DW_TAG_formal_parameter => match self.type_ref(entry)? {
                    Some(param) => parameter_ids.push(param),
                    None => log::trace!("skip parameter without type in {}", id),
                },
                gimli::DW_TAG_unspecified_parameters => is_variadic = true,
                _ => {}
            }
        }

        Ok(TypeDescriptor::new(id, DescriptorKind::Function).with_function(FunctionDescriptor {
            return_id,
            parameter_ids,
            is_variadic,
        }))
    }

    fn read_aggregate(
        &self,
        id: ForeignId,
        kind: DescriptorKind,
        entry: &Entry<'_>,
    ) -> Result<TypeDescriptor> {
        let mut desc = self
            .named(TypeDescriptor::new(id, kind), entry)?
            .with_size_bits(self.size_bits(entry)?.unwrap_or(0))
            .with_align_bits(self.align_bits(entry)?.unwrap_or(0));
        if attr_flag_is_true(entry.attr(gimli::DW_AT_declaration)?) {
            desc = desc.declaration_only();
        }

        let mut tree = self.unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            let is_static = match entry.tag() {
                // DWARF 5 static data members
                gimli::DW_TAG_variable => true,
                gimli::DW_TAG_member => {
                    attr_flag_is_true(entry.attr(gimli::DW_AT_external)?)
                        || attr_flag_is_true(entry.attr(gimli::DW_AT_declaration)?)
                }
                _ => continue,
            };

            let name = self.name(entry);
            let Some(type_id) = self.type_ref(entry)? else {
                log::trace!("skip member {:?} of {} with no type", name, id);
                continue;
            };

            let bit_offset = if is_static {
                Some(0)
            } else {
                self.member_bit_offset(entry)?
            };
            let Some(bit_offset) = bit_offset else {
                desc = desc.malformed(format!(
                    "bit offset of member {} cannot be computed",
                    name.as_deref().unwrap_or("<anonymous>")
                ));
                continue;
            };

            log::trace!(
                "{:>12} {:#010x}: {} @ bit {}",
                "member",
                entry.offset().0.into_u64(),
                name.as_deref().unwrap_or("<anonymous>"),
                bit_offset
            );
            desc = desc.with_member_descriptor(MemberDescriptor {
                name,
                type_id,
                bit_offset,
                is_static,
            });
        }
        Ok(desc)
    }

    /// offset in bits from the start of the aggregate. DWARF 5 gives it
    /// directly; DWARF 2-4 bitfields count from the most significant bit of
    /// their storage unit. `None` when the arithmetic overflows.
    fn member_bit_offset(&self, entry: &Entry<'_>) -> Result<Option<u64>> {
        if let Some(bits) = entry
            .attr_value(gimli::DW_AT_data_bit_offset)?
            .and_then(|value| value.udata_value())
        {
            return Ok(Some(bits));
        }

        let location = self.member_location(entry)?.unwrap_or(0);
        let Some(bit_offset) = entry
            .attr_value(gimli::DW_AT_bit_offset)?
            .and_then(|value| value.udata_value())
        else {
            return Ok(location.checked_mul(8));
        };

        let bit_size = entry
            .attr_value(gimli::DW_AT_bit_size)?
            .and_then(|value| value.udata_value())
            .unwrap_or(0);
        let storage_bytes = match entry
            .attr_value(gimli::DW_AT_byte_size)?
            .and_then(|value| value.udata_value())
        {
            Some(bytes) => Some(bytes),
            None => self.referenced_byte_size(entry)?,
        };
        Ok(bitfield_offset(
            location,
            storage_bytes.and_then(|bytes| bytes.checked_mul(8)),
            bit_offset,
            bit_size,
            self.big_endian,
        ))
    }

    /// DW_AT_data_member_location in bytes, as a constant or as the
    /// `DW_OP_plus_uconst n` expression DWARF 2 producers emit
    fn member_location(&self, entry: &Entry<'_>) -> Result<Option<u64>> {
        Ok(match entry.attr_value(gimli::DW_AT_data_member_location)? {
            None => None,
            Some(AttributeValue::Exprloc(expr)) => {
                let offset = self.constant_location(expr)?;
                if offset.is_none() {
                    log::debug!(
                        "member at {:#010x} has a computed location, assuming 0",
                        entry.offset().0.into_u64()
                    );
                }
                offset
            }
            Some(value) => value.udata_value(),
        })
    }

    fn constant_location(&self, expr: Expression<DwarfReader>) -> Result<Option<u64>> {
        let mut operations = expr.operations(self.unit.header.encoding());
        let offset = match operations.next()? {
            Some(Operation::PlusConstant { value }) | Some(Operation::UnsignedConstant { value }) => {
                value
            }
            _ => return Ok(None),
        };
        // anything after the constant makes the location depend on the object
        Ok(match operations.next()? {
            None => Some(offset),
            Some(_) => None,
        })
    }

    /// byte size of the type `entry` refers to, looking through typedefs and
    /// qualifiers
    fn referenced_byte_size(&self, entry: &Entry<'_>) -> Result<Option<u64>> {
        let mut offset: UnitOffset<usize> = match entry.attr_value(gimli::DW_AT_type)? {
            Some(AttributeValue::UnitRef(offset)) => offset,
            _ => return Ok(None),
        };

        for _ in 0..MAX_TYPE_CHAIN {
            let mut entries = self.unit.entries_at_offset(offset)?;
            let Some((_, target)) = entries.next_dfs()? else {
                return Ok(None);
            };
            if let Some(bytes) = target
                .attr_value(gimli::DW_AT_byte_size)?
                .and_then(|value| value.udata_value())
            {
                return Ok(Some(bytes));
            }
            offset = match target.attr_value(gimli::DW_AT_type)? {
                Some(AttributeValue::UnitRef(next)) => next,
                _ => return Ok(None),
            };
        }
        Ok(None)
    }

    fn read_enumeration(&self, id: ForeignId, entry: &Entry<'_>) -> Result<TypeDescriptor> {
        let size_bits = self.size_bits(entry)?.unwrap_or(32);
        let mut desc = self
            .named(TypeDescriptor::new(id, DescriptorKind::Enum), entry)?
            .with_size_bits(size_bits)
            .with_align_bits(self.align_bits(entry)?.unwrap_or(size_bits));
        if let Some(underlying) = self.type_ref(entry)? {
            desc = desc.with_referenced(underlying);
        }
        if attr_flag_is_true(entry.attr(gimli::DW_AT_declaration)?) {
            desc = desc.declaration_only();
        }

        let mut tree = self.unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            let Some(name) = self.name(entry) else {
                continue;
            };
            let value = entry
                .attr_value(gimli::DW_AT_const_value)?
                .and_then(|value| value.sdata_value().or(value.udata_value().map(|v| v as i64)))
                .unwrap_or(0);
            desc = desc.with_enumerator(&name, value);
        }
        Ok(desc)
    }

    fn named(&self, desc: TypeDescriptor, entry: &Entry<'_>) -> Result<TypeDescriptor> {
        Ok(match self.name(entry) {
            Some(name) => desc.with_name(&name),
            None => desc,
        })
    }

    fn referencing(&self, desc: TypeDescriptor, entry: &Entry<'_>) -> Result<TypeDescriptor> {
        Ok(match self.type_ref(entry)? {
            Some(target) => desc.with_referenced(target),
            None => desc,
        })
    }

    fn name(&self, entry: &Entry<'_>) -> Option<String> {
        let attr = entry.attr(gimli::DW_AT_name).ok().flatten()?;
        read_attr_string(self.dwarf, self.unit, &attr)
    }

    /// DW_AT_type of `entry`. references into other units map to ids that
    /// never resolve in this one.
    fn type_ref(&self, entry: &Entry<'_>) -> Result<Option<ForeignId>> {
        Ok(match entry.attr_value(gimli::DW_AT_type)? {
            Some(AttributeValue::UnitRef(offset)) => Some(ForeignId(offset.0.into_u64())),
            Some(AttributeValue::DebugInfoRef(offset)) => {
                Some(match offset.to_unit_offset(&self.unit.header) {
                    Some(local) => ForeignId(local.0.into_u64()),
                    None => ForeignId(FOREIGN_UNIT_BIT | offset.0.into_u64()),
                })
            }
            Some(other) => {
                log::trace!(
                    "unsupported type reference form at {:#010x}: {:?}",
                    entry.offset().0.into_u64(),
                    other
                );
                Some(ForeignId(FOREIGN_UNIT_BIT))
            }
            None => None,
        })
    }

    fn size_bits(&self, entry: &Entry<'_>) -> Result<Option<u64>> {
        if let Some(bits) = entry
            .attr_value(gimli::DW_AT_bit_size)?
            .and_then(|value| value.udata_value())
        {
            return Ok(Some(bits));
        }
        Ok(entry
            .attr_value(gimli::DW_AT_byte_size)?
            .and_then(|value| value.udata_value())
            .map(|bytes| bytes * 8))
    }

    fn align_bits(&self, entry: &Entry<'_>) -> Result<Option<u64>> {
        Ok(entry
            .attr_value(gimli::DW_AT_alignment)?
            .and_then(|value| value.udata_value())
            .map(|bytes| bytes * 8))
    }
}

/// bit offset of a DWARF 2-4 bitfield. `bit_offset` counts from the most
/// significant bit of a storage unit of `storage_bits` that starts at byte
/// `location`; on little-endian targets that bit is the highest address.
fn bitfield_offset(
    location: u64,
    storage_bits: Option<u64>,
    bit_offset: u64,
    bit_size: u64,
    big_endian: bool,
) -> Option<u64> {
    let start = location.checked_mul(8)?;
    let within = if big_endian {
        bit_offset
    } else {
        storage_bits?.checked_sub(bit_offset)?.checked_sub(bit_size)?
    };
    start.checked_add(within)
}

/// inclusive upper bound of `count` elements starting at `lower_bound`
fn upper_from_count(lower_bound: i64, count: u64) -> Option<i64> {
    let last = i64::try_from(count.checked_sub(1)?).ok()?;
    lower_bound.checked_add(last)
}

fn base_encoding(ate: gimli::DwAte) -> BaseEncoding {
    match ate {
        gimli::DW_ATE_boolean => BaseEncoding::Boolean,
        gimli::DW_ATE_signed => BaseEncoding::Signed,
        gimli::DW_ATE_unsigned => BaseEncoding::Unsigned,
        gimli::DW_ATE_signed_char => BaseEncoding::SignedChar,
        gimli::DW_ATE_unsigned_char => BaseEncoding::UnsignedChar,
        gimli::DW_ATE_float => BaseEncoding::Float,
        other => BaseEncoding::Other(other.0),
    }
}

fn attr_flag_is_true(attr: Option<gimli::Attribute<DwarfReader>>) -> bool {
    let Some(attr) = attr else {
        return false;
    };

    match attr.value() {
        AttributeValue::Flag(flag) => flag,
        AttributeValue::Data1(value) => value != 0,
        AttributeValue::Data2(value) => value != 0,
        AttributeValue::Data4(value) => value != 0,
        AttributeValue::Data8(value) => value != 0,
        AttributeValue::Sdata(value) => value != 0,
        AttributeValue::Udata(value) => value != 0,
        _ => false,
    }
}

/// read a string attribute, inline or through .debug_str
fn read_attr_string(
    dwarf: &Dwarf<DwarfReader>,
    unit: &Unit<DwarfReader>,
    attr: &gimli::Attribute<DwarfReader>,
) -> Option<String> {
    let raw = match attr.value() {
        // DWARF 5 may inline strings
        AttributeValue::String(s) => s,
        value => dwarf.attr_string(unit, value).ok()?,
    };
    match raw.to_string_lossy() {
        Ok(cow) => Some(cow.to_string()),
        Err(e) => {
            log::warn!("failed to decode string attribute: {:?}", e);
            None
        }
    }
}

/// a loaded binary whose DWARF type entries become a corpus
pub struct Analyzer {
    data: Vec<u8>,
}

impl Analyzer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// load the binary from file path
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let data = reader::load_file(path)?;
        Ok(Self::new(data))
    }

    /// one unit per compilation unit, each built and canonicalized in order
    pub fn load_corpus(&self, options: CorpusOptions) -> Result<Corpus> {
        let section_loader = reader::object_section_loader(&self.data)?;
        let dwarf = Dwarf::load(section_loader)?;
        log::debug!("DWARF data load success");

        let mut corpus = Corpus::new(options);
        let mut headers = dwarf.units();
        let mut unit_count = 0;

        while let Some(header) = headers.next()? {
            unit_count += 1;
            let unit = dwarf.unit(header)?;
            let name = unit
                .name
                .as_ref()
                .and_then(|name| name.to_string_lossy().ok().map(|cow| cow.to_string()))
                .unwrap_or_else(|| format!("<unit {unit_count}>"));
            log::debug!("processing compilation unit {}: {}", unit_count, name);

            let table = UnitDescriptors::read(&dwarf, &unit)?;
            let id = corpus.add_unit(name, &table, table.ids())?;
            corpus.canonicalize_unit(id)?;
        }

        log::info!(
            "processed {} compilation units, {} canonical types",
            unit_count,
            corpus.context().table().len()
        );
        Ok(corpus)
    }
}
