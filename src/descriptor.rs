//! Photoshop descriptor structures.
//!
//! Descriptors are the format's generic typed-dictionary encoding; smart
//! object placement and warp parameters are persisted as one inside the
//! `SoLd`/`PlLd` tagged blocks.
//!
//! | Length   | Description                                                                                |
//! |----------|--------------------------------------------------------------------------------------------|
//! | Variable | Unicode string: name from classID                                                          |
//! | Variable | classID: 4 bytes (length), followed either by string or (if length is zero) 4-byte classID |
//! | 4        | Number of items in descriptor                                                              |
//! | per item | Key (as classID above), OSType (4 bytes), then the typed payload                           |

use std::io::{Seek, Write};

use crate::error::{PsdError, Result};
use crate::sections::{PsdBuffer, PsdCursor, PsdSerialize};

/// 'obj ' = Reference
const OS_TYPE_REFERENCE: [u8; 4] = *b"obj ";
/// 'Objc' = Descriptor
const OS_TYPE_DESCRIPTOR: [u8; 4] = *b"Objc";
/// 'VlLs' = List
const OS_TYPE_LIST: [u8; 4] = *b"VlLs";
/// 'doub' = Double
const OS_TYPE_DOUBLE: [u8; 4] = *b"doub";
/// 'UntF' = Unit float
const OS_TYPE_UNIT_FLOAT: [u8; 4] = *b"UntF";
/// 'TEXT' = String
const OS_TYPE_TEXT: [u8; 4] = *b"TEXT";
/// 'enum' = Enumerated
const OS_TYPE_ENUMERATED: [u8; 4] = *b"enum";
/// 'long' = Integer
const OS_TYPE_INTEGER: [u8; 4] = *b"long";
/// 'comp' = Large Integer
const OS_TYPE_LARGE_INTEGER: [u8; 4] = *b"comp";
/// 'bool' = Boolean
const OS_TYPE_BOOL: [u8; 4] = *b"bool";
/// 'GlbO' = GlobalObject, same as Descriptor
const OS_TYPE_GLOBAL_OBJECT: [u8; 4] = *b"GlbO";
/// 'type' = Class
const OS_TYPE_CLASS: [u8; 4] = *b"type";
/// 'GlbC' = Class
const OS_TYPE_GLOBAL_CLASS: [u8; 4] = *b"GlbC";
/// 'alis' = Alias
const OS_TYPE_ALIAS: [u8; 4] = *b"alis";
/// 'tdta' = Raw Data
const OS_TYPE_RAW_DATA: [u8; 4] = *b"tdta";

/// 'prop' = Property (reference item)
const OS_TYPE_PROPERTY: [u8; 4] = *b"prop";
/// 'Clss' = Class (reference item)
const OS_TYPE_REFERENCE_CLASS: [u8; 4] = *b"Clss";
/// 'Enmr' = Enumerated reference
const OS_TYPE_ENUMERATED_REFERENCE: [u8; 4] = *b"Enmr";
/// 'rele' = Offset
const OS_TYPE_OFFSET: [u8; 4] = *b"rele";
/// 'Idnt' = Identifier
const OS_TYPE_IDENTIFIER: [u8; 4] = *b"Idnt";
/// 'indx' = Index
const OS_TYPE_INDEX: [u8; 4] = *b"indx";
/// 'name' = Name
const OS_TYPE_NAME: [u8; 4] = *b"name";

/// A descriptor: a named class with an ordered list of keyed fields.
///
/// Field order is preserved so a re-written descriptor keeps the layout it
/// was read with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Descriptor {
    /// Unicode name from classID
    pub name: String,
    /// 4-byte classID or a longer registry key
    pub class_id: Vec<u8>,
    /// The keyed fields in file order
    pub fields: Vec<(String, DescriptorField)>,
}

impl Descriptor {
    /// An empty descriptor with a 4-byte class id.
    pub fn new(class_id: &[u8]) -> Descriptor {
        Descriptor {
            name: String::new(),
            class_id: class_id.to_vec(),
            fields: Vec::new(),
        }
    }

    /// Append a field, keeping insertion order.
    pub fn insert(&mut self, key: &str, field: DescriptorField) {
        self.fields.push((key.to_string(), field));
    }

    /// The first field stored under `key`.
    pub fn get(&self, key: &str) -> Option<&DescriptorField> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, field)| field)
    }

    /// The field under `key` as an f64, accepting the three numeric
    /// encodings Photoshop uses interchangeably.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            DescriptorField::Double(value) => Some(*value),
            DescriptorField::UnitFloat(unit) => Some(unit.value()),
            DescriptorField::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Parse a descriptor from the cursor.
    pub(crate) fn read(cursor: &mut PsdCursor<'_>) -> Result<Descriptor> {
        let name = cursor.read_unicode_string()?;
        let class_id = read_key(cursor)?;

        let count = cursor.read_u32()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = read_key(cursor)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            fields.push((key, DescriptorField::read(cursor)?));
        }

        Ok(Descriptor {
            name,
            class_id,
            fields,
        })
    }
}

impl PsdSerialize for Descriptor {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        buffer.write_unicode_string(&self.name)?;
        write_key(buffer, &self.class_id)?;
        buffer.write_u32(self.fields.len() as u32)?;
        for (key, field) in &self.fields {
            write_key(buffer, key.as_bytes())?;
            field.write(buffer)?;
        }
        Ok(())
    }
}

/// One field of a descriptor, tagged by its OSType.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorField {
    /// 'Objc': a nested descriptor
    Descriptor(Descriptor),
    /// 'obj ': a list of reference items
    Reference(Vec<DescriptorField>),
    /// 'UntF': a double with a unit
    UnitFloat(UnitFloat),
    /// 'doub'
    Double(f64),
    /// 'type' / 'GlbC' / 'Clss': a named class
    Class {
        /// Which of the three class OSTypes carried it
        os_type: [u8; 4],
        /// Unicode name
        name: String,
        /// classID key
        class_id: Vec<u8>,
    },
    /// 'TEXT'
    String(String),
    /// 'enum': a typed enumeration value
    Enumerated {
        /// TypeID key
        type_id: Vec<u8>,
        /// Enum value key
        value: Vec<u8>,
    },
    /// 'Enmr' (reference item)
    EnumeratedReference {
        /// Unicode name
        name: String,
        /// classID key
        class_id: Vec<u8>,
        /// TypeID key
        type_id: Vec<u8>,
        /// Enum value key
        value: Vec<u8>,
    },
    /// 'rele' (reference item)
    Offset {
        /// Unicode name
        name: String,
        /// classID key
        class_id: Vec<u8>,
        /// Offset value
        offset: u32,
    },
    /// 'prop' (reference item)
    Property {
        /// Unicode name
        name: String,
        /// classID key
        class_id: Vec<u8>,
        /// keyID key
        key_id: Vec<u8>,
    },
    /// 'name' (reference item)
    Name {
        /// Unicode name
        name: String,
        /// classID key
        class_id: Vec<u8>,
        /// Unicode value
        value: String,
    },
    /// 'Idnt' (reference item)
    Identifier(i32),
    /// 'indx' (reference item)
    Index(i32),
    /// 'bool'
    Boolean(bool),
    /// 'alis': opaque platform alias bytes
    Alias(Vec<u8>),
    /// 'VlLs'
    List(Vec<DescriptorField>),
    /// 'comp'
    LargeInteger(i64),
    /// 'long'
    Integer(i32),
    /// 'tdta': length-prefixed raw bytes
    RawData(Vec<u8>),
}

impl DescriptorField {
    fn read(cursor: &mut PsdCursor<'_>) -> Result<DescriptorField> {
        let os_type = cursor.read_4()?;

        let field = match os_type {
            OS_TYPE_DESCRIPTOR | OS_TYPE_GLOBAL_OBJECT => {
                DescriptorField::Descriptor(Descriptor::read(cursor)?)
            }
            OS_TYPE_REFERENCE => DescriptorField::Reference(read_reference(cursor)?),
            OS_TYPE_LIST => {
                let count = cursor.read_u32()?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(DescriptorField::read(cursor)?);
                }
                DescriptorField::List(items)
            }
            OS_TYPE_DOUBLE => DescriptorField::Double(cursor.read_f64()?),
            OS_TYPE_UNIT_FLOAT => DescriptorField::UnitFloat(UnitFloat::read(cursor)?),
            OS_TYPE_TEXT => DescriptorField::String(cursor.read_unicode_string()?),
            OS_TYPE_ENUMERATED => DescriptorField::Enumerated {
                type_id: read_key(cursor)?,
                value: read_key(cursor)?,
            },
            OS_TYPE_LARGE_INTEGER => DescriptorField::LargeInteger(cursor.read_u64()? as i64),
            OS_TYPE_INTEGER => DescriptorField::Integer(cursor.read_i32()?),
            OS_TYPE_BOOL => DescriptorField::Boolean(cursor.read_u8()? != 0),
            OS_TYPE_CLASS | OS_TYPE_GLOBAL_CLASS => DescriptorField::Class {
                os_type,
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
            },
            OS_TYPE_ALIAS => {
                let length = cursor.read_u32()?;
                DescriptorField::Alias(cursor.read(length as u64)?.to_vec())
            }
            OS_TYPE_RAW_DATA => {
                let length = cursor.read_u32()?;
                DescriptorField::RawData(cursor.read(length as u64)?.to_vec())
            }
            other => {
                return Err(PsdError::InvalidSignature {
                    location: "descriptor field OSType",
                    found: other,
                })
            }
        };

        Ok(field)
    }
}

impl PsdSerialize for DescriptorField {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        match self {
            DescriptorField::Descriptor(descriptor) => {
                buffer.write(OS_TYPE_DESCRIPTOR)?;
                descriptor.write(buffer)
            }
            DescriptorField::Reference(items) => {
                buffer.write(OS_TYPE_REFERENCE)?;
                write_reference(buffer, items)
            }
            DescriptorField::List(items) => {
                buffer.write(OS_TYPE_LIST)?;
                buffer.write_u32(items.len() as u32)?;
                for item in items {
                    item.write(buffer)?;
                }
                Ok(())
            }
            DescriptorField::Double(value) => {
                buffer.write(OS_TYPE_DOUBLE)?;
                buffer.write_f64(*value)
            }
            DescriptorField::UnitFloat(unit) => {
                buffer.write(OS_TYPE_UNIT_FLOAT)?;
                unit.write(buffer)
            }
            DescriptorField::String(text) => {
                buffer.write(OS_TYPE_TEXT)?;
                buffer.write_unicode_string(text)
            }
            DescriptorField::Enumerated { type_id, value } => {
                buffer.write(OS_TYPE_ENUMERATED)?;
                write_key(buffer, type_id)?;
                write_key(buffer, value)
            }
            DescriptorField::LargeInteger(value) => {
                buffer.write(OS_TYPE_LARGE_INTEGER)?;
                buffer.write_u64(*value as u64)
            }
            DescriptorField::Integer(value) => {
                buffer.write(OS_TYPE_INTEGER)?;
                buffer.write_i32(*value)
            }
            DescriptorField::Boolean(value) => {
                buffer.write(OS_TYPE_BOOL)?;
                buffer.write_u8(*value as u8)
            }
            DescriptorField::Class {
                os_type,
                name,
                class_id,
            } => {
                buffer.write(os_type)?;
                buffer.write_unicode_string(name)?;
                write_key(buffer, class_id)
            }
            DescriptorField::Alias(data) => {
                buffer.write(OS_TYPE_ALIAS)?;
                buffer.write_u32(data.len() as u32)?;
                buffer.write(data)
            }
            DescriptorField::RawData(data) => {
                buffer.write(OS_TYPE_RAW_DATA)?;
                buffer.write_u32(data.len() as u32)?;
                buffer.write(data)
            }
            DescriptorField::Property {
                name,
                class_id,
                key_id,
            } => {
                buffer.write(OS_TYPE_PROPERTY)?;
                buffer.write_unicode_string(name)?;
                write_key(buffer, class_id)?;
                write_key(buffer, key_id)
            }
            DescriptorField::EnumeratedReference {
                name,
                class_id,
                type_id,
                value,
            } => {
                buffer.write(OS_TYPE_ENUMERATED_REFERENCE)?;
                buffer.write_unicode_string(name)?;
                write_key(buffer, class_id)?;
                write_key(buffer, type_id)?;
                write_key(buffer, value)
            }
            DescriptorField::Offset {
                name,
                class_id,
                offset,
            } => {
                buffer.write(OS_TYPE_OFFSET)?;
                buffer.write_unicode_string(name)?;
                write_key(buffer, class_id)?;
                buffer.write_u32(*offset)
            }
            DescriptorField::Name {
                name,
                class_id,
                value,
            } => {
                buffer.write(OS_TYPE_NAME)?;
                buffer.write_unicode_string(name)?;
                write_key(buffer, class_id)?;
                buffer.write_unicode_string(value)
            }
            DescriptorField::Identifier(value) => {
                buffer.write(OS_TYPE_IDENTIFIER)?;
                buffer.write_i32(*value)
            }
            DescriptorField::Index(value) => {
                buffer.write(OS_TYPE_INDEX)?;
                buffer.write_i32(*value)
            }
        }
    }
}

/// A double tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitFloat {
    /// '#Ang' base degrees
    Angle(f64),
    /// '#Rsl' base per inch
    Density(f64),
    /// '#Rlt' base 72ppi
    Distance(f64),
    /// '#Nne' coerced
    None,
    /// '#Prc' unit value
    Percent(f64),
    /// '#Pxl' tagged unit value
    Pixels(f64),
}

impl UnitFloat {
    /// The carried value; `None` yields 0.
    pub fn value(self) -> f64 {
        match self {
            UnitFloat::Angle(value)
            | UnitFloat::Density(value)
            | UnitFloat::Distance(value)
            | UnitFloat::Percent(value)
            | UnitFloat::Pixels(value) => value,
            UnitFloat::None => 0.0,
        }
    }

    fn read(cursor: &mut PsdCursor<'_>) -> Result<UnitFloat> {
        let unit = cursor.read_4()?;
        Ok(match &unit {
            b"#Ang" => UnitFloat::Angle(cursor.read_f64()?),
            b"#Rsl" => UnitFloat::Density(cursor.read_f64()?),
            b"#Rlt" => UnitFloat::Distance(cursor.read_f64()?),
            b"#Nne" => UnitFloat::None,
            b"#Prc" => UnitFloat::Percent(cursor.read_f64()?),
            b"#Pxl" => UnitFloat::Pixels(cursor.read_f64()?),
            _ => {
                return Err(PsdError::InvalidSignature {
                    location: "unit float",
                    found: unit,
                })
            }
        })
    }
}

impl PsdSerialize for UnitFloat {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        let (unit, value) = match self {
            UnitFloat::Angle(value) => (*b"#Ang", Some(*value)),
            UnitFloat::Density(value) => (*b"#Rsl", Some(*value)),
            UnitFloat::Distance(value) => (*b"#Rlt", Some(*value)),
            UnitFloat::None => (*b"#Nne", None),
            UnitFloat::Percent(value) => (*b"#Prc", Some(*value)),
            UnitFloat::Pixels(value) => (*b"#Pxl", Some(*value)),
        };
        buffer.write(unit)?;
        if let Some(value) = value {
            buffer.write_f64(value)?;
        }
        Ok(())
    }
}

/// Reference items: a counted list of typed items.
fn read_reference(cursor: &mut PsdCursor<'_>) -> Result<Vec<DescriptorField>> {
    let count = cursor.read_u32()?;
    let mut items = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let os_type = cursor.read_4()?;
        items.push(match os_type {
            OS_TYPE_PROPERTY => DescriptorField::Property {
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
                key_id: read_key(cursor)?,
            },
            OS_TYPE_REFERENCE_CLASS => DescriptorField::Class {
                os_type,
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
            },
            OS_TYPE_ENUMERATED_REFERENCE => DescriptorField::EnumeratedReference {
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
                type_id: read_key(cursor)?,
                value: read_key(cursor)?,
            },
            OS_TYPE_OFFSET => DescriptorField::Offset {
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
                offset: cursor.read_u32()?,
            },
            OS_TYPE_IDENTIFIER => DescriptorField::Identifier(cursor.read_i32()?),
            OS_TYPE_INDEX => DescriptorField::Index(cursor.read_i32()?),
            OS_TYPE_NAME => DescriptorField::Name {
                name: cursor.read_unicode_string()?,
                class_id: read_key(cursor)?,
                value: cursor.read_unicode_string()?,
            },
            other => {
                return Err(PsdError::InvalidSignature {
                    location: "descriptor reference item",
                    found: other,
                })
            }
        });
    }

    Ok(items)
}

fn write_reference<W: Write + Seek>(
    buffer: &mut PsdBuffer<W>,
    items: &[DescriptorField],
) -> Result<()> {
    buffer.write_u32(items.len() as u32)?;
    for item in items {
        match item {
            DescriptorField::Property { .. }
            | DescriptorField::Class { .. }
            | DescriptorField::EnumeratedReference { .. }
            | DescriptorField::Offset { .. }
            | DescriptorField::Identifier(_)
            | DescriptorField::Index(_)
            | DescriptorField::Name { .. } => item.write(buffer)?,
            other => {
                return Err(PsdError::InvalidArgument(format!(
                    "{:?} cannot appear inside a descriptor reference",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// A 4-byte key, or a longer one prefixed with its length.
fn read_key<'a>(cursor: &mut PsdCursor<'a>) -> Result<Vec<u8>> {
    let length = cursor.read_u32()?;
    let length = if length > 0 { length } else { 4 };
    Ok(cursor.read(length as u64)?.to_vec())
}

fn write_key<W: Write + Seek>(buffer: &mut PsdBuffer<W>, key: &[u8]) -> Result<()> {
    if key.len() == 4 {
        buffer.write_u32(0)?;
    } else {
        buffer.write_u32(key.len() as u32)?;
    }
    buffer.write(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(descriptor: &Descriptor) -> Descriptor {
        let mut buffer = PsdBuffer::new();
        descriptor.write(&mut buffer).unwrap();
        let bytes = buffer.into_bytes();
        let mut cursor = PsdCursor::new(&bytes);
        let parsed = Descriptor::read(&mut cursor).unwrap();
        assert_eq!(cursor.remaining(), 0);
        parsed
    }

    #[test]
    fn scalar_fields_round_trip() {
        let mut descriptor = Descriptor::new(b"warp");
        descriptor.insert("wdth", DescriptorField::Double(512.0));
        descriptor.insert("hght", DescriptorField::Integer(256));
        descriptor.insert("vsbl", DescriptorField::Boolean(true));
        descriptor.insert("Nm  ", DescriptorField::String("smart".into()));
        descriptor.insert(
            "Angl",
            DescriptorField::UnitFloat(UnitFloat::Angle(45.0)),
        );

        assert_eq!(round_trip(&descriptor), descriptor);
    }

    #[test]
    fn nested_descriptor_and_list_round_trip() {
        let mut inner = Descriptor::new(b"Pnt ");
        inner.insert("Hrzn", DescriptorField::Double(1.5));
        inner.insert("Vrtc", DescriptorField::Double(-2.5));

        let mut descriptor = Descriptor::new(b"mesh");
        descriptor.insert(
            "pts ",
            DescriptorField::List(vec![
                DescriptorField::Descriptor(inner.clone()),
                DescriptorField::Descriptor(inner),
            ]),
        );
        descriptor.insert(
            "kind",
            DescriptorField::Enumerated {
                type_id: b"wrpS".to_vec(),
                value: b"cstm".to_vec(),
            },
        );

        assert_eq!(round_trip(&descriptor), descriptor);
    }

    #[test]
    fn long_keys_round_trip() {
        let mut descriptor = Descriptor::new(b"Objc");
        descriptor.insert("customLongKey", DescriptorField::Integer(7));
        assert_eq!(round_trip(&descriptor), descriptor);
    }

    #[test]
    fn field_order_is_preserved() {
        let mut descriptor = Descriptor::new(b"ordr");
        for key in ["bbbb", "aaaa", "cccc"] {
            descriptor.insert(key, DescriptorField::Integer(0));
        }
        let round_tripped = round_trip(&descriptor);
        let keys: Vec<&str> = round_tripped
            .fields
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, ["bbbb", "aaaa", "cccc"]);
    }

    #[test]
    fn unknown_os_type_is_an_error() {
        let mut buffer = PsdBuffer::new();
        buffer.write_unicode_string("").unwrap();
        buffer.write_u32(0).unwrap();
        buffer.write(*b"warp").unwrap();
        buffer.write_u32(1).unwrap();
        buffer.write_u32(0).unwrap();
        buffer.write(*b"key ").unwrap();
        buffer.write(*b"XXXX").unwrap(); // bogus OSType
        let bytes = buffer.into_bytes();

        let mut cursor = PsdCursor::new(&bytes);
        assert!(Descriptor::read(&mut cursor).is_err());
    }
}
