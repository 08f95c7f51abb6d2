use bytes::BufMut;

use crate::error::{NbtError, NbtResult};
use crate::tag::TagType;
use crate::value::NbtValue;

/// Write a network-form tag: type byte and nameless payload, or a single
/// end tag when the tree is absent.
///
/// The tree is validated before the first byte is written, so `out` is
/// untouched on error.
pub fn write_network(value: Option<&NbtValue>, out: &mut impl BufMut) -> NbtResult<()> {
    match value {
        Some(value) => {
            validate(value)?;
            out.put_u8(value.tag_type().id());
            write_payload(value, out);
        }
        None => out.put_u8(TagType::End.id()),
    }
    Ok(())
}

/// Write a file-form root: compound type byte, name, then the payload.
pub fn write_named(name: &str, value: &NbtValue, out: &mut impl BufMut) -> NbtResult<()> {
    if value.tag_type() != TagType::Compound {
        return Err(NbtError::RootNotCompound(value.tag_type().id()));
    }
    check_string(name)?;
    validate(value)?;
    out.put_u8(TagType::Compound.id());
    write_string(name, out);
    write_payload(value, out);
    Ok(())
}

fn check_string(s: &str) -> NbtResult<()> {
    if s.len() > u16::MAX as usize {
        return Err(NbtError::StringTooLong(s.len()));
    }
    Ok(())
}

fn check_len(len: usize) -> NbtResult<()> {
    if len > i32::MAX as usize {
        return Err(NbtError::LengthOverflow(len));
    }
    Ok(())
}

/// Reject trees that cannot be represented: over-long strings or arrays
/// and lists whose elements do not share one tag type.
fn validate(value: &NbtValue) -> NbtResult<()> {
    match value {
        NbtValue::String(s) => check_string(s),
        NbtValue::ByteArray(v) => check_len(v.len()),
        NbtValue::IntArray(v) => check_len(v.len()),
        NbtValue::LongArray(v) => check_len(v.len()),
        NbtValue::List(items) => {
            check_len(items.len())?;
            if let Some(first) = items.first() {
                let expected = first.tag_type();
                for item in items {
                    if item.tag_type() != expected {
                        return Err(NbtError::MixedList {
                            expected,
                            found: item.tag_type(),
                        });
                    }
                    validate(item)?;
                }
            }
            Ok(())
        }
        NbtValue::Compound(entries) => {
            for (name, value) in entries {
                check_string(name)?;
                validate(value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn write_payload(value: &NbtValue, out: &mut impl BufMut) {
    match value {
        NbtValue::Byte(v) => out.put_i8(*v),
        NbtValue::Short(v) => out.put_i16(*v),
        NbtValue::Int(v) => out.put_i32(*v),
        NbtValue::Long(v) => out.put_i64(*v),
        NbtValue::Float(v) => out.put_f32(*v),
        NbtValue::Double(v) => out.put_f64(*v),
        NbtValue::ByteArray(v) => {
            out.put_i32(v.len() as i32);
            v.iter().for_each(|b| out.put_i8(*b));
        }
        NbtValue::String(v) => write_string(v, out),
        NbtValue::List(items) => {
            let elem = items.first().map_or(TagType::End, NbtValue::tag_type);
            out.put_u8(elem.id());
            out.put_i32(items.len() as i32);
            for item in items {
                write_payload(item, out);
            }
        }
        NbtValue::Compound(entries) => {
            for (name, value) in entries {
                out.put_u8(value.tag_type().id());
                write_string(name, out);
                write_payload(value, out);
            }
            out.put_u8(TagType::End.id());
        }
        NbtValue::IntArray(v) => {
            out.put_i32(v.len() as i32);
            v.iter().for_each(|i| out.put_i32(*i));
        }
        NbtValue::LongArray(v) => {
            out.put_i32(v.len() as i32);
            v.iter().for_each(|l| out.put_i64(*l));
        }
    }
}

fn write_string(s: &str, out: &mut impl BufMut) {
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
}
