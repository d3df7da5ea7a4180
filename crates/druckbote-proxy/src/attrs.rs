// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Attribute bundle handling: the device capability set mirrored to the
// infrastructure printer, plus small helpers for picking values out of
// IPP responses.

use std::collections::BTreeMap;

use ipp::prelude::*;

/// Resolution units value for dots-per-inch.
pub const RES_PER_INCH: i8 = 3;

/// An ordered bundle of printer attributes, keyed by attribute name.
///
/// This is the proxy's representation of the output device's capability
/// set: what the probe returns, what registration mirrors to the remote
/// service, and what the relay worker consults for format selection.
#[derive(Debug, Clone, Default)]
pub struct DeviceAttributes {
    attrs: BTreeMap<String, IppValue>,
}

impl DeviceAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every printer-group attribute from an IPP response.
    pub fn from_response(response: &IppAttributes) -> Self {
        let mut bundle = Self::new();
        for group in response.groups_of(DelimiterTag::PrinterAttributes) {
            for (name, attr) in group.attributes() {
                bundle.attrs.insert(name.clone(), attr.value().clone());
            }
        }
        bundle
    }

    pub fn insert(&mut self, name: &str, value: IppValue) {
        self.attrs.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&IppValue> {
        self.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IppValue)> {
        self.attrs.iter()
    }

    /// Whether `document-format-supported` advertises the given MIME type.
    pub fn supports_format(&self, mime_type: &str) -> bool {
        self.get("document-format-supported")
            .map(|value| value_contains_string(value, mime_type))
            .unwrap_or(false)
    }

    /// Names and values that differ from a previously mirrored bundle.
    ///
    /// Against an empty cache everything differs, which is exactly the
    /// first-registration behavior.
    pub fn changed_since<'a>(&'a self, cached: &Self) -> Vec<(&'a str, &'a IppValue)> {
        self.attrs
            .iter()
            .filter(|(name, value)| {
                !cached
                    .get(name)
                    .map(|old| values_equal(old, value))
                    .unwrap_or(false)
            })
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }
}

/// Compare two attribute values for the mirroring diff.
///
/// Only integer, enum, boolean, and keyword values (and uniform arrays of
/// them) compare equal; all other value types are always re-sent.
pub fn values_equal(a: &IppValue, b: &IppValue) -> bool {
    match (a, b) {
        (IppValue::Integer(x), IppValue::Integer(y)) => x == y,
        (IppValue::Enum(x), IppValue::Enum(y)) => x == y,
        (IppValue::Boolean(x), IppValue::Boolean(y)) => x == y,
        (IppValue::Keyword(x), IppValue::Keyword(y)) => x == y,
        (IppValue::Array(xs), IppValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

/// Whether a keyword / mime-type value (or array of them) contains `needle`.
pub fn value_contains_string(value: &IppValue, needle: &str) -> bool {
    match value {
        IppValue::Keyword(s)
        | IppValue::MimeMediaType(s)
        | IppValue::TextWithoutLanguage(s)
        | IppValue::NameWithoutLanguage(s) => s == needle,
        IppValue::Array(values) => values.iter().any(|v| value_contains_string(v, needle)),
        _ => false,
    }
}

/// All string payloads of a keyword-ish value, in order.
pub fn value_strings(value: &IppValue) -> Vec<&str> {
    match value {
        IppValue::Keyword(s)
        | IppValue::MimeMediaType(s)
        | IppValue::TextWithoutLanguage(s)
        | IppValue::NameWithoutLanguage(s)
        | IppValue::Uri(s) => vec![s.as_str()],
        IppValue::Array(values) => values.iter().flat_map(value_strings).collect(),
        _ => Vec::new(),
    }
}

/// First integer payload of an integer or enum value.
pub fn value_integer(value: &IppValue) -> Option<i32> {
    match value {
        IppValue::Integer(n) | IppValue::Enum(n) => Some(*n),
        IppValue::Array(values) => values.first().and_then(value_integer),
        _ => None,
    }
}

/// Find an attribute by name anywhere in a response.
pub fn find_attr<'a>(response: &'a IppAttributes, name: &str) -> Option<&'a IppAttribute> {
    response
        .groups()
        .iter()
        .find_map(|group| group.attributes().get(name))
}

/// Integer value of a named attribute anywhere in a response.
pub fn find_integer(response: &IppAttributes, name: &str) -> Option<i32> {
    find_attr(response, name).and_then(|attr| value_integer(attr.value()))
}

/// First string payload of a named attribute anywhere in a response.
pub fn find_string<'a>(response: &'a IppAttributes, name: &str) -> Option<&'a str> {
    find_attr(response, name).and_then(|attr| value_strings(attr.value()).into_iter().next())
}

/// First collection payload of a value, looking through 1setOf wrappers.
pub fn first_collection(value: &IppValue) -> Option<&[IppValue]> {
    match value {
        IppValue::Collection(members) => Some(members),
        IppValue::Array(values) => values.first().and_then(first_collection),
        _ => None,
    }
}

/// Look up a member value inside a collection.
///
/// Collection members are encoded as a member-attribute name followed by
/// its value.
pub fn collection_member<'a>(members: &'a [IppValue], name: &str) -> Option<&'a IppValue> {
    let mut values = members.iter();
    while let Some(value) = values.next() {
        if let IppValue::MemberAttrName(member) = value
            && member == name
        {
            return values.next();
        }
    }
    None
}

/// Build a collection value from member name/value pairs.
pub fn collection(members: Vec<(&str, IppValue)>) -> IppValue {
    let mut values = Vec::with_capacity(members.len() * 2);
    for (name, value) in members {
        values.push(IppValue::MemberAttrName(name.to_string()));
        values.push(value);
    }
    IppValue::Collection(values)
}

/// Build a media-size collection in hundredths of millimeters.
pub fn media_size(width: i32, length: i32) -> IppValue {
    collection(vec![
        ("x-dimension", IppValue::Integer(width)),
        ("y-dimension", IppValue::Integer(length)),
    ])
}

/// Build a media-col collection for a self-describing media entry.
pub fn media_col(media: &str, width: i32, length: i32, margins: i32) -> IppValue {
    collection(vec![
        ("media-key", IppValue::Keyword(media.to_string())),
        ("media-size", media_size(width, length)),
        ("media-size-name", IppValue::Keyword(media.to_string())),
        ("media-bottom-margin", IppValue::Integer(margins)),
        ("media-left-margin", IppValue::Integer(margins)),
        ("media-right-margin", IppValue::Integer(margins)),
        ("media-top-margin", IppValue::Integer(margins)),
    ])
}
