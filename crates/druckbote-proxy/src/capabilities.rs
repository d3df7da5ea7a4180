// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device capability probe.
//
// IPP devices are queried for a fixed attribute whitelist; socket devices
// get a synthesized monochrome-laser bundle, since a raw PCL printer has
// nothing to ask. Apple-style `urf-supported` capability strings are
// translated into the equivalent PWG-raster attributes when the device
// does not advertise those itself.

use std::time::Duration;

use ipp::model::{IppVersion, Operation};
use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tracing::{error, info};

use druckbote_core::error::{DruckboteError, Result};
use druckbote_core::types::DeviceScheme;

use crate::attrs::{self, DeviceAttributes, RES_PER_INCH};
use crate::backoff::FibonacciBackoff;
use crate::session;

/// The printer attributes mirrored to the infrastructure printer. This
/// list is a protocol constant, not a tunable.
pub const PROBE_ATTRIBUTES: &[&str] = &[
    "copies-default",
    "copies-supported",
    "document-format-default",
    "document-format-supported",
    "finishings-col-database",
    "finishings-col-default",
    "finishings-col-ready",
    "finishings-col-supported",
    "finishings-default",
    "finishings-supported",
    "jpeg-k-octets-supported",
    "media-bottom-margin-supported",
    "media-col-database",
    "media-col-default",
    "media-col-ready",
    "media-col-supported",
    "media-default",
    "media-left-margin-supported",
    "media-ready",
    "media-right-margin-supported",
    "media-size-supported",
    "media-source-supported",
    "media-supported",
    "media-top-margin-supported",
    "media-type-supported",
    "pdf-k-octets-supported",
    "print-color-mode-default",
    "print-color-mode-supported",
    "print-darkness-default",
    "print-darkness-supported",
    "print-quality-default",
    "print-quality-supported",
    "print-scaling-default",
    "print-scaling-supported",
    "printer-darkness-configured",
    "printer-darkness-supported",
    "printer-resolution-default",
    "printer-resolution-supported",
    "printer-state",
    "printer-state-reasons",
    "pwg-raster-document-resolution-supported",
    "pwg-raster-document-sheet-back",
    "pwg-raster-document-type-supported",
    "sides-default",
    "sides-supported",
    "urf-supported",
];

/// Margin for the synthesized socket bundle, in hundredths of millimeters.
const SOCKET_MARGIN: i32 = 635;

/// Probe the local device for its capability bundle.
///
/// Transport failures against an IPP device are retried forever on the
/// Fibonacci schedule; an IPP error response yields an empty bundle. The
/// socket path cannot fail.
pub async fn probe_device(device_uri: &str, user: &str) -> Result<DeviceAttributes> {
    match DeviceScheme::parse(device_uri)? {
        DeviceScheme::Ipp | DeviceScheme::Ipps => probe_ipp_device(device_uri, user).await,
        DeviceScheme::Socket => Ok(socket_device_attributes()),
    }
}

/// Query an IPP device with Get-Printer-Attributes.
async fn probe_ipp_device(device_uri: &str, user: &str) -> Result<DeviceAttributes> {
    let uri: Uri = device_uri
        .parse()
        .map_err(|_| DruckboteError::InvalidUri(device_uri.to_string()))?;

    let mut backoff = FibonacciBackoff::new();
    let response = loop {
        let request = probe_request(&uri, user);
        match AsyncIppClient::new(uri.clone()).send(request).await {
            Ok(response) => break response,
            Err(err) => {
                let delay = backoff.next();
                info!(
                    "'{device_uri}' is not responding, retrying in {delay} seconds: {err}"
                );
                tokio::time::sleep(Duration::from_secs(delay as u64)).await;
            }
        }
    };

    if session::response_status(&response) >= session::status::BAD_REQUEST {
        error!(
            "device at '{device_uri}' returned error status 0x{:04x}",
            session::response_status(&response)
        );
        return Ok(DeviceAttributes::new());
    }

    let mut bundle = DeviceAttributes::from_response(response.attributes());
    translate_urf(&mut bundle);
    Ok(bundle)
}

fn probe_request(uri: &Uri, user: &str) -> IppRequestResponse {
    let mut request = IppRequestResponse::new(
        IppVersion::v2_0(),
        Operation::GetPrinterAttributes,
        Some(uri.clone()),
    );
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "requesting-user-name",
            IppValue::NameWithoutLanguage(user.to_string()),
        ),
    );
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "requested-attributes",
            IppValue::Array(
                PROBE_ATTRIBUTES
                    .iter()
                    .map(|name| IppValue::Keyword((*name).to_string()))
                    .collect(),
            ),
        ),
    );
    request
}

/// Synthesize `pwg-raster-document-*` attributes from `urf-supported`.
///
/// Only attributes the device does not already report are added, which
/// makes the translation idempotent.
pub fn translate_urf(bundle: &mut DeviceAttributes) {
    let Some(urf) = bundle.get("urf-supported") else {
        return;
    };
    let keywords: Vec<String> = attrs::value_strings(urf)
        .into_iter()
        .map(str::to_string)
        .collect();

    if !bundle.contains("pwg-raster-document-resolution-supported") {
        let mut resolutions = Vec::new();
        for keyword in keywords.iter().filter(|k| k.starts_with("RS")) {
            for dpi in keyword[2..].split('-').filter_map(|n| n.parse::<i32>().ok()) {
                resolutions.push(IppValue::Resolution {
                    cross_feed: dpi,
                    feed: dpi,
                    units: RES_PER_INCH,
                });
            }
        }
        if !resolutions.is_empty() {
            bundle.insert(
                "pwg-raster-document-resolution-supported",
                IppValue::Array(resolutions),
            );
        }
    }

    if !bundle.contains("pwg-raster-document-sheet-back") {
        for keyword in keywords.iter().filter(|k| k.starts_with("DM")) {
            let sheet_back = match keyword.as_str() {
                "DM1" => "normal",
                "DM2" => "flipped",
                "DM3" => "rotated",
                _ => "manual-tumble",
            };
            bundle.insert(
                "pwg-raster-document-sheet-back",
                IppValue::Keyword(sheet_back.to_string()),
            );
        }
    }

    if !bundle.contains("pwg-raster-document-type-supported") {
        let types: Vec<IppValue> = keywords
            .iter()
            .filter_map(|keyword| match keyword.as_str() {
                "ADOBERGB24" => Some("adobe-rgb_8"),
                "ADOBERGB48" => Some("adobe-rgb_16"),
                "SRGB24" => Some("srgb_8"),
                "W8" => Some("sgray_8"),
                "W16" => Some("sgray_16"),
                _ => None,
            })
            .map(|name| IppValue::Keyword(name.to_string()))
            .collect();
        if !types.is_empty() {
            bundle.insert("pwg-raster-document-type-supported", IppValue::Array(types));
        }
    }
}

/// Default capability bundle for a socket-attached HP PCL laser printer:
/// Letter/Legal/A4, 300 and 600 dpi, draft through high quality, duplex
/// on both edges, monochrome.
pub fn socket_device_attributes() -> DeviceAttributes {
    const MEDIA: [(&str, i32, i32); 3] = [
        ("na_letter_8.5x11in", 21590, 27940),
        ("na_legal_8.5x14in", 21590, 35560),
        ("iso_a4_210x297mm", 21000, 29700),
    ];

    let mut bundle = DeviceAttributes::new();

    bundle.insert("copies-supported", IppValue::RangeOfInteger { min: 1, max: 1 });
    bundle.insert(
        "document-format-supported",
        IppValue::MimeMediaType("application/vnd.hp-pcl".to_string()),
    );

    bundle.insert(
        "media-col-database",
        IppValue::Array(
            MEDIA
                .iter()
                .map(|(name, width, length)| attrs::media_col(name, *width, *length, SOCKET_MARGIN))
                .collect(),
        ),
    );
    let (default_media, default_width, default_length) = MEDIA[0];
    bundle.insert(
        "media-col-default",
        attrs::media_col(default_media, default_width, default_length, SOCKET_MARGIN),
    );
    bundle.insert(
        "media-col-ready",
        attrs::media_col(default_media, default_width, default_length, SOCKET_MARGIN),
    );
    bundle.insert(
        "media-col-supported",
        IppValue::Array(
            [
                "media-bottom-margin",
                "media-left-margin",
                "media-right-margin",
                "media-size",
                "media-size-name",
                "media-top-margin",
            ]
            .iter()
            .map(|name| IppValue::Keyword((*name).to_string()))
            .collect(),
        ),
    );
    bundle.insert(
        "media-default",
        IppValue::Keyword(default_media.to_string()),
    );
    bundle.insert("media-ready", IppValue::Keyword(default_media.to_string()));
    bundle.insert(
        "media-size-supported",
        IppValue::Array(
            MEDIA
                .iter()
                .map(|(_, width, length)| attrs::media_size(*width, *length))
                .collect(),
        ),
    );
    bundle.insert(
        "media-supported",
        IppValue::Array(
            MEDIA
                .iter()
                .map(|(name, _, _)| IppValue::Keyword((*name).to_string()))
                .collect(),
        ),
    );
    for margin in [
        "media-bottom-margin-supported",
        "media-left-margin-supported",
        "media-right-margin-supported",
        "media-top-margin-supported",
    ] {
        bundle.insert(margin, IppValue::Integer(SOCKET_MARGIN));
    }

    bundle.insert(
        "print-color-mode-default",
        IppValue::Keyword("monochrome".to_string()),
    );
    bundle.insert(
        "print-color-mode-supported",
        IppValue::Keyword("monochrome".to_string()),
    );

    // IPP print-quality: 3 = draft, 4 = normal, 5 = high.
    bundle.insert("print-quality-default", IppValue::Enum(4));
    bundle.insert(
        "print-quality-supported",
        IppValue::Array(vec![IppValue::Enum(3), IppValue::Enum(4), IppValue::Enum(5)]),
    );

    bundle.insert(
        "printer-resolution-default",
        IppValue::Resolution {
            cross_feed: 300,
            feed: 300,
            units: RES_PER_INCH,
        },
    );
    bundle.insert(
        "printer-resolution-supported",
        IppValue::Array(
            [300, 600]
                .iter()
                .map(|dpi| IppValue::Resolution {
                    cross_feed: *dpi,
                    feed: *dpi,
                    units: RES_PER_INCH,
                })
                .collect(),
        ),
    );

    bundle.insert("printer-state", IppValue::Enum(3));
    bundle.insert(
        "printer-state-reasons",
        IppValue::Keyword("none".to_string()),
    );

    bundle.insert(
        "sides-default",
        IppValue::Keyword("two-sided-long-edge".to_string()),
    );
    bundle.insert(
        "sides-supported",
        IppValue::Array(
            ["one-sided", "two-sided-long-edge", "two-sided-short-edge"]
                .iter()
                .map(|side| IppValue::Keyword((*side).to_string()))
                .collect(),
        ),
    );

    bundle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urf_bundle(keywords: &[&str]) -> DeviceAttributes {
        let mut bundle = DeviceAttributes::new();
        bundle.insert(
            "urf-supported",
            IppValue::Array(
                keywords
                    .iter()
                    .map(|k| IppValue::Keyword((*k).to_string()))
                    .collect(),
            ),
        );
        bundle
    }

    #[test]
    fn urf_resolutions_expand_per_value() {
        let mut bundle = urf_bundle(&["RS300-600", "DM3", "SRGB24", "W8"]);
        translate_urf(&mut bundle);

        let resolutions = bundle
            .get("pwg-raster-document-resolution-supported")
            .expect("resolutions synthesized");
        let IppValue::Array(values) = resolutions else {
            panic!("expected an array of resolutions");
        };
        assert_eq!(
            values,
            &vec![
                IppValue::Resolution {
                    cross_feed: 300,
                    feed: 300,
                    units: RES_PER_INCH
                },
                IppValue::Resolution {
                    cross_feed: 600,
                    feed: 600,
                    units: RES_PER_INCH
                },
            ]
        );
    }

    #[test]
    fn urf_sheet_back_and_types() {
        let mut bundle = urf_bundle(&["RS300-600", "DM3", "SRGB24", "W8"]);
        translate_urf(&mut bundle);

        assert_eq!(
            bundle.get("pwg-raster-document-sheet-back"),
            Some(&IppValue::Keyword("rotated".to_string()))
        );
        assert_eq!(
            bundle.get("pwg-raster-document-type-supported"),
            Some(&IppValue::Array(vec![
                IppValue::Keyword("srgb_8".to_string()),
                IppValue::Keyword("sgray_8".to_string()),
            ]))
        );
    }

    #[test]
    fn urf_translation_is_idempotent() {
        let mut once = urf_bundle(&["RS300-600", "DM2", "ADOBERGB24", "W16"]);
        translate_urf(&mut once);
        let mut twice = once.clone();
        translate_urf(&mut twice);

        let first: Vec<_> = once.iter().collect();
        let second: Vec<_> = twice.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn urf_translation_respects_native_pwg_attributes() {
        let mut bundle = urf_bundle(&["RS300", "DM1"]);
        bundle.insert(
            "pwg-raster-document-sheet-back",
            IppValue::Keyword("flipped".to_string()),
        );
        translate_urf(&mut bundle);

        // The device's own answer wins over the URF synthesis.
        assert_eq!(
            bundle.get("pwg-raster-document-sheet-back"),
            Some(&IppValue::Keyword("flipped".to_string()))
        );
    }

    #[test]
    fn unknown_duplex_keyword_means_manual_tumble() {
        let mut bundle = urf_bundle(&["DM4"]);
        translate_urf(&mut bundle);
        assert_eq!(
            bundle.get("pwg-raster-document-sheet-back"),
            Some(&IppValue::Keyword("manual-tumble".to_string()))
        );
    }

    #[test]
    fn socket_bundle_describes_a_pcl_laser() {
        let bundle = socket_device_attributes();
        assert!(bundle.supports_format("application/vnd.hp-pcl"));
        assert!(!bundle.supports_format("application/pdf"));
        assert_eq!(
            bundle.get("print-color-mode-supported"),
            Some(&IppValue::Keyword("monochrome".to_string()))
        );
        assert_eq!(bundle.get("printer-state"), Some(&IppValue::Enum(3)));
        assert_eq!(
            bundle.get("media-bottom-margin-supported"),
            Some(&IppValue::Integer(SOCKET_MARGIN))
        );

        let IppValue::Array(media) = bundle.get("media-supported").unwrap() else {
            panic!("media-supported must be multi-valued");
        };
        assert_eq!(media.len(), 3);
    }
}
