//! Spec-driven decoding of raw captures into named readings

use std::collections::BTreeMap;

use crate::frame::{assemble_payload, read_signed, Header, ProtocolVersion};
use crate::framing::{split_frames, SplitPolicy};
use crate::spec::{FieldSpec, PacketSpec, SpecCatalog};
use crate::types::ProtocolError;

/// Result mapping: device name -> field name -> formatted value
pub type Readings = BTreeMap<String, BTreeMap<String, String>>;

/// Counters for everything a decode run skipped
///
/// Skips are part of normal operation (partial boundary frames, versions
/// without a field layout, packets absent from the catalog); the counters
/// exist so callers can tell "quiet bus" apart from "nothing matched".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Candidate frames seen after splitting
    pub frames: usize,
    /// Frames too short for a header or their declared payload
    pub short_frames: usize,
    /// Frames with a protocol version other than 1
    pub unsupported_version: usize,
    /// Version 1 frames with no matching packet entry
    pub unmatched: usize,
    /// Fields whose offset fell outside the payload
    pub skipped_fields: usize,
}

/// Output of one decode run
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub readings: Readings,
    pub stats: DecodeStats,
}

/// The VBUS decoder
///
/// Holds the loaded catalog and a splitting policy; everything else is
/// per-call local state, so a decoder can be shared freely across threads.
/// Decoding never fails: malformed input simply contributes nothing.
pub struct Decoder {
    catalog: SpecCatalog,
    policy: SplitPolicy,
}

impl Decoder {
    /// Create a decoder that keeps every fragment (offline captures)
    #[must_use]
    pub fn new(catalog: SpecCatalog) -> Self {
        Self::with_policy(catalog, SplitPolicy::KeepAll)
    }

    /// Create a decoder with an explicit splitting policy
    #[must_use]
    pub fn with_policy(catalog: SpecCatalog, policy: SplitPolicy) -> Self {
        Self { catalog, policy }
    }

    #[must_use]
    pub fn catalog(&self) -> &SpecCatalog {
        &self.catalog
    }

    /// Decode a raw capture into named readings
    ///
    /// Matching a packet replaces any readings a previous frame produced
    /// for the same device name; the last matching frame in the capture
    /// wins. This mirrors how collectors have always merged snapshots and
    /// is relied on by downstream consumers.
    #[must_use]
    pub fn decode(&self, raw: &[u8]) -> Decoded {
        let mut out = Decoded::default();

        for frame in split_frames(raw, self.policy) {
            out.stats.frames += 1;

            let header = match Header::decode(frame) {
                Ok(header) => header,
                Err(e) => {
                    tracing::trace!("skipping frame: {e}");
                    out.stats.short_frames += 1;
                    continue;
                }
            };

            if header.version != ProtocolVersion::Pv1 {
                tracing::trace!(version = %header.version, "no field layout for version");
                out.stats.unsupported_version += 1;
                continue;
            }

            let payload = match assemble_payload(frame, header.frame_count) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::trace!("skipping frame: {e}");
                    out.stats.short_frames += 1;
                    continue;
                }
            };

            let Some(packet) = self.match_packet(&header) else {
                tracing::trace!(
                    source = %header.source_hex(),
                    destination = %header.destination_hex(),
                    command = %header.command_hex(),
                    "no packet entry for triplet"
                );
                out.stats.unmatched += 1;
                continue;
            };

            let device = self.resolve_device_name(&header.source_hex());
            let fields = extract_fields(packet, &payload, &mut out.stats);
            out.readings.insert(device, fields);
        }

        out
    }

    /// Find the first packet entry matching the header's triplet
    fn match_packet(&self, header: &Header) -> Option<&PacketSpec> {
        let source = header.source_hex();
        let destination = header.destination_hex();
        let command = header.command_hex();

        self.catalog.packets.iter().find(|packet| {
            canon_hex(&packet.source).eq_ignore_ascii_case(&source)
                && canon_hex(&packet.destination).eq_ignore_ascii_case(&destination)
                && canon_hex(&packet.command).eq_ignore_ascii_case(&command)
        })
    }

    /// Resolve a source address to a device name
    ///
    /// The first device whose address prefix matches wins. The mask decides
    /// how many leading digits identify the device family; the remaining
    /// digits are instance-specific and substituted for the `#` placeholder
    /// in the name template. An unknown source resolves to the empty string,
    /// which is still a usable map key.
    #[must_use]
    pub fn resolve_device_name(&self, source: &str) -> String {
        for device in &self.catalog.devices {
            let address = canon_hex(&device.address);
            let length = compare_length(&device.mask);
            if !prefix(source, length).eq_ignore_ascii_case(prefix(address, length)) {
                continue;
            }
            if length == 7 {
                return device.name.clone();
            }
            let suffix = address.get(length - 1..).unwrap_or("");
            return device.name.replacen('#', suffix, 1);
        }
        String::new()
    }
}

/// Number of leading address digits significant under a mask
///
/// Starting at index 1, the significant region extends while characters are
/// non-'0'; the result is that index plus one. Always at least 2, at most 7.
#[must_use]
pub fn compare_length(mask: &str) -> usize {
    let mask = mask.as_bytes();
    let mut i = 1;
    while i < 6 && mask.get(i).is_some_and(|&c| c != b'0') {
        i += 1;
    }
    i + 1
}

/// Strip an optional hex prefix from a catalog address or command string
fn canon_hex(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Truncate to at most `len` bytes, saturating at the string's end
fn prefix(s: &str, len: usize) -> &str {
    s.get(..len.min(s.len())).unwrap_or(s)
}

/// Extract every field of a matched packet from the payload
///
/// A field whose slice falls outside the payload is skipped; its siblings
/// still extract.
fn extract_fields(
    packet: &PacketSpec,
    payload: &[u8],
    stats: &mut DecodeStats,
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for field in &packet.fields {
        match extract_field(field, payload) {
            Ok(value) => {
                fields.insert(field.display_name().to_string(), value);
            }
            Err(e) => {
                tracing::trace!(field = field.display_name(), "skipping field: {e}");
                stats.skipped_fields += 1;
            }
        }
    }
    fields
}

/// Extract a single field: signed integer at offset, scaled and unit-tagged
///
/// A field without a factor reports the raw integer; a field with one
/// reports the scaled floating-point value. The unit follows the value with
/// no separator.
fn extract_field(field: &FieldSpec, payload: &[u8]) -> Result<String, ProtocolError> {
    let length = field.byte_length();
    let segment = field
        .offset
        .checked_add(length)
        .filter(|_| length <= 8)
        .and_then(|end| payload.get(field.offset..end))
        .ok_or(ProtocolError::FieldOutOfRange {
            offset: field.offset,
            length,
            payload_len: payload.len(),
        })?;

    let value = read_signed(segment);
    Ok(match field.factor {
        Some(factor) => format!("{:?}{}", value as f64 * factor, field.unit),
        None => format!("{}{}", value, field.unit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::SYNC_BYTE;

    fn demo_catalog() -> SpecCatalog {
        SpecCatalog::from_json_str(
            r#"{
            "vbusSpecification": {
                "device": [
                    {"address": "227100", "mask": "100000", "name": "DemoDevice"},
                    {"address": "4521ff", "mask": "110000", "name": "WMZ #"}
                ],
                "packet": [
                    {
                        "source": "0x2271",
                        "destination": "0x0010",
                        "command": "0x0100",
                        "field": [
                            {"name": ["Temp"], "offset": 0, "bitSize": 15,
                             "factor": "0.1", "unit": "°C"},
                            {"name": ["Hours"], "offset": 2, "bitSize": 15}
                        ]
                    },
                    {
                        "source": "0x2271",
                        "destination": "0x0015",
                        "command": "0x0100",
                        "field": [
                            {"name": ["Power"], "offset": 0, "bitSize": 15, "unit": "W"}
                        ]
                    }
                ]
            }
        }"#,
        )
        .unwrap()
    }

    /// Build a version 1 frame: header + sub-frames, without the sync byte
    fn build_frame(
        destination: u16,
        source: u16,
        command: u16,
        data: &[[u8; 4]],
    ) -> Vec<u8> {
        let dest = destination.to_le_bytes();
        let src = source.to_le_bytes();
        let cmd = command.to_le_bytes();
        let mut frame = vec![
            dest[0],
            dest[1],
            src[0],
            src[1],
            0x10,
            cmd[0],
            cmd[1],
            data.len() as u8,
            0x00,
        ];
        for group in data {
            // Data bytes must stay below 0x80 here; septet stays zero
            frame.extend_from_slice(group);
            frame.push(0x00);
            frame.push(0x00);
        }
        frame
    }

    fn wrap(frame: &[u8]) -> Vec<u8> {
        let mut raw = vec![SYNC_BYTE];
        raw.extend_from_slice(frame);
        raw
    }

    #[test]
    fn test_compare_length() {
        assert_eq!(compare_length("100000"), 2);
        assert_eq!(compare_length("110000"), 3);
        // Stops at the first '0' after index 1, later digits are ignored
        assert_eq!(compare_length("100001"), 2);
        assert_eq!(compare_length("111111"), 7);
    }

    #[test]
    fn test_resolve_device_name() {
        let decoder = Decoder::new(demo_catalog());
        assert_eq!(decoder.resolve_device_name("2271"), "DemoDevice");
        // Case-insensitive prefix match
        assert_eq!(decoder.resolve_device_name("22FF"), "DemoDevice");
        assert_eq!(decoder.resolve_device_name("9999"), "");
    }

    #[test]
    fn test_resolve_device_name_template_substitution() {
        let decoder = Decoder::new(demo_catalog());
        // Mask "110000" compares 3 digits; '#' takes the address from digit 3 on
        assert_eq!(decoder.resolve_device_name("4520"), "WMZ 21ff");
    }

    #[test]
    fn test_decode_end_to_end() {
        let decoder = Decoder::new(demo_catalog());
        let frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        let decoded = decoder.decode(&wrap(&frame));

        let fields = &decoded.readings["DemoDevice"];
        assert_eq!(fields["Temp"], "10.0°C");
        // No factor: raw integer, no trailing ".0"
        assert_eq!(fields["Hours"], "0");
        assert_eq!(decoded.stats.frames, 1);
        assert_eq!(decoded.stats.skipped_fields, 0);
    }

    #[test]
    fn test_decode_negative_value() {
        let decoder = Decoder::new(demo_catalog());
        let mut frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x00, 0x00, 0x00, 0x00]]);
        // Set the high bit of payload byte 1 through the septet:
        // payload becomes [0x00, 0x80], which decodes to -32767
        frame[13] = 0b0010;
        let decoded = decoder.decode(&wrap(&frame));
        assert_eq!(decoded.readings["DemoDevice"]["Temp"], "-3276.7000000000003°C");
    }

    #[test]
    fn test_decode_unsupported_version() {
        let decoder = Decoder::new(demo_catalog());
        let mut frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        frame[4] = 0x40;
        let decoded = decoder.decode(&wrap(&frame));
        assert!(decoded.readings.is_empty());
        assert_eq!(decoded.stats.unsupported_version, 1);
    }

    #[test]
    fn test_decode_version_two_header_only() {
        let decoder = Decoder::new(demo_catalog());
        let mut frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        frame[4] = 0x20;
        let decoded = decoder.decode(&wrap(&frame));
        assert!(decoded.readings.is_empty());
        assert_eq!(decoded.stats.unsupported_version, 1);
    }

    #[test]
    fn test_decode_malformed_input() {
        let decoder = Decoder::new(demo_catalog());

        // No sync bytes at all
        let decoded = decoder.decode(b"hello world");
        assert!(decoded.readings.is_empty());

        // Frames shorter than a header
        let decoded = decoder.decode(&[SYNC_BYTE, 0x01, 0x02, SYNC_BYTE, 0x03]);
        assert!(decoded.readings.is_empty());
        assert_eq!(decoded.stats.short_frames, 2);

        // Empty input
        assert!(decoder.decode(&[]).readings.is_empty());
    }

    #[test]
    fn test_decode_truncated_payload_contributes_nothing() {
        let decoder = Decoder::new(demo_catalog());
        let mut frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        frame[7] = 3; // claims 3 sub-frames, carries 1
        let decoded = decoder.decode(&wrap(&frame));
        assert!(decoded.readings.is_empty());
        assert_eq!(decoded.stats.short_frames, 1);
    }

    #[test]
    fn test_decode_field_out_of_range_is_tolerated() {
        let catalog = SpecCatalog::from_json_str(
            r#"{
            "vbusSpecification": {
                "device": [{"address": "227100", "mask": "100000", "name": "DemoDevice"}],
                "packet": [{
                    "source": "0x2271", "destination": "0x0010", "command": "0x0100",
                    "field": [
                        {"name": ["Good"], "offset": 0, "bitSize": 15},
                        {"name": ["Bad"], "offset": 40, "bitSize": 15}
                    ]
                }]
            }
        }"#,
        )
        .unwrap();
        let decoder = Decoder::new(catalog);
        let frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        let decoded = decoder.decode(&wrap(&frame));

        let fields = &decoded.readings["DemoDevice"];
        assert_eq!(fields["Good"], "100");
        assert!(!fields.contains_key("Bad"));
        assert_eq!(decoded.stats.skipped_fields, 1);
    }

    #[test]
    fn test_decode_later_match_replaces_earlier() {
        let decoder = Decoder::new(demo_catalog());
        let first = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        let second = build_frame(0x0015, 0x2271, 0x0100, &[[0x10, 0x00, 0x00, 0x00]]);

        let mut raw = wrap(&first);
        raw.extend_from_slice(&wrap(&second));
        let decoded = decoder.decode(&raw);

        // Both packets resolve to the same device name; the second frame's
        // fields replace the first's entirely.
        let fields = &decoded.readings["DemoDevice"];
        assert_eq!(fields["Power"], "16W");
        assert!(!fields.contains_key("Temp"));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let decoder = Decoder::new(demo_catalog());
        let frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);
        let raw = wrap(&frame);
        assert_eq!(decoder.decode(&raw).readings, decoder.decode(&raw).readings);
    }

    #[test]
    fn test_decode_drop_boundary_policy() {
        let decoder = Decoder::with_policy(demo_catalog(), SplitPolicy::DropBoundary);
        let frame = build_frame(0x0010, 0x2271, 0x0100, &[[0x64, 0x00, 0x00, 0x00]]);

        // Frame sits between two sync bytes with partial noise on both ends
        let mut raw = vec![0x13, 0x37, SYNC_BYTE];
        raw.extend_from_slice(&frame);
        raw.push(SYNC_BYTE);
        raw.extend_from_slice(&[0x10, 0x00]);

        let decoded = decoder.decode(&raw);
        assert_eq!(decoded.readings["DemoDevice"]["Temp"], "10.0°C");
        assert_eq!(decoded.stats.frames, 1);
    }
}
