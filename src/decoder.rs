//! Frame decoder: identifier + payload → scaled group values.
//!
//! Decoding is a pure function. The result is a complete [`GroupReading`] that the snapshot
//! store swaps in as one unit; nothing is written field by field.
//!
//! | Group | Encoding |
//! |---|---|
//! | cells | 4 big-endian u16 words, millivolts |
//! | pack | 4 big-endian u16 words, decivolts / deciamps with a 30000 offset on currents |
//! | temperatures | 4 bytes, °C + 40 |
//! | status | bytes 0-4 and 7 as 1/160 units, bytes 5-6 one big-endian word (S6) |
//!
//! Payloads shorter than 8 bytes decode what is present. A voltage word whose low byte is
//! missing reads that byte as zero; values beyond the payload stay zero. A status frame that
//! ends at byte 5 decodes S6 from that single byte.

use tracing::trace;

use crate::types::{Frame, GroupId, GroupReading, PackReading};

/// Bus offset on pack currents (zero amps is encoded as 30000).
const CURRENT_OFFSET: f32 = 30000.0;

/// Bus offset on temperatures (0 °C is encoded as 40).
const TEMPERATURE_OFFSET: f32 = 40.0;

const MILLIVOLTS_PER_VOLT: f32 = 1000.0;
const PACK_SCALE: f32 = 10.0;
const STATUS_SCALE: f32 = 160.0;

/// Payload position of the two-byte S6 word.
const STATUS_WORD_POSITION: usize = 5;

/// A decoded group ready to be stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedGroup {
    pub group: GroupId,
    pub reading: GroupReading,
}

/// Decode a frame into its group reading.
///
/// Returns `None` for identifiers outside the known set.
pub fn decode(frame: &Frame) -> Option<DecodedGroup> {
    let Some(group) = frame.group() else {
        trace!("Ignoring unknown frame identifier {:#010X}", frame.identifier());
        return None;
    };

    let payload = frame.payload();
    let reading = match group {
        GroupId::Cells1 | GroupId::Cells2 | GroupId::Cells3 | GroupId::Cells4 => {
            GroupReading::Cells(decode_cells(payload))
        }
        GroupId::Pack => GroupReading::Pack(decode_pack(payload)),
        GroupId::Temperatures => GroupReading::Temperatures(decode_temperatures(payload)),
        GroupId::Status => GroupReading::Status(decode_status(payload)),
    };

    Some(DecodedGroup { group, reading })
}

/// Big-endian word starting at `position`, or `None` if its high byte is absent.
fn be_word(payload: &[u8], position: usize) -> Option<u16> {
    let high = *payload.get(position)?;
    let low = payload.get(position + 1).copied().unwrap_or(0);
    Some(u16::from_be_bytes([high, low]))
}

fn decode_cells(payload: &[u8]) -> [f32; 4] {
    let mut volts = [0.0; 4];
    for (cell, value) in volts.iter_mut().enumerate() {
        if let Some(word) = be_word(payload, cell * 2) {
            *value = word as f32 / MILLIVOLTS_PER_VOLT;
        }
    }
    volts
}

fn decode_pack(payload: &[u8]) -> PackReading {
    let mut values = [0.0; 4];
    for (index, value) in values.iter_mut().enumerate() {
        let Some(word) = be_word(payload, index * 2) else { continue };
        // Odd words are currents centred on the bus offset.
        *value = if index % 2 == 0 {
            word as f32 / PACK_SCALE
        } else {
            (word as f32 - CURRENT_OFFSET) / PACK_SCALE
        };
    }
    PackReading(values)
}

fn decode_temperatures(payload: &[u8]) -> [f32; 4] {
    let mut celsius = [0.0; 4];
    for (value, byte) in celsius.iter_mut().zip(payload) {
        *value = *byte as f32 - TEMPERATURE_OFFSET;
    }
    celsius
}

fn decode_status(payload: &[u8]) -> [f32; 7] {
    let mut values = [0.0; 7];
    let mut position = 0;
    let mut slot = 0;

    while position < payload.len() && slot < values.len() {
        if position == STATUS_WORD_POSITION {
            // S6 spans two payload bytes; S7 comes from the byte after them.
            values[slot] = match payload.get(position..position + 2) {
                Some(&[high, low]) => u16::from_be_bytes([high, low]) as f32 / STATUS_SCALE,
                _ => payload[position] as f32 / STATUS_SCALE,
            };
            position += 2;
        } else {
            values[slot] = payload[position] as f32 / STATUS_SCALE;
            position += 1;
        }
        slot += 1;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_group(group: GroupId, payload: &[u8]) -> GroupReading {
        let frame = Frame::for_group(group, payload).unwrap();
        let decoded = decode(&frame).expect("known group");
        assert_eq!(decoded.group, group);
        decoded.reading
    }

    #[test]
    fn cell_words_are_millivolts() {
        let reading = decode_group(
            GroupId::Cells2,
            &[0x0C, 0xE4, 0x0C, 0xE5, 0x0D, 0x00, 0x00, 0x00],
        );
        assert_eq!(reading, GroupReading::Cells([3.3, 3.301, 3.328, 0.0]));
    }

    #[test]
    fn short_cell_frame_zero_fills_trailing_byte() {
        // Seven bytes: the last word's low byte is missing.
        let reading = decode_group(
            GroupId::Cells1,
            &[0x0C, 0xE4, 0x0C, 0xE4, 0x0C, 0xE4, 0x0C],
        );
        assert_eq!(reading, GroupReading::Cells([3.3, 3.3, 3.3, 3.072]));
    }

    #[test]
    fn absent_cell_words_stay_zero() {
        let reading = decode_group(GroupId::Cells3, &[0x0F, 0xA0]);
        assert_eq!(reading, GroupReading::Cells([4.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn pack_currents_are_recentred() {
        // VT = 512.3 V, A = -12.5 A, V0 = 51.0 V, A2 = +2.0 A
        let payload = [
            0x14, 0x03, // 5123
            0x74, 0xB3, // 29875
            0x01, 0xFE, // 510
            0x75, 0x44, // 30020
        ];
        let GroupReading::Pack(pack) = decode_group(GroupId::Pack, &payload) else {
            panic!("expected pack reading");
        };
        assert_eq!(pack.voltage(), 512.3);
        assert_eq!(pack.current(), -12.5);
        assert_eq!(pack.output_voltage(), 51.0);
        assert_eq!(pack.secondary_current(), 2.0);
    }

    #[test]
    fn short_pack_frame_does_not_invent_negative_currents() {
        let GroupReading::Pack(pack) = decode_group(GroupId::Pack, &[0x01, 0xF4]) else {
            panic!("expected pack reading");
        };
        assert_eq!(pack.voltage(), 50.0);
        assert_eq!(pack.current(), 0.0);
        assert_eq!(pack.secondary_current(), 0.0);
    }

    #[test]
    fn temperature_offset() {
        let reading = decode_group(GroupId::Temperatures, &[40, 0, 65, 255]);
        assert_eq!(reading, GroupReading::Temperatures([0.0, -40.0, 25.0, 215.0]));
    }

    #[test]
    fn temperature_ignores_bytes_past_four() {
        let reading = decode_group(GroupId::Temperatures, &[41, 42, 43, 44, 99, 99, 99, 99]);
        assert_eq!(reading, GroupReading::Temperatures([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn status_word_spans_bytes_five_and_six() {
        let payload = [160, 80, 0, 16, 32, 0x01, 0x40, 240];
        let GroupReading::Status(values) = decode_group(GroupId::Status, &payload) else {
            panic!("expected status reading");
        };
        assert_eq!(values[..5], [1.0, 0.5, 0.0, 0.1, 0.2]);
        assert_eq!(values[5], 2.0);
        // S7 comes from byte 7, never from the 0x40 in byte 6.
        assert_eq!(values[6], 1.5);
    }

    #[test]
    fn status_without_byte_seven_leaves_s7_zero() {
        let payload = [0, 0, 0, 0, 0, 0x01, 0x40];
        let GroupReading::Status(values) = decode_group(GroupId::Status, &payload) else {
            panic!("expected status reading");
        };
        assert_eq!(values[5], 2.0);
        assert_eq!(values[6], 0.0);
    }

    #[test]
    fn six_byte_status_reads_s6_from_one_byte() {
        let GroupReading::Status(values) =
            decode_group(GroupId::Status, &[0, 0, 0, 0, 0, 0x10])
        else {
            panic!("expected status reading");
        };
        assert_eq!(values[5], 0.1);
        assert_eq!(values[6], 0.0);
    }

    #[test]
    fn unknown_identifier_is_ignored() {
        let frame = Frame::new(0x0000_0123, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(decode(&frame).is_none());
    }

    proptest! {
        #[test]
        fn prop_full_cell_frames_divide_words_by_thousand(words in prop::array::uniform4(any::<u16>())) {
            let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            let reading = decode_group(GroupId::Cells4, &payload);
            let expected: Vec<f32> = words.iter().map(|w| *w as f32 / 1000.0).collect();
            prop_assert_eq!(reading.values(), expected.as_slice());
        }

        #[test]
        fn prop_decoded_reading_fits_its_group(
            index in 0usize..GroupId::COUNT,
            payload in prop::collection::vec(any::<u8>(), 0..=8)
        ) {
            let group = GroupId::ALL[index];
            let reading = decode_group(group, &payload);
            prop_assert!(reading.fits(group));
        }
    }
}
