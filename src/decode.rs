// MIT License - Copyright (c) 2026 Peter Wright
// Frame field extraction and report decoding

use bitflags::bitflags;

use crate::frame::BitBuf;
use crate::status::AlarmStatus;
use crate::variant::{DecisionTable, FieldMap, VariantSpec};

/// What a zone report says about one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneEventKind {
    /// The zone's sensor is currently active (door open, motion, ...).
    Activated,
    /// The zone tripped the alarm.
    Triggered,
}

/// One decoded zone observation, zone numbers 1-16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneEvent {
    pub zone: u8,
    pub kind: ZoneEventKind,
}

bitflags! {
    /// Status-report bits, lifted out of their per-variant frame offsets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u8 {
        /// Confirmation bit (bit "a").
        const CONFIRM       = 1 << 0;
        /// Arm-request acknowledged (bit "b").
        const ARM_ACK       = 1 << 1;
        /// Panel was already armed.
        const ALREADY_ARMED = 1 << 2;
        /// Currently arming / chime (bit "c").
        const ARMING        = 1 << 3;
        /// Armed in total mode.
        const TOTAL         = 1 << 4;
        /// Armed in partial mode.
        const PARTIAL       = 1 << 5;
    }
}

impl StatusBits {
    /// Extract the status bits of a 72-bit frame through a variant's
    /// field map.
    pub fn extract(frame: &BitBuf, fields: &FieldMap) -> Self {
        let mut bits = StatusBits::empty();
        bits.set(StatusBits::CONFIRM, frame.bit(fields.confirm));
        bits.set(StatusBits::ARM_ACK, frame.bit(fields.arm_ack));
        bits.set(StatusBits::ALREADY_ARMED, frame.bit(fields.already_armed));
        bits.set(StatusBits::ARMING, frame.bit(fields.arming));
        bits.set(StatusBits::TOTAL, frame.bit(fields.armed_total));
        bits.set(StatusBits::PARTIAL, frame.bit(fields.armed_partial));
        bits
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub zones: heapless::Vec<ZoneEvent, 16>,
    /// New alarm status, when the frame carries one.
    pub status: Option<AlarmStatus>,
}

/// Decode a destuffed frame. Returns `None` for any length other than the
/// variant's recognized frame size; the protocol carries nothing else
/// meaningful and unknown frames are ignored rather than guessed at.
pub fn decode_frame(
    frame: &BitBuf,
    spec: &VariantSpec,
    current: AlarmStatus,
) -> Option<Decoded> {
    if frame.len() != spec.frame_bits {
        return None;
    }

    let fields = &spec.fields;
    let mut decoded = Decoded::default();

    if frame.bit(fields.discriminant) {
        let bits = StatusBits::extract(frame, fields);
        let next = match spec.table {
            DecisionTable::Full => next_status_full(bits, current),
            DecisionTable::Simple => next_status_simple(bits),
        };
        decoded.status = Some(next);
    } else {
        let bank_offset = if frame.bit(fields.bank_select) { 8 } else { 0 };
        for i in 0..8u8 {
            if frame.bit(fields.zone_active + i as usize) {
                let _ = decoded.zones.push(ZoneEvent {
                    zone: i + 1 + bank_offset,
                    kind: ZoneEventKind::Activated,
                });
            }
        }
        for i in 0..8u8 {
            if frame.bit(fields.zone_triggered + i as usize) {
                let _ = decoded.zones.push(ZoneEvent {
                    zone: i + 1 + bank_offset,
                    kind: ZoneEventKind::Triggered,
                });
                if spec.zone_trigger_forces_alarm {
                    decoded.status = Some(AlarmStatus::Triggered);
                }
            }
        }
    }

    Some(decoded)
}

/// The arming-completed test shared by the partial and total rules: either
/// the panel acknowledged without a pending request, or it confirmed with
/// the arming phase over.
fn arming_confirmed(bits: StatusBits) -> bool {
    (!bits.contains(StatusBits::ARM_ACK) && bits.contains(StatusBits::ALREADY_ARMED))
        || (bits.contains(StatusBits::CONFIRM) && !bits.contains(StatusBits::ARMING))
}

/// Decision table of the newer generation. First matching rule wins; a
/// triggered alarm is sticky until an explicit disarm.
fn next_status_full(bits: StatusBits, current: AlarmStatus) -> AlarmStatus {
    let confirm = bits.contains(StatusBits::CONFIRM);
    let ack = bits.contains(StatusBits::ARM_ACK);
    let already = bits.contains(StatusBits::ALREADY_ARMED);
    let arming = bits.contains(StatusBits::ARMING);

    if confirm && ack && arming {
        if already {
            AlarmStatus::Triggered
        } else {
            AlarmStatus::Chime
        }
    } else if confirm && !ack && already {
        AlarmStatus::Disarmed
    } else if bits.contains(StatusBits::PARTIAL) && current != AlarmStatus::Triggered {
        if arming_confirmed(bits) {
            AlarmStatus::ArmedPartial
        } else if current != AlarmStatus::ArmedPartial {
            AlarmStatus::ArmingPartial
        } else {
            current
        }
    } else if bits.contains(StatusBits::TOTAL) && current != AlarmStatus::Triggered {
        if arming_confirmed(bits) {
            AlarmStatus::ArmedTotal
        } else if current != AlarmStatus::ArmedTotal {
            AlarmStatus::ArmingTotal
        } else {
            current
        }
    } else if current != AlarmStatus::Triggered {
        AlarmStatus::Disarmed
    } else if !confirm {
        // Disarm while triggered.
        AlarmStatus::Disarmed
    } else {
        current
    }
}

/// Decision table of the older generation: mode flags plus the arming bit.
fn next_status_simple(bits: StatusBits) -> AlarmStatus {
    let arming = bits.contains(StatusBits::ARMING);
    if bits.contains(StatusBits::PARTIAL) {
        if arming {
            AlarmStatus::ArmingPartial
        } else {
            AlarmStatus::ArmedPartial
        }
    } else if bits.contains(StatusBits::TOTAL) {
        if arming {
            AlarmStatus::ArmingTotal
        } else {
            AlarmStatus::ArmedTotal
        }
    } else {
        AlarmStatus::Disarmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::PanelVariant;

    fn spec() -> &'static VariantSpec {
        PanelVariant::Runner816.spec()
    }

    /// Build a 72-bit frame with the given bit offsets set.
    fn frame_with(set: &[usize]) -> BitBuf {
        (0..72).map(|i| set.contains(&i)).collect()
    }

    fn status_frame(set: &[usize]) -> BitBuf {
        let mut all = set.to_vec();
        all.push(spec().fields.discriminant);
        frame_with(&all)
    }

    #[test]
    fn test_wrong_length_is_ignored() {
        let short: BitBuf = (0..64).map(|_| false).collect();
        assert!(decode_frame(&short, spec(), AlarmStatus::Disarmed).is_none());
    }

    #[test]
    fn test_zone_active_low_bank() {
        // Active bit index 2, bank selector clear -> zone 3.
        let frame = frame_with(&[spec().fields.zone_active + 2]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(
            decoded.zones.as_slice(),
            &[ZoneEvent {
                zone: 3,
                kind: ZoneEventKind::Activated
            }]
        );
        assert_eq!(decoded.status, None);
    }

    #[test]
    fn test_zone_active_high_bank() {
        // Same active pattern with the bank selector set -> zone 11.
        let frame = frame_with(&[spec().fields.bank_select, spec().fields.zone_active + 2]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(
            decoded.zones.as_slice(),
            &[ZoneEvent {
                zone: 11,
                kind: ZoneEventKind::Activated
            }]
        );
    }

    #[test]
    fn test_zone_triggered() {
        let frame = frame_with(&[spec().fields.zone_triggered + 4]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(
            decoded.zones.as_slice(),
            &[ZoneEvent {
                zone: 5,
                kind: ZoneEventKind::Triggered
            }]
        );
        // The newer generation reports the trigger through a status frame.
        assert_eq!(decoded.status, None);
    }

    #[test]
    fn test_zone_trigger_forces_alarm_on_powerwave() {
        let pw = PanelVariant::PowerWave16.spec();
        let mut frame = BitBuf::new();
        for i in 0..72 {
            frame.push(i == pw.fields.zone_triggered);
        }
        let decoded = decode_frame(&frame, pw, AlarmStatus::ArmedTotal).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Triggered));
    }

    #[test]
    fn test_status_triggered_vs_chime_precedence() {
        let f = &spec().fields;
        // a, b, c and already-armed set: a real alarm.
        let frame = status_frame(&[f.confirm, f.arm_ack, f.arming, f.already_armed]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::ArmedTotal).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Triggered));

        // Same bits without already-armed: just the chime.
        let frame = status_frame(&[f.confirm, f.arm_ack, f.arming]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Chime));
    }

    #[test]
    fn test_status_disarm_confirmation() {
        let f = &spec().fields;
        let frame = status_frame(&[f.confirm, f.already_armed]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::ArmedTotal).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Disarmed));
    }

    #[test]
    fn test_status_partial_arming_then_armed() {
        let f = &spec().fields;
        // Partial flag alone: arming is still in progress.
        let frame = status_frame(&[f.armed_partial, f.arm_ack]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::ArmingPartial));

        // Acknowledge cleared with already-armed set: arming completed.
        let frame = status_frame(&[f.armed_partial, f.already_armed]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::ArmingPartial).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::ArmedPartial));
    }

    #[test]
    fn test_status_armed_partial_does_not_regress() {
        let f = &spec().fields;
        let frame = status_frame(&[f.armed_partial, f.arm_ack]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::ArmedPartial).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::ArmedPartial));
    }

    #[test]
    fn test_status_total_mode() {
        let f = &spec().fields;
        let frame = status_frame(&[f.armed_total, f.confirm]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::ArmedTotal));

        let frame = status_frame(&[f.armed_total, f.arm_ack]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Disarmed).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::ArmingTotal));
    }

    #[test]
    fn test_status_triggered_is_sticky() {
        let f = &spec().fields;
        // Mode flags cannot clear a triggered alarm...
        let frame = status_frame(&[f.armed_total, f.confirm]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Triggered).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Triggered));

        // ...but a report with the confirmation bit clear disarms it.
        let frame = status_frame(&[]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::Triggered).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Disarmed));
    }

    #[test]
    fn test_status_all_clear_means_disarmed() {
        let frame = status_frame(&[]);
        let decoded = decode_frame(&frame, spec(), AlarmStatus::ArmedTotal).unwrap();
        assert_eq!(decoded.status, Some(AlarmStatus::Disarmed));
    }

    #[test]
    fn test_simple_table() {
        assert_eq!(next_status_simple(StatusBits::empty()), AlarmStatus::Disarmed);
        assert_eq!(
            next_status_simple(StatusBits::PARTIAL | StatusBits::ARMING),
            AlarmStatus::ArmingPartial
        );
        assert_eq!(next_status_simple(StatusBits::PARTIAL), AlarmStatus::ArmedPartial);
        assert_eq!(
            next_status_simple(StatusBits::TOTAL | StatusBits::ARMING),
            AlarmStatus::ArmingTotal
        );
        assert_eq!(next_status_simple(StatusBits::TOTAL), AlarmStatus::ArmedTotal);
        // Partial wins when both flags are set.
        assert_eq!(
            next_status_simple(StatusBits::TOTAL | StatusBits::PARTIAL),
            AlarmStatus::ArmedPartial
        );
    }
}
